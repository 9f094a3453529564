//! Distributed VOL.
//!
//! Layers two state-machine additions onto a [`VolDispatcher`]: a
//! consumer-side `dataset_open` that upgrades a `DummyDataset` placeholder
//! into a `RemoteDataset` shadow bound to the intercommunicator the router
//! names for it, and a producer-side `file_close` that hands every dataset
//! under the closing file to an [`Index`] and runs its serve loop.

use std::collections::{HashMap, HashSet};

use crate::dataspace::Dataspace;
use crate::error::{MetadataError, Result};
use crate::index::Index;
use crate::object::{ObjectTree, Payload, RemoteDatasetPayload, Token};
use crate::query::{Query, RemoteDataset};
use crate::rpc::Transport;
use crate::vol::VolDispatcher;

/// Recursively collect every `Dataset` (not `Dummy`/`Remote`) token under
/// `root`, the set `file_close` hands to an `Index`.
fn collect_datasets(tree: &ObjectTree, root: Token, out: &mut HashSet<Token>) {
    let Some(node) = tree.get(root) else { return };
    if matches!(node.payload(), Payload::Dataset(_)) {
        out.insert(root);
    }
    for &child in node.children() {
        collect_datasets(tree, child, out);
    }
}

/// Wraps a [`VolDispatcher`] with the consumer-side dataset upgrade and the
/// producer-side serve bookkeeping needed to back it. One [`Query`] is
/// built lazily per intercommunicator index the router names.
pub struct DistributedVol<T: Transport + Clone> {
    vol: VolDispatcher,
    transport: T,
    queries: HashMap<usize, Query<T>>,
    /// Shadow state for an open `RemoteDataset`: the intercommunicator it is
    /// bound to and the query-side view (dtype/space/decomposer) used to
    /// answer reads. Kept alongside the tree rather than inside
    /// [`RemoteDatasetPayload`] since the decomposer isn't part of the
    /// wire-serializable payload.
    remote_datasets: HashMap<Token, (usize, RemoteDataset)>,
    /// Datasets accumulated at `file_close`, pending a `serve_all` call,
    /// keyed by filename.
    serve_data: HashMap<String, HashSet<Token>>,
    serve_on_close: Option<usize>,
}

impl<T: Transport + Clone> DistributedVol<T> {
    pub fn new(vol: VolDispatcher, transport: T) -> Self {
        DistributedVol {
            vol,
            transport,
            queries: HashMap::new(),
            remote_datasets: HashMap::new(),
            serve_data: HashMap::new(),
            serve_on_close: None,
        }
    }

    pub fn vol(&self) -> &VolDispatcher {
        &self.vol
    }

    pub fn vol_mut(&mut self) -> &mut VolDispatcher {
        &mut self.vol
    }

    /// Make `file_close` run `serve_all(filename, peers)` before tearing the
    /// file down.
    pub fn enable_serve_on_close(&mut self, peers: usize) {
        self.serve_on_close = Some(peers);
    }

    fn query_for(&mut self, intercomm_index: usize) -> &Query<T> {
        let transport = self.transport.clone();
        self.queries.entry(intercomm_index).or_insert_with(|| Query::new(transport))
    }

    /// Consumer-side `dataset_open` : resolves `path`
    /// against the local tree exactly as [`VolDispatcher::dataset_open`]
    /// would. If that resolves to a fresh `DummyDataset` and the router
    /// binds `(filename, path)` to an intercommunicator, issues the RPC
    /// `dataset_open` on it and overwrites the placeholder with a
    /// `RemoteDataset`. A path that already resolves locally (or has no
    /// bound intercommunicator) is returned unchanged.
    pub fn dataset_open(&mut self, producer_root: usize, filename: &str, parent: Token, path: &str) -> Result<Token> {
        let token = self
            .vol
            .dataset_open(filename, parent, path)?
            .metadata
            .ok_or_else(|| MetadataError::Unimplemented("dataset_open: no metadata token returned".into()))?;

        let is_dummy = matches!(self.vol.tree().get(token).map(|n| n.payload()), Some(Payload::DummyDataset));
        if !is_dummy {
            return Ok(token);
        }
        let Some(intercomm_index) = self.vol.router().intercomm_for(filename, path) else {
            return Ok(token);
        };

        let remote = self.query_for(intercomm_index).dataset_open(producer_root, filename, path)?;
        let node = self
            .vol
            .tree_mut()
            .get_mut(token)
            .ok_or_else(|| MetadataError::NotFound(format!("dataset_open: dangling token for {filename}:{path}")))?;
        *node.payload_mut() = Payload::RemoteDataset(RemoteDatasetPayload {
            dtype: remote.dtype.clone(),
            space: remote.space.clone(),
            intercomm_index,
        });
        self.remote_datasets.insert(token, (intercomm_index, remote));
        Ok(token)
    }

    /// Resolve `file_space` against the `RemoteDataset` at `token`, copying
    /// matching bytes projected through `mem_space` into `buf`.
    pub fn dataset_read_remote(
        &mut self,
        token: Token,
        filename: &str,
        path: &str,
        mem_space: &Dataspace,
        file_space: &Dataspace,
        buf: &mut [u8],
    ) -> Result<()> {
        let (intercomm_index, remote) = self
            .remote_datasets
            .get(&token)
            .cloned()
            .ok_or_else(|| MetadataError::TypeMismatch(format!("dataset_read_remote: {:?} is not an open RemoteDataset", token)))?;
        self.query_for(intercomm_index).query(filename, path, &remote, file_space, mem_space, buf)
    }

    /// Consumer-side `file_open` notification on the intercommunicator bound
    /// to `filename`.
    pub fn file_open_remote(&mut self, producer_root: usize, intercomm_index: usize, filename: &str) -> Result<()> {
        self.query_for(intercomm_index).file_open(producer_root, filename)
    }

    /// Mirrors [`DistributedVol::file_open_remote`].
    pub fn file_close_remote(&mut self, producer_root: usize, intercomm_index: usize, filename: &str) -> Result<()> {
        self.query_for(intercomm_index).file_close(producer_root, filename)
    }

    /// Terminate a producer's serve loop as seen from this consumer.
    pub fn send_done(&mut self, producer_rank: usize, intercomm_index: usize) -> Result<()> {
        self.query_for(intercomm_index).send_done(producer_rank)
    }

    /// Register `token` for serving, bypassing the `file_close` scan; useful
    /// when a caller wants to serve a dataset before its file closes.
    pub fn track_for_serving(&mut self, filename: &str, token: Token) {
        self.serve_data.entry(filename.to_string()).or_default().insert(token);
    }

    /// Build an [`Index`] over every dataset tracked for `filename`, index
    /// each one, and run the serve loop until `peers` consumers send
    /// `finish`.
    pub fn serve_all(&mut self, filename: &str, peers: usize) -> Result<()> {
        let tokens = self.serve_data.remove(filename).unwrap_or_default();
        if tokens.is_empty() {
            return Ok(());
        }
        let mut index = Index::new(self.transport.clone());
        for token in &tokens {
            let (fname, path) = self.vol.tree().fullname(*token, None)?;
            index.index(self.vol.tree(), &fname, &path, *token)?;
        }
        index.serve(self.vol.tree(), peers)
    }

    /// Producer-side `file_close`: scans the closing file's subtree for
    /// `Dataset` leaves, adds them to the serve set, runs `serve_all` when
    /// `serve_on_close` is enabled, and finally closes the file the way
    /// [`VolDispatcher::file_close`] would.
    pub fn file_close(&mut self, filename: &str, keep: bool) -> Result<()> {
        if let Some(&file_token) = self.vol.files.get(filename) {
            let mut found = HashSet::new();
            collect_datasets(self.vol.tree(), file_token, &mut found);
            self.serve_data.entry(filename.to_string()).or_default().extend(found);
        }
        if let Some(peers) = self.serve_on_close {
            self.serve_all(filename, peers)?;
        }
        self.vol.file_close(filename, keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataspace::Dims;
    use crate::datatype::{Datatype, TypeClass};
    use crate::object::{DataTriple, DatasetPayload, FileProps, Ownership};
    use crate::rpc::wire::{Message, Writer};
    use crate::rpc::{InProcessBus, Tag};

    fn grid_bytes(n: u64) -> Vec<u8> {
        (0..n as i32).flat_map(|v| v.to_le_bytes()).collect()
    }

    fn drain<U: Transport>(index: &mut Index<U>, tree: &ObjectTree) {
        while index.has_pending() {
            index.serve_one(tree).unwrap();
        }
    }

    #[test]
    fn collect_datasets_finds_leaves_but_not_groups_or_dummies() {
        let mut tree = ObjectTree::new();
        let file = tree.create_file("sim.h5", FileProps::default());
        let group = tree.add_child(file, "g", Payload::Group(crate::object::GroupProps::default())).unwrap();
        let dtype = Datatype::new(TypeClass::Integer, 4);
        let space = Dataspace::simple_fixed(Dims::from_slice(&[4]));
        let ds = tree
            .add_child(
                group,
                "grid",
                Payload::Dataset(DatasetPayload {
                    dtype,
                    space,
                    dcpl: 0,
                    dapl: 0,
                    ownership: Ownership::Owned,
                    is_passthru: false,
                    is_memory: true,
                    data: Vec::new(),
                }),
            )
            .unwrap();
        tree.add_child(file, "placeholder", Payload::DummyDataset).unwrap();

        let mut found = HashSet::new();
        collect_datasets(&tree, file, &mut found);
        assert_eq!(found, HashSet::from([ds]));
    }

    #[test]
    fn dataset_open_upgrades_dummy_to_remote_dataset_bound_to_its_intercomm() {
        // Producer-side fixture: a served dataset.
        let ranks = InProcessBus::new(2); // 0 = consumer, 1 = producer
        let mut producer_tree = ObjectTree::new();
        let pfile = producer_tree.create_file("sim.h5", FileProps::default());
        let dtype = Datatype::new(TypeClass::Integer, 4);
        let space = Dataspace::simple_fixed(Dims::from_slice(&[8]));
        let triple = DataTriple::owned(dtype.clone(), space.clone(), space.clone(), grid_bytes(8));
        let ds_token = producer_tree
            .add_child(
                pfile,
                "grid",
                Payload::Dataset(DatasetPayload {
                    dtype,
                    space,
                    dcpl: 0,
                    dapl: 0,
                    ownership: Ownership::Owned,
                    is_passthru: false,
                    is_memory: true,
                    data: vec![triple],
                }),
            )
            .unwrap();
        let mut index = Index::new(ranks[1].clone());
        index.index(&producer_tree, "sim.h5", "/grid", ds_token).unwrap();

        // Pre-seed the dataset_open response the consumer's call is about
        // to block on: drive the producer's server against the exact
        // request payload `Query::dataset_open` sends, the way
        // `query::tests` establishes the discipline for this non-blocking
        // transport double.
        let mut w = Writer::new();
        w.write_str("sim.h5");
        w.write_str("/grid");
        ranks[0].send(1, Tag::Consumer, &Message::function("dataset_open", w.finish())).unwrap();
        drain(&mut index, &producer_tree);

        // Consumer side.
        let mut vol = VolDispatcher::default();
        vol.router_mut().set_memory("sim.h5", "*");
        vol.router_mut().set_intercomm("sim.h5", "*", 7);
        let file = vol.file_open("sim.h5").unwrap().metadata.unwrap();
        let mut consumer = DistributedVol::new(vol, ranks[0].clone());

        let token = consumer.dataset_open(1, "sim.h5", file, "/grid").unwrap();
        match consumer.vol().tree().get(token).unwrap().payload() {
            Payload::RemoteDataset(rd) => {
                assert_eq!(rd.intercomm_index, 7);
                assert_eq!(rd.space.current_extent(), &[8]);
            }
            other => panic!("expected RemoteDataset, got {other:?}"),
        }
        assert!(consumer.remote_datasets.contains_key(&token));
    }

    #[test]
    fn dataset_open_of_a_locally_resolvable_path_skips_the_rpc() {
        let mut vol = VolDispatcher::default();
        vol.router_mut().set_memory("f.h5", "*");
        let file = vol.file_create("f.h5", FileProps::default()).unwrap().metadata.unwrap();
        let dtype = Datatype::new(TypeClass::Integer, 4);
        let space = Dataspace::simple_fixed(Dims::from_slice(&[4]));
        let ds = vol.dataset_create("f.h5", file, "/grid", dtype, space, 0, 0).unwrap().metadata.unwrap();

        let ranks = InProcessBus::new(1);
        let mut consumer = DistributedVol::new(vol, ranks[0].clone());
        let token = consumer.dataset_open(0, "f.h5", file, "/grid").unwrap();
        assert_eq!(token, ds);
        assert!(!consumer.remote_datasets.contains_key(&token));
    }

    #[test]
    fn file_close_with_serve_on_close_drains_the_tracked_set_with_zero_peers() {
        let mut vol = VolDispatcher::default();
        vol.router_mut().set_memory("sim.h5", "*");
        let file = vol.file_create("sim.h5", FileProps::default()).unwrap().metadata.unwrap();
        let dtype = Datatype::new(TypeClass::Integer, 4);
        let space = Dataspace::simple_fixed(Dims::from_slice(&[4]));
        vol.dataset_create("sim.h5", file, "/grid", dtype, space, 0, 0).unwrap();

        let ranks = InProcessBus::new(1);
        let mut producer = DistributedVol::new(vol, ranks[0].clone());
        producer.enable_serve_on_close(0);
        // Zero peers: `run_until_finished` never enters its receive loop, so
        // this exercises the index/serve plumbing without needing an actual
        // consumer request queued up.
        producer.file_close("sim.h5", false).unwrap();
        assert!(producer.serve_data.get("sim.h5").map(|s| s.is_empty()).unwrap_or(true));
    }
}
