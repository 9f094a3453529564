//! Index service (producer side).
//!
//! On first serve, walks the process map for Dataset leaves and builds one
//! [`IndexedDataset`] per leaf: a [`Decomposer`] partitions the dataset's
//! file-space bounding box across the ranks of the local communicator, and
//! the serve loop answers `get_data`/`redirects` requests arriving over the
//! [`Transport`].

use std::collections::HashMap;

use crate::dataspace::{Dataspace, Dims, Hyperslab, Selection};
use crate::datatype::Datatype;
use crate::error::{MetadataError, Result};
use crate::object::{ObjectTree, Token};
use crate::rpc::wire::{Reader, Writer};
use crate::rpc::{Inbound, RpcServer, Transport};
use crate::serialize::{decode_dataspace, decode_datatype, encode_dataspace, encode_datatype};

/// Partitions a dataset's file-space bounding box across `nranks`, splitting
/// along the leading dimension only.
#[derive(Debug, Clone)]
pub struct Decomposer {
    shape: Dims,
    nranks: usize,
}

impl Decomposer {
    pub fn new(shape: Dims, nranks: usize) -> Self {
        Decomposer { shape, nranks: nranks.max(1) }
    }

    pub fn nranks(&self) -> usize {
        self.nranks
    }

    /// The sub-box of the file space owned by `rank`: dimension 0 is split
    /// into `nranks` contiguous slabs (low-numbered ranks absorb the
    /// remainder), every other dimension spans its full extent.
    pub fn box_for_rank(&self, rank: usize) -> Dataspace {
        if self.shape.is_empty() {
            return Dataspace::scalar();
        }
        let dim0 = self.shape[0];
        let base = dim0 / self.nranks as u64;
        let rem = dim0 % self.nranks as u64;
        let r = rank as u64;
        let start0 = r * base + r.min(rem);
        let count0 = base + if r < rem { 1 } else { 0 };

        let mut start = Dims::from_elem(0, self.shape.len());
        let mut count = self.shape.clone();
        start[0] = start0;
        count[0] = count0;
        let stride = Dims::from_elem(1, self.shape.len());
        let block = Dims::from_elem(1, self.shape.len());

        Dataspace::simple_fixed(self.shape.clone())
            .with_selection(Selection::Hyperslab(Hyperslab { start, stride, count, block }))
    }

    /// Ranks whose box has non-empty (bounding-box) intersection with
    /// `query`.
    pub fn bounds_to_gids(&self, query: &Dataspace) -> Vec<usize> {
        (0..self.nranks).filter(|&r| self.box_for_rank(r).intersects(query)).collect()
    }
}

/// One dataset served by an [`Index`].
#[derive(Debug, Clone)]
pub struct IndexedDataset {
    pub token: Token,
    pub dtype: Datatype,
    pub space: Dataspace,
    pub decomposer: Decomposer,
}

/// Producer-side index: a server plus the set of datasets it has been told
/// to serve, keyed by `"filename:path"`.
pub struct Index<T: Transport> {
    server: RpcServer<T>,
    datasets: HashMap<String, IndexedDataset>,
}

fn dataset_key(filename: &str, path: &str) -> String {
    format!("{filename}:{path}")
}

impl<T: Transport> Index<T> {
    pub fn new(transport: T) -> Self {
        Index { server: RpcServer::new(transport), datasets: HashMap::new() }
    }

    pub fn server(&self) -> &RpcServer<T> {
        &self.server
    }

    /// Whether a consumer request is waiting to be handled.
    pub fn has_pending(&self) -> bool {
        self.server.transport().has_pending(crate::rpc::Tag::Consumer)
    }

    /// Handle exactly one pending request (a step of the loop [`Index::serve`]
    /// runs to completion), without the peer-count termination check.
    pub fn serve_one(&mut self, tree: &ObjectTree) -> Result<()> {
        let inbound = self.server.receive_one()?;
        let datasets = &self.datasets;
        handle_inbound(&mut self.server, datasets, tree, inbound)
    }

    /// Register `token` (which must name a `Dataset` in `tree`) for serving
    /// under `(filename, path)`, instantiating its [`Decomposer`] from the
    /// dataset's current extent and the local communicator size.
    pub fn index(&mut self, tree: &ObjectTree, filename: &str, path: &str, token: Token) -> Result<()> {
        let node = tree
            .get(token)
            .ok_or_else(|| MetadataError::NotFound(format!("index: no such object {:?}", token)))?;
        let dataset = node
            .payload()
            .as_dataset()
            .ok_or_else(|| MetadataError::TypeMismatch(format!("index: {:?} is not a Dataset", token)))?;
        let decomposer = Decomposer::new(dataset.space.current_extent().into(), self.server.transport().size());
        self.datasets.insert(
            dataset_key(filename, path),
            IndexedDataset { token, dtype: dataset.dtype.clone(), space: dataset.space.clone(), decomposer },
        );
        Ok(())
    }

    /// Poll the serve loop until `peers` distinct consumers have sent
    /// `finish`, then perform the closing barrier.
    pub fn serve(&mut self, tree: &ObjectTree, peers: usize) -> Result<()> {
        let datasets = &self.datasets;
        self.server.run_until_finished(peers, |server, inbound| handle_inbound(server, datasets, tree, inbound))
    }
}

fn handle_inbound<T: Transport>(
    server: &mut RpcServer<T>,
    datasets: &HashMap<String, IndexedDataset>,
    tree: &ObjectTree,
    inbound: Inbound,
) -> Result<()> {
    match inbound {
        Inbound::Finish { from } => {
            server.mark_finished(from);
            Ok(())
        }
        Inbound::Destroy { .. } => Ok(()),
        Inbound::Create { from, .. } => {
            let id = server.register(0, None);
            server.respond_create(from, id)
        }
        Inbound::Call { from, callable, payload, .. } => match callable.as_str() {
            "get_data" => respond_get_data(server, datasets, tree, from, &payload),
            "redirects" => respond_redirects(server, datasets, from, &payload),
            "dataset_open" => respond_dataset_open(server, datasets, from, &payload),
            other => Err(crate::error::RpcError::UnknownCallable(other.to_string()).into()),
        },
    }
}

fn read_key_and_space(payload: &[u8]) -> Result<(String, String, Dataspace)> {
    let mut r = Reader::new(payload);
    let filename = r.read_str()?;
    let path = r.read_str()?;
    let space = decode_dataspace(&mut r)?;
    Ok((filename, path, space))
}

fn respond_get_data<T: Transport>(
    server: &mut RpcServer<T>,
    datasets: &HashMap<String, IndexedDataset>,
    tree: &ObjectTree,
    from: usize,
    payload: &[u8],
) -> Result<()> {
    let (filename, path, query) = read_key_and_space(payload)?;
    let dataset = datasets
        .get(&dataset_key(&filename, &path))
        .ok_or_else(|| MetadataError::NotFound(format!("get_data: unknown dataset {filename}:{path}")))?;
    let node = tree
        .get(dataset.token)
        .ok_or_else(|| MetadataError::NotFound(format!("get_data: dangling dataset token for {filename}:{path}")))?;
    let ds_payload = node
        .payload()
        .as_dataset()
        .ok_or_else(|| MetadataError::TypeMismatch(format!("get_data: {filename}:{path} is not a Dataset")))?;

    let mut w = Writer::new();
    let hits: Vec<(Dataspace, Vec<u8>)> = ds_payload
        .data
        .iter()
        .filter(|triple| triple.file_space.intersects(&query))
        .map(|triple| {
            let hit = triple.file_space.project_intersection(&triple.file_space, &query);
            let local_src = triple.file_space.project_intersection(&triple.memory_space, &query);
            let elem = triple.dtype.size();
            let mut bytes = Vec::new();
            let src_bytes = triple.as_slice();
            Dataspace::iterate_pair(&hit, elem, &local_src, elem, |_hit_off, local_off, len| {
                let (start, end) = (local_off as usize, (local_off + len) as usize);
                bytes.extend_from_slice(&src_bytes[start..end]);
            });
            (hit, bytes)
        })
        .filter(|(_, bytes)| !bytes.is_empty())
        .collect();

    w.write_u64(hits.len() as u64);
    for (space, bytes) in &hits {
        encode_dataspace(&mut w, space);
        w.write_bytes(bytes);
    }
    server.respond(from, "get_data", w.finish(), Vec::new())
}

fn respond_dataset_open<T: Transport>(
    server: &mut RpcServer<T>,
    datasets: &HashMap<String, IndexedDataset>,
    from: usize,
    payload: &[u8],
) -> Result<()> {
    let mut r = Reader::new(payload);
    let filename = r.read_str()?;
    let path = r.read_str()?;
    let dataset = datasets
        .get(&dataset_key(&filename, &path))
        .ok_or_else(|| MetadataError::NotFound(format!("dataset_open: unknown dataset {filename}:{path}")))?;
    let body = encode_dataset_open_response(&dataset.dtype, &dataset.space, dataset.decomposer.nranks());
    server.respond(from, "dataset_open", body, Vec::new())
}

fn respond_redirects<T: Transport>(
    server: &mut RpcServer<T>,
    datasets: &HashMap<String, IndexedDataset>,
    from: usize,
    payload: &[u8],
) -> Result<()> {
    let (filename, path, query) = read_key_and_space(payload)?;
    let dataset = datasets
        .get(&dataset_key(&filename, &path))
        .ok_or_else(|| MetadataError::NotFound(format!("redirects: unknown dataset {filename}:{path}")))?;

    let mut w = Writer::new();
    let owners = dataset.decomposer.bounds_to_gids(&query);
    w.write_u64(owners.len() as u64);
    for rank in owners {
        let owner_box = dataset.decomposer.box_for_rank(rank);
        let sub = query.project_intersection(&query, &owner_box);
        encode_dataspace(&mut w, &sub);
        w.write_u64(rank as u64);
    }
    server.respond(from, "redirects", w.finish(), Vec::new())
}

/// Build the wire payload for a `get_data`/`redirects` request (shared with
/// [`crate::query`]).
pub(crate) fn encode_request(filename: &str, path: &str, space: &Dataspace) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_str(filename);
    w.write_str(path);
    encode_dataspace(&mut w, space);
    w.finish()
}

/// Decode a `get_data` response: a list of `(file selection, bytes)` pairs.
pub(crate) fn decode_get_data_response(payload: &[u8]) -> Result<Vec<(Dataspace, Vec<u8>)>> {
    let mut r = Reader::new(payload);
    let count = r.read_u64()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let space = decode_dataspace(&mut r)?;
        let bytes = r.read_bytes()?.to_vec();
        out.push((space, bytes));
    }
    Ok(out)
}

/// Decode a `redirects` response: a list of `(sub-selection, owner rank)`
/// pairs.
pub(crate) fn decode_redirects_response(payload: &[u8]) -> Result<Vec<(Dataspace, usize)>> {
    let mut r = Reader::new(payload);
    let count = r.read_u64()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let space = decode_dataspace(&mut r)?;
        let rank = r.read_u64()? as usize;
        out.push((space, rank));
    }
    Ok(out)
}

/// Encode a `dataset_open` response: dtype, space, and the server
/// communicator's size (so the consumer can reconstruct a matching
/// [`Decomposer`]).
pub(crate) fn encode_dataset_open_response(dtype: &Datatype, space: &Dataspace, nranks: usize) -> Vec<u8> {
    let mut w = Writer::new();
    encode_datatype(&mut w, dtype);
    encode_dataspace(&mut w, space);
    w.write_u64(nranks as u64);
    w.finish()
}

pub(crate) fn decode_dataset_open_response(payload: &[u8]) -> Result<(Datatype, Dataspace, usize)> {
    let mut r = Reader::new(payload);
    let dtype = decode_datatype(&mut r)?;
    let space = decode_dataspace(&mut r)?;
    let nranks = r.read_u64()? as usize;
    Ok((dtype, space, nranks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataspace::Dims;
    use crate::datatype::TypeClass;
    use crate::object::{DataTriple, DatasetPayload, FileProps, Ownership, Payload};
    use crate::rpc::{InProcessBus, RpcClient};

    fn hyperslab_1d(start: u64, count: u64) -> Selection {
        Selection::Hyperslab(Hyperslab {
            start: Dims::from_slice(&[start]),
            stride: Dims::from_slice(&[1]),
            count: Dims::from_slice(&[count]),
            block: Dims::from_slice(&[1]),
        })
    }

    /// A write whose `file_space` hyperslab does not start at 0 (a rank
    /// owning the upper half of the dataset) must still answer `get_data`
    /// correctly: the stored bytes are packed in `memory_space` order, not
    /// `file_space` order, so a query must be projected onto the former to
    /// index the buffer and onto the latter only to describe the response.
    #[test]
    fn get_data_handles_a_file_space_that_does_not_start_at_zero() {
        let ranks = InProcessBus::new(2);
        let mut tree = ObjectTree::new();
        let file = tree.create_file("sim.h5", FileProps::default());
        let dtype = Datatype::new(TypeClass::Integer, 4);
        let full_space = Dataspace::simple_fixed(Dims::from_slice(&[100]));

        let file_space = full_space.with_selection(hyperslab_1d(50, 50));
        let memory_space = Dataspace::simple_fixed(Dims::from_slice(&[50])).with_selection(hyperslab_1d(0, 50));
        let packed: Vec<u8> = (50..100i32).flat_map(|v| v.to_le_bytes()).collect();
        let triple = DataTriple::owned(dtype.clone(), memory_space, file_space, packed);

        let ds_token = tree
            .add_child(
                file,
                "grid",
                Payload::Dataset(DatasetPayload {
                    dtype: dtype.clone(),
                    space: full_space,
                    dcpl: 0,
                    dapl: 0,
                    ownership: Ownership::Owned,
                    is_passthru: false,
                    is_memory: true,
                    data: vec![triple],
                }),
            )
            .unwrap();

        let mut index = Index::new(ranks[0].clone());
        index.index(&tree, "sim.h5", "/grid", ds_token).unwrap();

        let client = RpcClient::new(ranks[1].clone());
        let query = Dataspace::simple_fixed(Dims::from_slice(&[100])).with_selection(hyperslab_1d(60, 10));
        let req = encode_request("sim.h5", "/grid", &query);
        client.transport().send(0, crate::rpc::Tag::Consumer, &crate::rpc::wire::Message::function("get_data", req)).unwrap();

        while index.has_pending() {
            index.serve_one(&tree).unwrap();
        }

        let resp = client.transport().receive_from(0, crate::rpc::Tag::Producer).unwrap();
        let hits = decode_get_data_response(&resp.payload).unwrap();
        assert_eq!(hits.len(), 1);
        let (_space, bytes) = &hits[0];
        let values: Vec<i32> = bytes.chunks(4).map(|c| i32::from_le_bytes(c.try_into().unwrap())).collect();
        assert_eq!(values, (60..70).collect::<Vec<i32>>());
    }

    #[test]
    fn decomposer_splits_leading_dimension_with_remainder_low() {
        let d = Decomposer::new(Dims::from_slice(&[10]), 3);
        assert_eq!(d.box_for_rank(0).current_extent(), &[10]);
        let counts: Vec<u64> = (0..3)
            .map(|r| match d.box_for_rank(r).selection() {
                Selection::Hyperslab(h) => h.count[0],
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(counts, vec![4, 3, 3]);
    }

    #[test]
    fn bounds_to_gids_finds_intersecting_ranks_only() {
        let d = Decomposer::new(Dims::from_slice(&[9]), 3);
        let query = Dataspace::simple_fixed(Dims::from_slice(&[9])).with_selection(Selection::Hyperslab(Hyperslab {
            start: Dims::from_slice(&[4]),
            stride: Dims::from_slice(&[1]),
            count: Dims::from_slice(&[2]),
            block: Dims::from_slice(&[1]),
        }));
        assert_eq!(d.bounds_to_gids(&query), vec![1]);
    }
}
