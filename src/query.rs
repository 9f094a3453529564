//! Query client (consumer side).
//!
//! `file_open`/`dataset_open` locate and describe a remote dataset; `query`
//! resolves a file selection against it by asking the owning producer
//! rank(s) for redirects, then for data, and projects the result onto the
//! caller's memory selection. `file_close`/`send_done` tear the session back
//! down.

use std::collections::HashSet;

use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::Result;
use crate::index::{decode_dataset_open_response, decode_get_data_response, decode_redirects_response, encode_request, Decomposer};
use crate::rpc::wire::{Message, Writer};
use crate::rpc::{RpcClient, Tag, Transport};

/// A dataset opened from a remote producer: its type/shape and the
/// [`Decomposer`] matching the producer's partition.
#[derive(Debug, Clone)]
pub struct RemoteDataset {
    pub dtype: Datatype,
    pub space: Dataspace,
    pub decomposer: Decomposer,
}

/// Consumer-side client over one producer intercommunicator, modeled here as
/// one rank of the shared [`Transport`].
pub struct Query<T: Transport> {
    client: RpcClient<T>,
    local_rank: usize,
}

impl<T: Transport> Query<T> {
    pub fn new(transport: T) -> Self {
        let local_rank = transport.rank();
        Query { client: RpcClient::new(transport), local_rank }
    }

    /// Send `filename` open notification to `producer_root`, root rank only.
    /// A one-way send rather than a call: nothing needs to come back.
    pub fn file_open(&self, producer_root: usize, filename: &str) -> Result<()> {
        if self.local_rank != 0 {
            return Ok(());
        }
        let mut w = Writer::new();
        w.write_str(filename);
        self.client.transport().send(producer_root, Tag::Consumer, &Message::function("file_open", w.finish()))
    }

    /// Mirrors [`Query::file_open`].
    pub fn file_close(&self, producer_root: usize, filename: &str) -> Result<()> {
        if self.local_rank != 0 {
            return Ok(());
        }
        let mut w = Writer::new();
        w.write_str(filename);
        self.client.transport().send(producer_root, Tag::Consumer, &Message::function("file_close", w.finish()))
    }

    /// Query `producer_root` for a dataset's dim/type/space, root rank only,
    /// then broadcast the result to every local rank so each can build a
    /// matching [`Decomposer`].
    pub fn dataset_open(&self, producer_root: usize, filename: &str, path: &str) -> Result<RemoteDataset> {
        let local_root = 0;
        let response = if self.local_rank == local_root {
            let mut w = Writer::new();
            w.write_str(filename);
            w.write_str(path);
            let resp = self.client.call_function(producer_root, "dataset_open", w.finish(), Vec::new())?;
            self.client.transport().broadcast(local_root, Some(resp))?
        } else {
            self.client.transport().broadcast(local_root, None)?
        };
        let (dtype, space, nranks) = decode_dataset_open_response(&response.payload)?;
        let decomposer = Decomposer::new(space.current_extent().into(), nranks);
        Ok(RemoteDataset { dtype, space, decomposer })
    }

    /// Resolve `file_space` against `remote`, copying matching elements,
    /// projected through `mem_space`, into `buf`.
    pub fn query(
        &self,
        filename: &str,
        path: &str,
        remote: &RemoteDataset,
        file_space: &Dataspace,
        mem_space: &Dataspace,
        buf: &mut [u8],
    ) -> Result<()> {
        let candidates = remote.decomposer.bounds_to_gids(file_space);

        let mut owners = HashSet::new();
        for rank in candidates {
            let req = encode_request(filename, path, file_space);
            let resp = self.client.call_function(rank, "redirects", req, Vec::new())?;
            for (_, owner) in decode_redirects_response(&resp.payload)? {
                owners.insert(owner);
            }
        }

        let elem = remote.dtype.size();
        for rank in owners {
            let req = encode_request(filename, path, file_space);
            let resp = self.client.call_function(rank, "get_data", req, Vec::new())?;
            for (chunk_space, bytes) in decode_get_data_response(&resp.payload)? {
                let projected = file_space.project_intersection(mem_space, &chunk_space);
                let mut cursor = 0usize;
                projected.iterate(elem, |offset, len| {
                    let (start, end) = (offset as usize, (offset + len) as usize);
                    if end <= buf.len() && cursor + (end - start) <= bytes.len() {
                        buf[start..end].copy_from_slice(&bytes[cursor..cursor + (end - start)]);
                    }
                    cursor += end - start;
                });
            }
        }
        Ok(())
    }

    /// Terminate the producer's serve loop on `producer_rank`.
    pub fn send_done(&self, producer_rank: usize) -> Result<()> {
        self.client.finish(producer_rank)
    }
}
