//! RPC substrate.
//!
//! Typed function/method invocation across an MPI communicator, built as a
//! thin protocol layer on top of the abstract [`Transport`] rather than
//! reimplementing MPI point-to-point (that responsibility belongs to the
//! `mpi` crate this crate already depends on).

pub mod mpi_transport;
pub mod transport;
pub mod wire;

pub use mpi_transport::MpiTransport;
pub use transport::{InProcessBus, InProcessTransport, Transport};
pub use wire::{Message, Opcode, Tag};

use std::collections::{HashMap, HashSet};

use crate::error::{Result, RpcError};
use crate::object::Token;

/// One request a server-side [`RpcServer::receive_one`] hands back to its
/// caller for dispatch.
#[derive(Debug, Clone)]
pub enum Inbound {
    Finish { from: usize },
    Create { from: usize, class_id: u8, payload: Vec<u8> },
    Destroy { from: usize, object_id: u64 },
    Call { from: usize, mem_fn: bool, callable: String, payload: Vec<u8>, blobs: Vec<Vec<u8>> },
}

/// An entry of the server's live-object table.
#[derive(Debug, Clone, Copy)]
pub struct LiveObject {
    pub class_id: u8,
    pub token: Option<Token>,
}

/// Client side: caches a refcount per `(target rank, object id)` and issues
/// `create`/`destroy`/`function`/`mem_fn` calls.
pub struct RpcClient<T: Transport> {
    transport: T,
    refcounts: HashMap<(usize, u64), u32>,
}

impl<T: Transport> RpcClient<T> {
    pub fn new(transport: T) -> Self {
        RpcClient { transport, refcounts: HashMap::new() }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Invoke a free function on `rank`, blocking for the response.
    pub fn call_function(&self, rank: usize, name: &str, payload: Vec<u8>, blobs: Vec<Vec<u8>>) -> Result<Message> {
        self.transport.send(rank, Tag::Consumer, &Message::function(name, payload).with_blobs(blobs))?;
        self.transport.receive_from(rank, Tag::Producer)
    }

    /// Invoke a method against a live server-side object.
    pub fn call_method(&self, rank: usize, name: &str, payload: Vec<u8>, blobs: Vec<Vec<u8>>) -> Result<Message> {
        self.transport.send(rank, Tag::Consumer, &Message::mem_fn(name, payload).with_blobs(blobs))?;
        self.transport.receive_from(rank, Tag::Producer)
    }

    /// Ask `rank` to construct a server-side object of `class_id`, returning
    /// its object id with an initial refcount of 1.
    pub fn create(&mut self, rank: usize, class_id: u8, payload: Vec<u8>) -> Result<u64> {
        self.transport.send(rank, Tag::Consumer, &Message::create(class_id, payload))?;
        let resp = self.transport.receive_from(rank, Tag::Producer)?;
        let mut r = wire::Reader::new(&resp.payload);
        let object_id = r.read_u64()?;
        self.refcounts.insert((rank, object_id), 1);
        Ok(object_id)
    }

    /// A new local handle to an already-created remote object.
    pub fn retain(&mut self, rank: usize, object_id: u64) {
        *self.refcounts.entry((rank, object_id)).or_insert(0) += 1;
    }

    /// Drop a local handle; when the last one goes away and `owning` is
    /// true, send `destroy`.
    pub fn release(&mut self, rank: usize, object_id: u64, owning: bool) -> Result<()> {
        let key = (rank, object_id);
        let remaining = match self.refcounts.get_mut(&key) {
            Some(count) if *count > 0 => {
                *count -= 1;
                *count
            }
            _ => return Err(RpcError::UnknownCallable(format!("release: no handle for ({rank}, {object_id})")).into()),
        };
        if remaining == 0 {
            self.refcounts.remove(&key);
            if owning {
                self.transport.send(rank, Tag::Consumer, &Message::destroy(object_id))?;
            }
        }
        Ok(())
    }

    /// Terminate `rank`'s serve loop as seen from this peer.
    pub fn finish(&self, rank: usize) -> Result<()> {
        self.transport.send(rank, Tag::Consumer, &Message::finish())
    }
}

/// Server side: the live-object table and the poll-one-message primitive a
/// serve loop (`Index::serve`) is built on.
pub struct RpcServer<T: Transport> {
    transport: T,
    live: Vec<Option<LiveObject>>,
    finished: HashSet<usize>,
}

impl<T: Transport> RpcServer<T> {
    pub fn new(transport: T) -> Self {
        RpcServer { transport, live: Vec::new(), finished: HashSet::new() }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn finished_peers(&self) -> &HashSet<usize> {
        &self.finished
    }

    /// Block until a message arrives (tagged `Consumer`) from any peer and
    /// translate it into an [`Inbound`] for the caller to act on.
    pub fn receive_one(&mut self) -> Result<Inbound> {
        let (from, msg) = self.transport.receive_any(Tag::Consumer)?;
        Ok(match msg.opcode {
            Opcode::Finish => Inbound::Finish { from },
            Opcode::Create => {
                let mut r = wire::Reader::new(&msg.payload);
                let class_id = r.read_u8()?;
                let payload = r.read_bytes()?.to_vec();
                Inbound::Create { from, class_id, payload }
            }
            Opcode::Destroy => {
                let mut r = wire::Reader::new(&msg.payload);
                let object_id = r.read_u64()?;
                Inbound::Destroy { from, object_id }
            }
            Opcode::Function => Inbound::Call { from, mem_fn: false, callable: msg.callable, payload: msg.payload, blobs: msg.blobs },
            Opcode::MemFn => Inbound::Call { from, mem_fn: true, callable: msg.callable, payload: msg.payload, blobs: msg.blobs },
        })
    }

    pub fn has_pending(&self) -> bool {
        self.transport.has_pending(Tag::Consumer)
    }

    pub fn mark_finished(&mut self, from: usize) {
        self.finished.insert(from);
    }

    /// Insert a new live object, returning its object id.
    pub fn register(&mut self, class_id: u8, token: Option<Token>) -> u64 {
        let slot = self.live.iter().position(Option::is_none);
        let id = slot.unwrap_or(self.live.len());
        let entry = Some(LiveObject { class_id, token });
        match slot {
            Some(i) => self.live[i] = entry,
            None => self.live.push(entry),
        }
        id as u64
    }

    pub fn unregister(&mut self, object_id: u64) {
        if let Some(slot) = self.live.get_mut(object_id as usize) {
            *slot = None;
        }
    }

    pub fn respond_create(&self, to: usize, object_id: u64) -> Result<()> {
        let mut w = wire::Writer::new();
        w.write_u64(object_id);
        self.transport.send(to, Tag::Producer, &Message { opcode: Opcode::Create, callable: String::new(), payload: w.finish(), blobs: Vec::new() })
    }

    pub fn respond(&self, to: usize, callable: &str, payload: Vec<u8>, blobs: Vec<Vec<u8>>) -> Result<()> {
        self.transport.send(to, Tag::Producer, &Message::function(callable, payload).with_blobs(blobs))
    }

    /// Termination: every peer sends `finish`, then a local barrier.
    pub fn run_until_finished(&mut self, peers: usize, mut handle: impl FnMut(&mut Self, Inbound) -> Result<()>) -> Result<()> {
        while self.finished.len() < peers {
            let inbound = self.receive_one()?;
            handle(self, inbound)?;
        }
        self.transport.barrier();
        Ok(())
    }
}
