//! `Transport` — the abstraction the message protocol is built on top of.
//!
//! Production code drives this trait over a real `mpi` communicator or
//! intercommunicator; tests drive it over [`InProcessTransport`], which
//! simulates N ranks inside a single OS thread (a "shared ranks"
//! configuration, first-class rather than just a test shim).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{Result, RpcError};

use super::wire::{Message, Tag};

/// Send/receive/collective primitives the RPC substrate needs from its
/// underlying communicator.
pub trait Transport {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Send `msg` to `dest`, tagged `tag`.
    fn send(&self, dest: usize, tag: Tag, msg: &Message) -> Result<()>;

    /// Block until a message tagged `tag` arrives from any rank; returns the
    /// sender's rank alongside the message.
    fn receive_any(&self, tag: Tag) -> Result<(usize, Message)>;

    /// Block until a message tagged `tag` arrives specifically from `from`.
    fn receive_from(&self, from: usize, tag: Tag) -> Result<Message>;

    /// Whether a message tagged `tag` is available from any rank without
    /// blocking (used by a serve loop to poll several intercommunicators in
    /// turn).
    fn has_pending(&self, tag: Tag) -> bool;

    /// Root-rank broadcast: on the root, `msg` is sent to every rank and
    /// also returned; on a non-root rank, the argument is ignored and the
    /// broadcast value is received and returned.
    fn broadcast(&self, root: usize, msg: Option<Message>) -> Result<Message>;

    /// Collective barrier.
    fn barrier(&self);
}

struct Inbox {
    /// One queue per `(rank, Tag)` pair, indexed `[rank][tag_index]`.
    queues: Vec<[VecDeque<(usize, Message)>; 2]>,
}

fn tag_index(tag: Tag) -> usize {
    match tag {
        Tag::Consumer => 0,
        Tag::Producer => 1,
    }
}

/// A shared bus connecting every [`InProcessTransport`] handle created from
/// the same [`InProcessBus::new`] call.
#[derive(Clone)]
pub struct InProcessBus {
    inbox: Rc<RefCell<Inbox>>,
    size: usize,
}

impl InProcessBus {
    /// Build a bus for `size` simulated ranks, and a [`InProcessTransport`]
    /// handle for each one.
    pub fn new(size: usize) -> Vec<InProcessTransport> {
        let inbox = Rc::new(RefCell::new(Inbox {
            queues: (0..size).map(|_| [VecDeque::new(), VecDeque::new()]).collect(),
        }));
        let bus = InProcessBus { inbox, size };
        (0..size).map(|rank| InProcessTransport { bus: bus.clone(), rank }).collect()
    }
}

/// One rank's handle onto an [`InProcessBus`].
#[derive(Clone)]
pub struct InProcessTransport {
    bus: InProcessBus,
    rank: usize,
}

impl Transport for InProcessTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.bus.size
    }

    fn send(&self, dest: usize, tag: Tag, msg: &Message) -> Result<()> {
        if dest >= self.bus.size {
            return Err(RpcError::Transport(format!("send: no such rank {dest}")).into());
        }
        self.bus.inbox.borrow_mut().queues[dest][tag_index(tag)].push_back((self.rank, msg.clone()));
        Ok(())
    }

    fn receive_any(&self, tag: Tag) -> Result<(usize, Message)> {
        self.bus.inbox.borrow_mut().queues[self.rank][tag_index(tag)]
            .pop_front()
            .ok_or_else(|| RpcError::Transport("receive_any: no pending message (in-process transport never blocks)".into()).into())
    }

    fn receive_from(&self, from: usize, tag: Tag) -> Result<Message> {
        let mut inbox = self.bus.inbox.borrow_mut();
        let queue = &mut inbox.queues[self.rank][tag_index(tag)];
        let pos = queue
            .iter()
            .position(|(sender, _)| *sender == from)
            .ok_or_else(|| RpcError::Transport(format!("receive_from: no pending message from {from}")))?;
        Ok(queue.remove(pos).unwrap().1)
    }

    fn has_pending(&self, tag: Tag) -> bool {
        !self.bus.inbox.borrow().queues[self.rank][tag_index(tag)].is_empty()
    }

    fn broadcast(&self, root: usize, msg: Option<Message>) -> Result<Message> {
        if self.rank == root {
            let msg = msg.ok_or_else(|| RpcError::Transport("broadcast: root must supply a message".into()))?;
            for dest in 0..self.bus.size {
                if dest != root {
                    self.send(dest, Tag::Producer, &msg)?;
                }
            }
            Ok(msg)
        } else {
            self.receive_from(root, Tag::Producer)
        }
    }

    fn barrier(&self) {
        // Single-threaded simulated ranks execute strictly in turn, so every
        // participant reaching this call has already completed its share of
        // work; nothing to synchronize.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::wire::Message;

    #[test]
    fn send_then_receive_from_delivers_in_order() {
        let ranks = InProcessBus::new(2);
        ranks[0].send(1, Tag::Consumer, &Message::function("ping", vec![])).unwrap();
        let got = ranks[1].receive_from(0, Tag::Consumer).unwrap();
        assert_eq!(got.callable, "ping");
    }

    #[test]
    fn broadcast_reaches_every_non_root_rank() {
        let ranks = InProcessBus::new(3);
        let msg = ranks[0].broadcast(0, Some(Message::function("dims", vec![1, 2, 3]))).unwrap();
        assert_eq!(msg.callable, "dims");
        for r in &ranks[1..] {
            let got = r.broadcast(0, None).unwrap();
            assert_eq!(got.payload, vec![1, 2, 3]);
        }
    }
}
