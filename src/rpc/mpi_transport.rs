//! [`Transport`] over a real `mpi` communicator — the production
//! counterpart to [`super::transport::InProcessTransport`].
//!
//! A producer/consumer pair does not share MPI's `COMM_WORLD`; they talk
//! over the intercommunicator the host application's launcher already set
//! up (an MPI spawn, or a split of a shared `COMM_WORLD`). Whatever the
//! shape, anything implementing `mpi`'s [`Communicator`] +
//! [`CommunicatorCollectives`] works here; [`MpiTransport`] just adapts that
//! to the byte-oriented, opcode-tagged messages [`Message`] already defines.

use mpi::topology::{Process, Rank};
use mpi::traits::*;

use crate::error::{Result, RpcError};

use super::wire::{Message, Tag};
use super::Transport;

fn mpi_tag(tag: Tag) -> i32 {
    match tag {
        Tag::Consumer => 0,
        Tag::Producer => 1,
    }
}

/// Wraps any `mpi` communicator (an intercommunicator, or a split
/// `COMM_WORLD`) as a [`Transport`]. Cloning shares the same underlying
/// communicator handle, mirroring how [`InProcessTransport`] handles are
/// clones of one shared bus.
///
/// [`InProcessTransport`]: super::transport::InProcessTransport
#[derive(Clone)]
pub struct MpiTransport<C: Communicator + Clone> {
    comm: C,
}

impl<C: Communicator + Clone> MpiTransport<C> {
    pub fn new(comm: C) -> Self {
        MpiTransport { comm }
    }

    fn process_at(&self, rank: usize) -> Process<'_, C> {
        self.comm.process_at_rank(rank as Rank)
    }
}

impl<C: Communicator + CommunicatorCollectives + Clone> Transport for MpiTransport<C> {
    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn send(&self, dest: usize, tag: Tag, msg: &Message) -> Result<()> {
        let bytes = msg.encode();
        self.process_at(dest).send_with_tag(&bytes[..], mpi_tag(tag));
        Ok(())
    }

    fn receive_any(&self, tag: Tag) -> Result<(usize, Message)> {
        let (probed, status) = self.comm.any_process().matched_probe_with_tag(mpi_tag(tag));
        let (bytes, status): (Vec<u8>, _) = (probed, status).matched_receive_vec();
        let msg = Message::decode(&bytes)?;
        Ok((status.source_rank() as usize, msg))
    }

    fn receive_from(&self, from: usize, tag: Tag) -> Result<Message> {
        let (bytes, _status): (Vec<u8>, _) = self.process_at(from).receive_vec_with_tag(mpi_tag(tag));
        Ok(Message::decode(&bytes)?)
    }

    fn has_pending(&self, tag: Tag) -> bool {
        self.comm.any_process().immediate_probe_with_tag(mpi_tag(tag)).is_some()
    }

    fn broadcast(&self, root: usize, msg: Option<Message>) -> Result<Message> {
        // `mpi`'s `broadcast_into` needs every rank to agree on a buffer
        // length ahead of the payload itself, so the length travels first.
        let root_process = self.process_at(root);
        let is_root = self.rank() == root;

        let mut bytes = if is_root {
            msg.ok_or_else(|| RpcError::Transport("broadcast: root must supply a message".to_string()))?.encode()
        } else {
            Vec::new()
        };

        let mut len = bytes.len() as u64;
        root_process.broadcast_into(&mut len);
        if !is_root {
            bytes = vec![0u8; len as usize];
        }
        root_process.broadcast_into(&mut bytes[..]);

        Ok(Message::decode(&bytes)?)
    }

    fn barrier(&self) {
        self.comm.barrier();
    }
}
