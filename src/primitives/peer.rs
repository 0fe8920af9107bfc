// src/primitives/peer.rs
//! Abstract participants for the coordination primitives
//!
//! Quorum and broadcast never talk to a transport directly. They deliver to
//! anything implementing [`Peer`]: a local [`AgentHandle`] out of the box, or
//! a network proxy supplied by the embedding application.

use crate::capability::{AgentId, Transferable};
use crate::supervisor::AgentHandle;
use crate::utils::errors::Result;

/// A deliverable participant in a coordination round
pub trait Peer<T>: Send + Sync {
    fn peer_id(&self) -> AgentId;

    /// Hand `message` to the participant; on failure the message is dropped
    fn deliver(&self, message: T) -> Result<()>;
}

/// Local agents accept any message their own message type converts from
impl<M, T> Peer<T> for AgentHandle<M>
where
    M: Transferable + From<T>,
{
    fn peer_id(&self) -> AgentId {
        self.id()
    }

    fn deliver(&self, message: T) -> Result<()> {
        self.signal(M::from(message))
            .map(|_| ())
            .map_err(|err| err.error())
    }
}

impl<T, P: Peer<T> + ?Sized> Peer<T> for &P {
    fn peer_id(&self) -> AgentId {
        (**self).peer_id()
    }

    fn deliver(&self, message: T) -> Result<()> {
        (**self).deliver(message)
    }
}
