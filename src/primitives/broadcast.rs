// src/primitives/broadcast.rs
//! Single-hop gossip fanout
//!
//! ```text
//!   broadcast(peers, payload, fanout=3)
//!        │  choose 3 of N at random
//!        ├──► peer a ── Gossip{id, payload, hops: 1}
//!        ├──► peer d ── Gossip{id, payload, hops: 1}
//!        └──► peer f ── Gossip{id, payload, hops: 1}
//!
//!   receiver: GossipDedup::observe(id) ──► first time? process and relay()
//! ```
//!
//! Only the first hop is performed here. Receivers decide whether to
//! re-propagate, using the message id to skip payloads they have seen.

use crate::capability::{AgentId, CapabilityTag, Shared, Transferable};
use crate::primitives::peer::Peer;
use crate::utils::errors::{Result, RuntimeError};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::{debug, trace};
use ulid::Ulid;

/// Deduplication key for one gossip payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(Ulid);

impl MessageId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A gossiped payload as seen by a receiver
pub struct Gossip<T> {
    pub id: MessageId,
    pub payload: Shared<T>,

    /// Hops travelled so far; 1 on first delivery
    pub hops: u32,

    /// The agent that started the broadcast, when known
    pub origin: Option<AgentId>,
}

impl<T> Gossip<T> {
    /// The same message one hop further, for re-propagation
    pub fn relay(&self) -> Self {
        Self {
            id: self.id,
            payload: self.payload.clone(),
            hops: self.hops.saturating_add(1),
            origin: self.origin,
        }
    }
}

impl<T> Clone for Gossip<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            payload: self.payload.clone(),
            hops: self.hops,
            origin: self.origin,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Gossip<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gossip")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .field("hops", &self.hops)
            .field("origin", &self.origin)
            .finish()
    }
}

impl<T: Transferable + Sync> Transferable for Gossip<T> {
    fn capability(&self) -> CapabilityTag {
        CapabilityTag::ImmutableShared
    }
}

/// What one fanout round did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastReceipt {
    pub message_id: MessageId,

    /// Peers the message was handed to
    pub targets: Vec<AgentId>,

    /// Chosen peers whose delivery failed, with the reason
    pub failures: Vec<(AgentId, RuntimeError)>,
}

impl BroadcastReceipt {
    pub fn delivered(&self) -> usize {
        self.targets.len()
    }
}

/// Send `payload` to `fanout` randomly chosen peers under a fresh id
///
/// A fanout larger than the peer set reaches every peer once. Fails with
/// `InvalidArgument` for a zero fanout.
pub fn broadcast<T, P>(peers: &[P], payload: T, fanout: usize) -> Result<BroadcastReceipt>
where
    T: Send + Sync + 'static,
    P: Peer<Gossip<T>>,
{
    let gossip = Gossip {
        id: MessageId::new(),
        payload: Shared::new(payload),
        hops: 1,
        origin: None,
    };
    broadcast_gossip(peers, gossip, fanout)
}

/// Fan out an existing gossip message, e.g. one being relayed
pub fn broadcast_gossip<T, P>(
    peers: &[P],
    gossip: Gossip<T>,
    fanout: usize,
) -> Result<BroadcastReceipt>
where
    T: Send + Sync + 'static,
    P: Peer<Gossip<T>>,
{
    if fanout == 0 {
        return Err(RuntimeError::InvalidArgument(
            "broadcast fanout must be at least 1".to_string(),
        ));
    }

    let mut rng = rand::thread_rng();
    let chosen: Vec<&P> = peers.choose_multiple(&mut rng, fanout).collect();

    let mut receipt = BroadcastReceipt {
        message_id: gossip.id,
        targets: Vec::with_capacity(chosen.len()),
        failures: Vec::new(),
    };

    for peer in chosen {
        let id = peer.peer_id();
        match peer.deliver(gossip.clone()) {
            Ok(()) => receipt.targets.push(id),
            Err(err) => {
                trace!("Gossip {} not delivered to {}: {}", gossip.id, id, err);
                receipt.failures.push((id, err));
            }
        }
    }

    debug!(
        "Gossip {} fanned out to {}/{} peers ({} failed)",
        gossip.id,
        receipt.targets.len(),
        peers.len(),
        receipt.failures.len()
    );
    Ok(receipt)
}

/// Bounded memory of recently seen message ids
///
/// When full, the oldest id is forgotten first.
#[derive(Debug)]
pub struct GossipDedup {
    seen: HashSet<MessageId>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl GossipDedup {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `id`; true the first time it is seen
    pub fn observe(&mut self, id: MessageId) -> bool {
        if self.seen.contains(&id) {
            return false;
        }

        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(id);
        self.order.push_back(id);
        true
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for GossipDedup {
    fn default() -> Self {
        Self::new(4096)
    }
}
