// src/primitives/mod.rs
//! Orchestration primitives
//!
//! Built on the supervisor and mailboxes:
//!
//! - [`await_future`]: single-resolution slot with a timeout
//! - [`quorum`] / [`start_quorum`]: threshold agreement over a [`Peer`] set
//! - [`shard`] / [`ShardRing`]: consistent-hash key placement
//! - [`LeaseTable`]: TTL-bounded exclusive claims
//! - [`broadcast`]: single-hop gossip fanout with [`GossipDedup`]
//!
//! `spawn`, `signal` and `channel` live on the supervisor, the agent handle
//! and the mailbox module respectively; the runtime facade exposes all of
//! them together.
//!
//! Quorum, lease and broadcast are node-local. They reach other processes
//! only through whatever [`Peer`] implementation the caller supplies.

pub mod broadcast;
pub mod future;
pub mod lease;
pub mod peer;
pub mod quorum;
pub mod shard;

pub use broadcast::{
    broadcast, broadcast_gossip, BroadcastReceipt, Gossip, GossipDedup, MessageId,
};
pub use future::{await_future, Awaitable, Resolver};
pub use lease::{Lease, LeaseTable};
pub use peer::Peer;
pub use quorum::{quorum, start_quorum, Ballot, QuorumOutcome, QuorumRound, Responder};
pub use shard::{shard, ShardRing, VNODES_PER_SHARD};
