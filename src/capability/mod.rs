// src/capability/mod.rs
//! Capability-typed values
//!
//! Every value that crosses an agent boundary carries a [`CapabilityTag`]:
//!
//! - **Isolated**: unique; ownership moves to the receiver on send
//! - **ImmutableShared**: read-only, reference counted, freely duplicated
//! - **MutableLocal**: never leaves its owning agent
//! - **IdentityOnly**: addresses an agent, grants no data access
//!
//! # Enforcement
//!
//! ```text
//! Isolated<T>      move-only type       sender binding gone at compile time
//! IsolatedCell<T>  consumed flag        ConsumedValueUse on reuse
//! Shared<T>        Arc<T>               clone bumps the reference count
//! Local<T>         !Transferable        sending one does not compile
//! Tagged<T>        runtime tag          Envelope::seal rejects MutableLocal
//! ```
//!
//! These checks are the only race-prevention mechanism for agent state; no
//! locks guard it.

pub mod envelope;
pub mod identity;
pub mod tags;
pub mod wrappers;

pub use envelope::Envelope;
pub use identity::AgentId;
pub use tags::{CapabilityTag, Transferable};
pub use wrappers::{Isolated, IsolatedCell, Local, Shared, Tagged};
