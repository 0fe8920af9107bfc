// src/supervisor/mod.rs
//! Agent lifecycle management
//!
//! - [`Behavior`]: an agent's resumable logic, returning a [`Step`]
//! - [`AgentContext`]: mailbox, spawning and timers available to a behavior
//! - [`AgentHandle`]: identity-only address of an agent
//! - [`Supervisor`]: registry, spawn/terminate and failure handling
//! - [`FailurePolicy`]: what to do with a failed agent

pub mod agent;
pub mod handle;
pub mod policy;
#[allow(clippy::module_inception)]
pub mod supervisor;

pub use agent::{from_fn, AgentContext, Behavior, FnBehavior, Step};
pub use handle::AgentHandle;
pub use policy::{FailureAction, FailurePolicy, FailureReport, RestartPolicy, StopOnFailure};
pub use supervisor::{AgentInfo, SpawnOptions, Supervisor};
