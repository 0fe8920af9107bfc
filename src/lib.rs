// src/lib.rs
//! Agent Weave runtime library
//!
//! Schedules many lightweight message-passing agents over a fixed pool of
//! worker threads. Idle workers steal from busy ones; every value that
//! crosses between agents carries a capability tag that decides whether it
//! moves, is shared read-only, or may not leave its agent at all.
//!
//! # Architecture
//!
//! Leaves first:
//!
//! - **capability**: ownership tags, `Isolated` / `Shared` / `Local` wrappers, envelopes
//! - **mailbox**: bounded per-agent queues with watermark backpressure, channels
//! - **scheduler**: per-worker run queues, global injector, work stealing, timer
//! - **strategy**: agent profiles, forecasting, victim order and placement
//! - **supervisor**: behaviors, agent contexts, handles, failure policy
//! - **primitives**: await, quorum, shard, lease, broadcast
//! - **runtime**: the `AgentRuntime` facade
//! - **observability**: tracing setup and read-only counters
//! - **utils**: errors, configuration, clocks
//!
//! # Example
//!
//! ```no_run
//! use agent_weave::{from_fn, AgentContext, AgentRuntime, RuntimeConfig, Step};
//!
//! let runtime = AgentRuntime::new(RuntimeConfig::default())?;
//! runtime.start()?;
//!
//! let echo = runtime.spawn(from_fn(|ctx: &mut AgentContext<'_, String>| {
//!     while let Some(message) = ctx.recv_message() {
//!         println!("got {}", message);
//!     }
//!     Ok(Step::Wait)
//! }))?;
//!
//! runtime.signal(&echo, "ping".to_string())?;
//! runtime.stop();
//! # Ok::<(), agent_weave::RuntimeError>(())
//! ```

// Public module exports
pub mod capability;
pub mod mailbox;
pub mod observability;
pub mod primitives;
pub mod runtime;
pub mod scheduler;
pub mod strategy;
pub mod supervisor;
pub mod utils;

// Re-export commonly used types
pub use capability::{AgentId, CapabilityTag, Envelope, Isolated, IsolatedCell, Local, Shared, Transferable};
pub use mailbox::{channel, ChannelReceiver, ChannelSender, EnqueueStatus, Mailbox, SendError};
pub use primitives::{await_future, broadcast, quorum, shard, Awaitable, LeaseTable, Peer, Resolver};
pub use runtime::{AgentRuntime, RuntimeStats};
pub use supervisor::{from_fn, AgentContext, AgentHandle, Behavior, Step, Supervisor};
pub use utils::config::RuntimeConfig;
pub use utils::errors::{Result, RuntimeError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Runtime build information
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}
