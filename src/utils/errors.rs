// src/utils/errors.rs
//! Error taxonomy for the runtime
//!
//! Capability violations and resource exhaustion are always returned as
//! typed values. A failing agent behavior never surfaces here directly; it is
//! captured per agent and reported to the supervisor instead.

use crate::capability::AgentId;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Runtime errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime has not been started (or has been stopped)
    #[error("Spawn rejected: runtime is not running")]
    SpawnRejected,

    /// Advisory backpressure: the mailbox is at capacity
    #[error("Mailbox full (capacity {capacity})")]
    MailboxFull { capacity: usize },

    /// The target mailbox no longer accepts messages
    #[error("Mailbox closed")]
    MailboxClosed,

    /// An isolated value was used after ownership moved away
    #[error("Isolated value already consumed")]
    ConsumedValueUse,

    /// A value's capability forbids the attempted transfer
    #[error("Capability violation: {0}")]
    CapabilityViolation(String),

    #[error("Await timed out after {0:?}")]
    AwaitTimeout(Duration),

    /// Fewer than `threshold` affirmations arrived before the deadline
    #[error("Quorum failed: {affirmed}/{threshold} affirmations")]
    QuorumFailure { affirmed: usize, threshold: usize },

    /// A live lease already exists for the key
    #[error("Lease conflict on '{key}' (held by {holder})")]
    LeaseConflict { key: String, holder: AgentId },

    #[error("No shard available: shard list is empty")]
    ShardUnavailable,

    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    /// Reported for an agent whose behavior returned an error or panicked
    #[error("Agent failed: {0}")]
    AgentFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RuntimeError {
    /// Whether the caller can sensibly retry or redirect
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MailboxFull { .. }
                | Self::MailboxClosed
                | Self::AwaitTimeout(_)
                | Self::QuorumFailure { .. }
                | Self::LeaseConflict { .. }
        )
    }
}

impl From<config::ConfigError> for RuntimeError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}
