// src/mailbox/error.rs
//! Send failures that hand the message back

use crate::utils::errors::RuntimeError;
use std::fmt;

/// A rejected send; the message is returned to the caller
///
/// For isolated payloads this returns ownership to the sender, so nothing is
/// ever dropped silently.
pub enum SendError<M> {
    /// The mailbox is at capacity
    Full { message: M, capacity: usize },

    /// The mailbox no longer accepts messages
    Closed(M),

    /// The payload's capability forbids sending it
    Forbidden(M),
}

impl<M> SendError<M> {
    /// Recover the rejected message
    pub fn into_inner(self) -> M {
        match self {
            Self::Full { message, .. } | Self::Closed(message) | Self::Forbidden(message) => {
                message
            }
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    /// Transform the carried message, keeping the failure kind
    pub fn map<N>(self, f: impl FnOnce(M) -> N) -> SendError<N> {
        match self {
            Self::Full { message, capacity } => SendError::Full {
                message: f(message),
                capacity,
            },
            Self::Closed(message) => SendError::Closed(f(message)),
            Self::Forbidden(message) => SendError::Forbidden(f(message)),
        }
    }

    /// The taxonomy error for this failure, dropping the message
    pub fn error(&self) -> RuntimeError {
        match self {
            Self::Full { capacity, .. } => RuntimeError::MailboxFull {
                capacity: *capacity,
            },
            Self::Closed(_) => RuntimeError::MailboxClosed,
            Self::Forbidden(_) => RuntimeError::CapabilityViolation(
                "mutable-local value cannot leave its owning agent".into(),
            ),
        }
    }
}

impl<M> From<SendError<M>> for RuntimeError {
    fn from(err: SendError<M>) -> Self {
        err.error()
    }
}

impl<M> fmt::Debug for SendError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full { capacity, .. } => f
                .debug_struct("Full")
                .field("capacity", capacity)
                .finish_non_exhaustive(),
            Self::Closed(_) => f.write_str("Closed(..)"),
            Self::Forbidden(_) => f.write_str("Forbidden(..)"),
        }
    }
}

impl<M> fmt::Display for SendError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error(), f)
    }
}

impl<M> std::error::Error for SendError<M> {}
