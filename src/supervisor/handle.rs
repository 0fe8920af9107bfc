// src/supervisor/handle.rs
//! Identity-only references to agents

use crate::capability::{AgentId, CapabilityTag, Envelope, Transferable};
use crate::mailbox::{EnqueueStatus, Mailbox, MailboxStats, SendError};
use crate::scheduler::{AgentHeader, AgentState};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, warn};

/// Address of a running agent
///
/// A handle grants the right to send to the agent and to observe its
/// lifecycle; it gives no access to the agent's state. Handles are
/// identity-only values and can be sent in messages.
pub struct AgentHandle<M> {
    id: AgentId,
    mailbox: Arc<Mailbox<M>>,
    header: Arc<AgentHeader>,
}

impl<M> AgentHandle<M> {
    pub(crate) fn new(mailbox: Arc<Mailbox<M>>, header: Arc<AgentHeader>) -> Self {
        Self {
            id: header.id(),
            mailbox,
            header,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn state(&self) -> AgentState {
        self.header.state()
    }

    pub fn is_alive(&self) -> bool {
        self.state() != AgentState::Done
    }

    /// Terminate requested or mailbox closed
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    pub fn is_backpressured(&self) -> bool {
        self.mailbox.is_backpressured()
    }

    pub fn mailbox_len(&self) -> usize {
        self.mailbox.len()
    }

    pub fn mailbox_stats(&self) -> MailboxStats {
        self.mailbox.stats()
    }
}

impl<M: Transferable> AgentHandle<M> {
    /// Enqueue `message` without a sender identity
    pub fn signal(&self, message: M) -> Result<EnqueueStatus, SendError<M>> {
        self.deliver(message, None)
    }

    /// Enqueue `message` stamped with `sender`
    pub fn signal_from(
        &self,
        sender: AgentId,
        message: M,
    ) -> Result<EnqueueStatus, SendError<M>> {
        self.deliver(message, Some(sender))
    }

    fn deliver(
        &self,
        message: M,
        sender: Option<AgentId>,
    ) -> Result<EnqueueStatus, SendError<M>> {
        let envelope = match Envelope::try_seal(message, sender) {
            Ok(envelope) => envelope,
            Err(message) => {
                warn!(
                    "Refused {} payload for {}",
                    message.capability(),
                    self.id
                );
                return Err(SendError::Forbidden(message));
            }
        };

        self.mailbox.enqueue(envelope).map_err(|err| {
            debug!("Signal to {} rejected: {}", self.id, err);
            err.map(Envelope::into_payload)
        })
    }
}

impl<M> Clone for AgentHandle<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            mailbox: Arc::clone(&self.mailbox),
            header: Arc::clone(&self.header),
        }
    }
}

impl<M> PartialEq for AgentHandle<M> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<M> Eq for AgentHandle<M> {}

impl<M> Hash for AgentHandle<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<M> fmt::Debug for AgentHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("mailbox_len", &self.mailbox.len())
            .finish()
    }
}

impl<M: Send + 'static> Transferable for AgentHandle<M> {
    fn capability(&self) -> CapabilityTag {
        CapabilityTag::IdentityOnly
    }
}
