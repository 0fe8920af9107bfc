// src/capability/envelope.rs
//! Message envelopes
//!
//! An envelope is constructed (sealed) before it reaches any mailbox, so a
//! capability violation is reported at construction, never as a delivery
//! failure.

use crate::capability::identity::AgentId;
use crate::capability::tags::{CapabilityTag, Transferable};
use crate::utils::errors::{Result, RuntimeError};

/// `{payload, capability tag, sender identity, sequence number}`
#[derive(Debug)]
pub struct Envelope<M> {
    /// Message body
    payload: M,

    /// Tag captured when the envelope was sealed
    capability: CapabilityTag,

    /// Sending agent, `None` for sends from outside the runtime
    sender: Option<AgentId>,

    /// Mailbox-assigned sequence number (0 until enqueued)
    seq: u64,
}

impl<M: Transferable> Envelope<M> {
    /// Validate the payload's capability and wrap it
    pub fn seal(payload: M, sender: Option<AgentId>) -> Result<Self> {
        Self::try_seal(payload, sender).map_err(|payload| {
            RuntimeError::CapabilityViolation(format!(
                "{} value cannot leave its owning agent",
                payload.capability()
            ))
        })
    }

    /// Like [`Envelope::seal`], but hands the payload back on violation
    pub fn try_seal(payload: M, sender: Option<AgentId>) -> std::result::Result<Self, M> {
        let capability = payload.capability();
        if !capability.is_transferable() {
            return Err(payload);
        }

        Ok(Self {
            payload,
            capability,
            sender,
            seq: 0,
        })
    }
}

impl<M> Envelope<M> {
    pub fn payload(&self) -> &M {
        &self.payload
    }

    pub fn into_payload(self) -> M {
        self.payload
    }

    pub fn capability(&self) -> CapabilityTag {
        self.capability
    }

    pub fn sender(&self) -> Option<AgentId> {
        self.sender
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn stamp(&mut self, seq: u64) {
        self.seq = seq;
    }
}
