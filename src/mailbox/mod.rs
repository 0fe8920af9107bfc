// src/mailbox/mod.rs
//! Capability-aware mailboxes
//!
//! - **Mailbox**: bounded per-agent FIFO with watermark backpressure
//! - **Channel**: the same queue, not bound to an agent
//! - **Pressure**: enqueue status, watermark events and observers
//!
//! # Backpressure
//!
//! ```text
//! sender ── enqueue ──► [ ■ ■ ■ ■ ■ ■ ■ ■ · · ]  C = 10
//!                                     ▲ H = 8   → BackpressureEngaged (once)
//!                             ▲ L = 3           → Cleared (once, on the way down)
//!           len == C                            → SendError::Full (never dropped)
//! ```
//!
//! Signals are advisory: an engaged mailbox still accepts messages until it
//! is full.

pub mod bounded;
pub mod channel;
pub mod error;
pub mod pressure;

pub use bounded::Mailbox;
pub use channel::{channel, ChannelReceiver, ChannelSender};
pub use error::SendError;
pub use pressure::{EnqueueStatus, MailboxStats, PressureEvent, PressureObserver};
