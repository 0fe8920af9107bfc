// src/mailbox/pressure.rs
//! Watermark backpressure signals

use std::fmt;

/// Outcome of an accepted enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueStatus {
    /// Accepted, backpressure not engaged
    Accepted,

    /// Accepted, and this send pushed the length up to the high watermark
    BackpressureEngaged,

    /// Accepted while backpressure is still engaged
    Backpressured,
}

impl EnqueueStatus {
    /// Whether the sender should slow down
    #[inline]
    pub fn is_backpressured(self) -> bool {
        !matches!(self, Self::Accepted)
    }
}

/// Watermark crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureEvent {
    /// Length rose to the high watermark
    Engaged { len: usize },

    /// Length fell to the low watermark while engaged
    Cleared { len: usize },
}

/// Receives watermark crossings as they happen
///
/// Called on the enqueueing or dequeueing thread; keep it cheap.
pub trait PressureObserver: Send + Sync {
    fn on_pressure(&self, event: PressureEvent);
}

impl<F> PressureObserver for F
where
    F: Fn(PressureEvent) + Send + Sync,
{
    fn on_pressure(&self, event: PressureEvent) {
        self(event)
    }
}

/// Mailbox statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxStats {
    /// Total messages accepted
    pub enqueued: u64,

    /// Total messages delivered
    pub dequeued: u64,

    /// Sends rejected because the mailbox was full
    pub rejected: u64,

    /// Upward crossings of the high watermark
    pub engaged_events: u64,

    /// Downward crossings of the low watermark
    pub cleared_events: u64,

    /// Current length
    pub current_len: usize,

    pub capacity: usize,
}

impl MailboxStats {
    /// Calculate fill percentage
    pub fn fill_percentage(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            (self.current_len as f64 / self.capacity as f64) * 100.0
        }
    }
}

impl fmt::Display for MailboxStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} queued, {} in, {} out, {} rejected",
            self.current_len, self.capacity, self.enqueued, self.dequeued, self.rejected
        )
    }
}
