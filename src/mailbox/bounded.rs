// src/mailbox/bounded.rs
//! Bounded, watermark-aware mailbox
//!
//! Multi-producer, single-consumer FIFO built on a lock-free `ArrayQueue`.
//! Slots are reserved on an atomic length before the push, so the length can
//! never exceed the capacity and every watermark crossing is observed by
//! exactly one caller.
//!
//! ```text
//!   len:  0 ──── L ──────────── H ──── C
//!                ▲ cleared      ▲ engaged   (hysteresis between L and H)
//! ```

use crate::capability::Envelope;
use crate::mailbox::error::SendError;
use crate::mailbox::pressure::{EnqueueStatus, MailboxStats, PressureEvent, PressureObserver};
use crate::observability::RuntimeMetrics;
use crate::utils::config::MailboxConfig;
use crate::utils::errors::Result;
use crossbeam::queue::ArrayQueue;
use futures::task::AtomicWaker;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tracing::trace;

/// Bounded FIFO of envelopes with backpressure
pub struct Mailbox<M> {
    /// Underlying bounded queue
    queue: ArrayQueue<Envelope<M>>,

    /// Capacity and watermarks
    config: MailboxConfig,

    /// Reserved slots (pushed or about to be pushed)
    len: AtomicUsize,

    /// Backpressure currently engaged
    engaged: AtomicBool,

    /// No further enqueues accepted
    closed: AtomicBool,

    /// Next sequence number to stamp
    next_seq: AtomicU64,

    /// Consumer to wake on arrival or close
    receiver: AtomicWaker,

    observer: Option<Arc<dyn PressureObserver>>,
    metrics: Option<Arc<RuntimeMetrics>>,

    enqueued: AtomicU64,
    dequeued: AtomicU64,
    rejected: AtomicU64,
    engaged_events: AtomicU64,
    cleared_events: AtomicU64,
}

impl<M> Mailbox<M> {
    /// Create a mailbox; fails unless `L < H <= C`
    pub fn new(config: MailboxConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            queue: ArrayQueue::new(config.capacity),
            config,
            len: AtomicUsize::new(0),
            engaged: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            next_seq: AtomicU64::new(1),
            receiver: AtomicWaker::new(),
            observer: None,
            metrics: None,
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            engaged_events: AtomicU64::new(0),
            cleared_events: AtomicU64::new(0),
        })
    }

    /// Report watermark crossings to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn PressureObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub(crate) fn with_metrics(mut self, metrics: Arc<RuntimeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Append an envelope
    ///
    /// Returns the message inside [`SendError`] when the mailbox is full or
    /// closed.
    pub fn enqueue(
        &self,
        mut envelope: Envelope<M>,
    ) -> std::result::Result<EnqueueStatus, SendError<Envelope<M>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed(envelope));
        }

        let capacity = self.config.capacity;
        let reserved = self
            .len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < capacity).then_some(len + 1)
            });

        let new_len = match reserved {
            Ok(prev) => prev + 1,
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.record_rejected_send();
                }
                trace!("Mailbox full at capacity {}", capacity);
                return Err(SendError::Full {
                    message: envelope,
                    capacity,
                });
            }
        };

        envelope.stamp(self.next_seq.fetch_add(1, Ordering::Relaxed));

        // The reservation guarantees a free slot.
        if let Err(envelope) = self.queue.push(envelope) {
            self.len.fetch_sub(1, Ordering::AcqRel);
            return Err(SendError::Full {
                message: envelope,
                capacity,
            });
        }

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_send();
        }

        let status = if new_len >= self.config.high_watermark
            && self
                .engaged
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.engaged_events.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.record_high_watermark();
            }
            self.notify(PressureEvent::Engaged { len: new_len });
            EnqueueStatus::BackpressureEngaged
        } else if self.engaged.load(Ordering::Acquire) {
            EnqueueStatus::Backpressured
        } else {
            EnqueueStatus::Accepted
        };

        self.receiver.wake();
        Ok(status)
    }

    /// Remove the head envelope, if any
    pub fn dequeue(&self) -> Option<Envelope<M>> {
        let envelope = self.queue.pop()?;
        let new_len = self.len.fetch_sub(1, Ordering::AcqRel) - 1;

        self.dequeued.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_receive();
        }

        if new_len <= self.config.low_watermark
            && self
                .engaged
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.cleared_events.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.record_cleared();
            }
            self.notify(PressureEvent::Cleared { len: new_len });
        }

        Some(envelope)
    }

    /// Dequeue, or register `cx`'s waker for the next arrival
    ///
    /// `Ready(None)` once the mailbox is closed and drained.
    pub fn poll_dequeue(&self, cx: &mut Context<'_>) -> Poll<Option<Envelope<M>>> {
        if let Some(envelope) = self.dequeue() {
            return Poll::Ready(Some(envelope));
        }

        self.receiver.register(cx.waker());

        match self.dequeue() {
            Some(envelope) => Poll::Ready(Some(envelope)),
            None if self.is_drained() => Poll::Ready(None),
            None => Poll::Pending,
        }
    }

    /// Register the consumer's waker without dequeuing
    pub(crate) fn register_receiver(&self, waker: &Waker) {
        self.receiver.register(waker);
    }

    /// Stop accepting enqueues; queued messages stay deliverable
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            trace!("Mailbox closed with {} queued", self.len());
        }
        self.receiver.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closed and empty
    pub fn is_drained(&self) -> bool {
        self.is_closed() && self.len() == 0
    }

    pub fn is_backpressured(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn config(&self) -> MailboxConfig {
        self.config
    }

    /// Get mailbox statistics
    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            engaged_events: self.engaged_events.load(Ordering::Relaxed),
            cleared_events: self.cleared_events.load(Ordering::Relaxed),
            current_len: self.len(),
            capacity: self.config.capacity,
        }
    }

    fn notify(&self, event: PressureEvent) {
        if let Some(observer) = &self.observer {
            observer.on_pressure(event);
        }
    }
}
