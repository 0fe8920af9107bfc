// src/observability/metrics.rs
//! Runtime counters
//!
//! Every counter is a relaxed atomic; increments are also forwarded to the
//! `metrics` facade under `agent_weave_*` names.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared runtime counters
#[derive(Debug)]
pub struct RuntimeMetrics {
    spawned: AtomicU64,
    terminated: AtomicU64,
    failed: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    rejected_sends: AtomicU64,
    steals: AtomicU64,
    stolen_tasks: AtomicU64,
    high_watermark_events: AtomicU64,
    cleared_events: AtomicU64,

    /// Completed scheduling turns, indexed by worker
    worker_turns: Vec<AtomicU64>,
}

impl RuntimeMetrics {
    pub fn new(workers: usize) -> Self {
        Self {
            spawned: AtomicU64::new(0),
            terminated: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            rejected_sends: AtomicU64::new(0),
            steals: AtomicU64::new(0),
            stolen_tasks: AtomicU64::new(0),
            high_watermark_events: AtomicU64::new(0),
            cleared_events: AtomicU64::new(0),
            worker_turns: (0..workers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub(crate) fn record_spawn(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("agent_weave_spawned_total").increment(1);
    }

    pub(crate) fn record_termination(&self) {
        self.terminated.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("agent_weave_terminated_total").increment(1);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("agent_weave_failed_total").increment(1);
    }

    pub(crate) fn record_send(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("agent_weave_messages_sent_total").increment(1);
    }

    pub(crate) fn record_receive(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("agent_weave_messages_received_total").increment(1);
    }

    pub(crate) fn record_rejected_send(&self) {
        self.rejected_sends.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("agent_weave_rejected_sends_total").increment(1);
    }

    pub(crate) fn record_steal(&self, tasks: usize) {
        self.steals.fetch_add(1, Ordering::Relaxed);
        self.stolen_tasks.fetch_add(tasks as u64, Ordering::Relaxed);
        ::metrics::counter!("agent_weave_steals_total").increment(1);
        ::metrics::counter!("agent_weave_stolen_tasks_total").increment(tasks as u64);
    }

    pub(crate) fn record_high_watermark(&self) {
        self.high_watermark_events.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("agent_weave_mailbox_high_watermark_total").increment(1);
    }

    pub(crate) fn record_cleared(&self) {
        self.cleared_events.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("agent_weave_mailbox_cleared_total").increment(1);
    }

    pub(crate) fn record_turn(&self, worker: usize) {
        if let Some(turns) = self.worker_turns.get(worker) {
            turns.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Completed turns for one worker
    pub fn worker_turns(&self, worker: usize) -> u64 {
        self.worker_turns
            .get(worker)
            .map(|t| t.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            spawned: self.spawned.load(Ordering::Relaxed),
            terminated: self.terminated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            rejected_sends: self.rejected_sends.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            stolen_tasks: self.stolen_tasks.load(Ordering::Relaxed),
            high_watermark_events: self.high_watermark_events.load(Ordering::Relaxed),
            cleared_events: self.cleared_events.load(Ordering::Relaxed),
            worker_turns: self
                .worker_turns
                .iter()
                .map(|t| t.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

/// Read-only view of [`RuntimeMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub spawned: u64,
    pub terminated: u64,
    pub failed: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub rejected_sends: u64,
    pub steals: u64,
    pub stolen_tasks: u64,
    pub high_watermark_events: u64,
    pub cleared_events: u64,
    pub worker_turns: Vec<u64>,
}

impl MetricsSnapshot {
    /// Messages accepted but not yet dequeued
    pub fn in_flight(&self) -> u64 {
        self.messages_sent.saturating_sub(self.messages_received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = RuntimeMetrics::new(2);
        metrics.record_spawn();
        metrics.record_send();
        metrics.record_send();
        metrics.record_receive();
        metrics.record_steal(3);
        metrics.record_turn(1);
        metrics.record_turn(7);

        let snap = metrics.snapshot();
        assert_eq!(snap.spawned, 1);
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.in_flight(), 1);
        assert_eq!(snap.steals, 1);
        assert_eq!(snap.stolen_tasks, 3);
        assert_eq!(snap.worker_turns, vec![0, 1]);
        assert_eq!(metrics.worker_turns(7), 0);
    }
}
