// src/scheduler/timer.rs
//! Deadline wakeups for suspended agents
//!
//! One background thread sleeps until the earliest registered deadline and
//! fires its waker. Wakes are idempotent on the agent side, so an entry that
//! outlives the wait it was registered for is harmless.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::task::Waker;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, warn};

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    waker: Waker,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed: BinaryHeap is a max-heap, we want the earliest deadline.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    seq: u64,
    shutdown: bool,
}

#[derive(Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

/// Background deadline service
pub(crate) struct Timer {
    shared: Arc<TimerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(TimerShared::default()),
            handle: Mutex::new(None),
        }
    }

    pub(crate) fn start(&self) -> std::io::Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        *handle = Some(
            std::thread::Builder::new()
                .name("agent-weave-timer".into())
                .spawn(move || run_timer(shared))?,
        );
        Ok(())
    }

    /// Wake `waker` once `deadline` has passed
    pub(crate) fn register(&self, deadline: Instant, waker: Waker) {
        if deadline <= Instant::now() {
            waker.wake();
            return;
        }

        let mut state = self.shared.state.lock();
        if state.shutdown {
            drop(state);
            waker.wake();
            return;
        }

        state.seq += 1;
        let seq = state.seq;
        let earliest = state
            .heap
            .peek()
            .map_or(true, |head| deadline < head.deadline);
        state.heap.push(TimerEntry {
            deadline,
            seq,
            waker,
        });
        drop(state);

        if earliest {
            self.shared.condvar.notify_one();
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    /// Stop the thread; pending wakers fire so nobody sleeps forever
    pub(crate) fn shutdown(&self) {
        self.shared.state.lock().shutdown = true;
        self.shared.condvar.notify_all();

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Timer thread panicked");
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_timer(shared: Arc<TimerShared>) {
    debug!("Timer thread started");
    let mut state = shared.state.lock();

    loop {
        let now = Instant::now();
        let mut due = Vec::new();
        while state
            .heap
            .peek()
            .is_some_and(|head| state.shutdown || head.deadline <= now)
        {
            if let Some(entry) = state.heap.pop() {
                due.push(entry.waker);
            }
        }

        if !due.is_empty() {
            // Fire outside the lock; wakers may schedule agents.
            drop(state);
            for waker in due {
                waker.wake();
            }
            state = shared.state.lock();
            continue;
        }

        if state.shutdown {
            break;
        }

        match state.heap.peek().map(|head| head.deadline) {
            Some(deadline) => {
                shared.condvar.wait_until(&mut state, deadline);
            }
            None => shared.condvar.wait(&mut state),
        }
    }

    debug!("Timer thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::task::Wake;
    use std::time::Duration;

    struct CountWaker(AtomicUsize);

    impl Wake for CountWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, AtomicOrdering::SeqCst);
        }
    }

    fn counting() -> (Arc<CountWaker>, Waker) {
        let counter = Arc::new(CountWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        (counter, waker)
    }

    #[test]
    fn test_past_deadline_fires_immediately() {
        let timer = Timer::new();
        let (counter, waker) = counting();
        timer.register(Instant::now(), waker);
        assert_eq!(counter.0.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let timer = Timer::new();
        timer.start().unwrap();

        let (late, late_waker) = counting();
        let (early, early_waker) = counting();
        let now = Instant::now();
        timer.register(now + Duration::from_millis(200), late_waker);
        timer.register(now + Duration::from_millis(20), early_waker);

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(early.0.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(late.0.load(AtomicOrdering::SeqCst), 0);

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(late.0.load(AtomicOrdering::SeqCst), 1);
        timer.shutdown();
    }

    #[test]
    fn test_shutdown_fires_pending() {
        let timer = Timer::new();
        timer.start().unwrap();

        let (counter, waker) = counting();
        timer.register(Instant::now() + Duration::from_secs(60), waker);
        timer.shutdown();
        assert_eq!(counter.0.load(AtomicOrdering::SeqCst), 1);
    }
}
