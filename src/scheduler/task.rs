// src/scheduler/task.rs
//! Schedulable agent tasks
//!
//! A [`Task`] owns an agent's behavior by value. Exactly one place holds it
//! at any time: a run queue, a worker that is running it, or the agent's
//! parked slot while it waits. The header's state machine decides which.
//!
//! ```text
//!            wake                  pop
//!   IDLE ───────────► SCHEDULED ─────────► RUNNING ──── Done ───► DONE
//!    ▲                    ▲                 │   │
//!    │ Wait               │ Yield / notified│   │ wake while running
//!    └────────────────────┴─────────────────┘   ▼
//!                                            NOTIFIED
//! ```

use crate::capability::AgentId;
use crate::scheduler::work_stealing::SchedulerShared;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const NOTIFIED: u8 = 3;
const DONE: u8 = 4;

/// A boxed, type-erased agent turn
pub(crate) type Task = Box<dyn Runnable>;

/// What a task asks for at the end of its turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// Re-queue behind other work
    Yield,

    /// Suspend until woken
    Wait,

    /// Finished; drop the task
    Done,
}

/// Measurements from one scheduling turn
#[derive(Debug, Clone, Copy)]
pub(crate) struct TurnReport {
    pub outcome: RunOutcome,

    /// Messages dequeued during the turn
    pub messages: usize,
}

/// One agent's resumable computation, erased over its message type
pub(crate) trait Runnable: Send {
    fn header(&self) -> &Arc<AgentHeader>;

    /// Run one turn of at most `quantum` resumes
    fn run(&mut self, quantum: usize) -> TurnReport;
}

/// Agent lifecycle state, as seen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Suspended, waiting for a message, timer or resolution
    Waiting,

    /// Sitting in a run queue
    Scheduled,

    /// Executing on a worker
    Running,

    /// Finished or terminated
    Done,
}

/// Shared, identity-level part of an agent
///
/// Everything here is safe to touch from any thread; the behavior itself is
/// only ever reachable through the owned [`Task`].
pub(crate) struct AgentHeader {
    id: AgentId,

    state: AtomicU8,

    /// Task storage while the agent waits
    parked: Mutex<Option<Task>>,

    /// Terminate requested; drain and finish
    terminating: AtomicBool,

    scheduler: Weak<SchedulerShared>,
}

impl AgentHeader {
    /// New header in the SCHEDULED state; the caller must enqueue the task
    pub(crate) fn new(id: AgentId, scheduler: Weak<SchedulerShared>) -> Self {
        Self {
            id,
            state: AtomicU8::new(SCHEDULED),
            parked: Mutex::new(None),
            terminating: AtomicBool::new(false),
            scheduler,
        }
    }

    pub(crate) fn id(&self) -> AgentId {
        self.id
    }

    pub(crate) fn state(&self) -> AgentState {
        match self.state.load(Ordering::Acquire) {
            IDLE => AgentState::Waiting,
            SCHEDULED => AgentState::Scheduled,
            RUNNING | NOTIFIED => AgentState::Running,
            _ => AgentState::Done,
        }
    }

    pub(crate) fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    pub(crate) fn request_termination(&self) -> bool {
        !self.terminating.swap(true, Ordering::AcqRel)
    }

    /// Make the agent runnable if it is waiting
    pub(crate) fn wake(&self) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                IDLE => SCHEDULED,
                RUNNING => NOTIFIED,
                _ => return,
            };

            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) if next == SCHEDULED => {
                    // IDLE is only published after the task is parked.
                    let parked = self.parked.lock().take();
                    if let Some(task) = parked {
                        trace!("Waking {}", self.id);
                        match self.scheduler.upgrade() {
                            Some(scheduler) => scheduler.schedule(task),
                            None => self.state.store(DONE, Ordering::Release),
                        }
                    }
                    return;
                }
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// SCHEDULED -> RUNNING, when a worker picks the task up
    pub(crate) fn begin_run(&self) -> bool {
        self.state
            .compare_exchange(SCHEDULED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// RUNNING/NOTIFIED -> SCHEDULED, before re-queueing; false once DONE
    pub(crate) fn reschedule(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        while current == RUNNING || current == NOTIFIED {
            match self.state.compare_exchange(
                current,
                SCHEDULED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Suspend `task`; hands it back if a wake raced with the turn
    pub(crate) fn suspend(&self, task: Task) -> Option<Task> {
        *self.parked.lock() = Some(task);

        match self
            .state
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => None,
            Err(NOTIFIED) => {
                // Nobody else touches the slot in this state.
                self.state.store(SCHEDULED, Ordering::Release);
                self.parked.lock().take()
            }
            Err(_) => {
                // Finished from outside while running.
                let stale = self.parked.lock().take();
                drop(stale);
                None
            }
        }
    }

    pub(crate) fn finish(&self) {
        self.state.store(DONE, Ordering::Release);
        self.parked.lock().take();
    }
}

impl fmt::Debug for AgentHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentHeader")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("terminating", &self.is_terminating())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop {
        header: Arc<AgentHeader>,
    }

    impl Runnable for Noop {
        fn header(&self) -> &Arc<AgentHeader> {
            &self.header
        }

        fn run(&mut self, _quantum: usize) -> TurnReport {
            TurnReport {
                outcome: RunOutcome::Done,
                messages: 0,
            }
        }
    }

    fn header() -> Arc<AgentHeader> {
        Arc::new(AgentHeader::new(AgentId::next(), Weak::new()))
    }

    #[test]
    fn test_suspend_without_wake_parks() {
        let header = header();
        assert!(header.begin_run());
        assert_eq!(header.state(), AgentState::Running);

        let task: Task = Box::new(Noop {
            header: Arc::clone(&header),
        });
        assert!(header.suspend(task).is_none());
        assert_eq!(header.state(), AgentState::Waiting);
    }

    #[test]
    fn test_wake_while_running_returns_task() {
        let header = header();
        assert!(header.begin_run());
        header.wake();

        let task: Task = Box::new(Noop {
            header: Arc::clone(&header),
        });
        let returned = header.suspend(task);
        assert!(returned.is_some());
        assert_eq!(header.state(), AgentState::Scheduled);
    }

    #[test]
    fn test_wake_is_ignored_when_scheduled_or_done() {
        let header = header();
        header.wake();
        assert_eq!(header.state(), AgentState::Scheduled);

        header.finish();
        header.wake();
        assert_eq!(header.state(), AgentState::Done);
        assert!(!header.begin_run());
    }

    #[test]
    fn test_finish_while_running_drops_task() {
        let header = header();
        assert!(header.begin_run());
        header.finish();

        let task: Task = Box::new(Noop {
            header: Arc::clone(&header),
        });
        assert!(header.suspend(task).is_none());
        assert!(!header.reschedule());
        assert_eq!(header.state(), AgentState::Done);
    }

    #[test]
    fn test_termination_requested_once() {
        let header = header();
        assert!(header.request_termination());
        assert!(!header.request_termination());
        assert!(header.is_terminating());
    }
}
