// src/scheduler/waker.rs
//! Wakers for agents and blocked threads

use crate::scheduler::task::AgentHeader;
use crossbeam::sync::{Parker, Unparker};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Instant;

/// Re-schedules a suspended agent when woken
pub(crate) struct AgentWaker {
    header: Arc<AgentHeader>,
}

impl AgentWaker {
    pub(crate) fn waker(header: Arc<AgentHeader>) -> Waker {
        Waker::from(Arc::new(Self { header }))
    }
}

impl Wake for AgentWaker {
    fn wake(self: Arc<Self>) {
        self.header.wake();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.header.wake();
    }
}

/// Unparks a blocked OS thread
struct ThreadWaker(Unparker);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

/// Drive `poll` on the current thread until it is ready or `deadline` passes
///
/// Returns `None` on deadline. Used by the blocking receive/wait APIs meant
/// for threads outside the worker pool.
pub(crate) fn block_until<T>(
    deadline: Option<Instant>,
    mut poll: impl FnMut(&mut Context<'_>) -> Poll<T>,
) -> Option<T> {
    let parker = Parker::new();
    let waker = Waker::from(Arc::new(ThreadWaker(parker.unparker().clone())));
    let mut cx = Context::from_waker(&waker);

    loop {
        if let Poll::Ready(value) = poll(&mut cx) {
            return Some(value);
        }

        match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return None;
                }
                parker.park_timeout(deadline - now);
            }
            None => parker.park(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_block_until_ready() {
        let mut polls = 0;
        let value = block_until(None, |cx| {
            polls += 1;
            if polls < 3 {
                cx.waker().wake_by_ref();
                Poll::Pending
            } else {
                Poll::Ready(polls)
            }
        });
        assert_eq!(value, Some(3));
    }

    #[test]
    fn test_block_until_deadline() {
        let deadline = Instant::now() + Duration::from_millis(20);
        let value: Option<()> = block_until(Some(deadline), |_| Poll::Pending);
        assert!(value.is_none());
        assert!(Instant::now() >= deadline);
    }
}
