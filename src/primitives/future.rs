// src/primitives/future.rs
//! Single-resolution futures
//!
//! [`await_future`] returns a connected [`Resolver`] / [`Awaitable`] pair.
//! The first `resolve` wins; later ones are ignored. The awaiting side can
//! be driven three ways:
//!
//! | Caller | API |
//! |---|---|
//! | agent behavior | `AgentContext::poll_await` (timer-backed deadline) |
//! | plain thread | [`Awaitable::wait`] |
//! | async task | `.await` or [`Awaitable::timeout`] |

use crate::scheduler::{block_until, Timer};
use crate::utils::clock::deadline_after;
use crate::utils::errors::{Result, RuntimeError};
use futures::task::AtomicWaker;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

enum SlotState<T> {
    Pending,
    Ready(T),
    Taken,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    waker: AtomicWaker,
}

/// Create a connected resolver / awaitable pair
pub fn await_future<T: Send + 'static>() -> (Resolver<T>, Awaitable<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::Pending),
        waker: AtomicWaker::new(),
    });

    (
        Resolver {
            slot: Arc::clone(&slot),
        },
        Awaitable {
            slot,
            deadline: None,
            timer_armed: false,
        },
    )
}

/// Completes an [`Awaitable`]; cloneable so several parties can race
pub struct Resolver<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Resolver<T> {
    /// Resolve with `value`; returns false (and drops `value`) if already
    /// resolved
    pub fn resolve(&self, value: T) -> bool {
        {
            let mut state = self.slot.state.lock();
            if !matches!(*state, SlotState::Pending) {
                return false;
            }
            *state = SlotState::Ready(value);
        }

        self.slot.waker.wake();
        true
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(*self.slot.state.lock(), SlotState::Pending)
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// The waiting side of a single-resolution slot
pub struct Awaitable<T> {
    slot: Arc<Slot<T>>,

    /// Fixed by the first timed poll
    deadline: Option<Instant>,

    timer_armed: bool,
}

impl<T> Awaitable<T> {
    /// Take the value if it is there
    pub fn try_take(&mut self) -> Option<T> {
        let mut state = self.slot.state.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Ready(value) => Some(value),
            other => {
                *state = other;
                None
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.slot.state.lock(), SlotState::Ready(_))
    }

    /// Poll without a deadline; taking twice is `ConsumedValueUse`
    pub fn poll_take(&mut self, cx: &mut Context<'_>) -> Poll<Result<T>> {
        if let Some(ready) = self.ready() {
            return Poll::Ready(ready);
        }

        self.slot.waker.register(cx.waker());

        match self.ready() {
            Some(ready) => Poll::Ready(ready),
            None => Poll::Pending,
        }
    }

    /// Poll with a deadline `timeout` after the first call
    pub(crate) fn poll_timeout(
        &mut self,
        cx: &mut Context<'_>,
        timeout: Duration,
        timer: &Timer,
    ) -> Poll<Result<T>> {
        let deadline = *self
            .deadline
            .get_or_insert_with(|| deadline_after(Instant::now(), timeout));

        if let Poll::Ready(result) = self.poll_take(cx) {
            return Poll::Ready(result);
        }

        if Instant::now() >= deadline {
            return Poll::Ready(Err(RuntimeError::AwaitTimeout(timeout)));
        }

        if !self.timer_armed {
            timer.register(deadline, cx.waker().clone());
            self.timer_armed = true;
        }
        Poll::Pending
    }

    /// Block the calling thread until resolved or `timeout` passes
    ///
    /// Not for worker threads; behaviors use `AgentContext::poll_await`.
    pub fn wait(&mut self, timeout: Duration) -> Result<T> {
        let deadline = deadline_after(Instant::now(), timeout);
        block_until(Some(deadline), |cx| self.poll_take(cx))
            .unwrap_or(Err(RuntimeError::AwaitTimeout(timeout)))
    }

    /// Await with a timeout from async code
    pub async fn timeout(self, timeout: Duration) -> Result<T> {
        tokio::time::timeout(timeout, self)
            .await
            .unwrap_or(Err(RuntimeError::AwaitTimeout(timeout)))
    }

    fn ready(&mut self) -> Option<Result<T>> {
        let mut state = self.slot.state.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Ready(value) => Some(Ok(value)),
            SlotState::Taken => Some(Err(RuntimeError::ConsumedValueUse)),
            SlotState::Pending => {
                *state = SlotState::Pending;
                None
            }
        }
    }
}

impl<T> Future for Awaitable<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().poll_take(cx)
    }
}

impl<T> fmt::Debug for Awaitable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Awaitable")
            .field("resolved", &self.is_resolved())
            .field("deadline", &self.deadline)
            .finish()
    }
}
