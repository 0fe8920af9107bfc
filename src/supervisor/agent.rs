// src/supervisor/agent.rs
//! Agent behaviors and the context they run in
//!
//! A behavior is a resumable state machine. Each call to
//! [`Behavior::resume`] does a bounded amount of work and reports what it
//! needs next:
//!
//! ```text
//! resume() ──► Step::Yield ──► re-queued behind other runnable agents
//!          ──► Step::Wait  ──► parked until a message, timer or resolution
//!          ──► Step::Done  ──► mailbox closed, agent deregistered
//! ```
//!
//! Suspension is explicit: there is no hidden coroutine state. Anything the
//! behavior needs across suspensions lives in the behavior value itself.

use crate::capability::{AgentId, Envelope, Transferable};
use crate::mailbox::{EnqueueStatus, Mailbox, SendError};
use crate::primitives::Awaitable;
use crate::scheduler::AgentHeader;
use crate::supervisor::handle::AgentHandle;
use crate::supervisor::supervisor::Supervisor;
use crate::utils::clock::deadline_after;
use crate::utils::errors::Result;
use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// What a behavior wants after a resume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More work to do; give other agents a turn first
    Yield,

    /// Nothing to do until woken
    Wait,

    /// Finished
    Done,
}

/// An agent's logic
pub trait Behavior: Send + 'static {
    type Message: Transferable;

    /// Advance the agent; errors and panics are reported to the supervisor
    fn resume(&mut self, ctx: &mut AgentContext<'_, Self::Message>) -> anyhow::Result<Step>;

    /// Called once after a terminate request, when the mailbox is drained
    /// or the behavior stops waiting for it
    fn on_stop(&mut self, _ctx: &mut AgentContext<'_, Self::Message>) {}

    /// Called before resuming after a failure the policy chose to restart
    fn on_restart(&mut self) {}
}

/// Per-turn bookkeeping shared by successive resumes
#[derive(Debug)]
pub(crate) struct TurnState {
    /// Receives left this turn
    pub budget: usize,

    pub received: usize,

    /// A receive found the mailbox empty during the current resume
    pub drained: bool,

    /// A receive was refused because the budget ran out
    pub exhausted: bool,
}

impl TurnState {
    pub(crate) fn new(budget: usize) -> Self {
        Self {
            budget,
            received: 0,
            drained: false,
            exhausted: false,
        }
    }
}

/// Everything a behavior can touch while it runs
pub struct AgentContext<'a, M> {
    header: &'a Arc<AgentHeader>,
    mailbox: &'a Arc<Mailbox<M>>,
    waker: &'a Waker,
    supervisor: &'a Supervisor,
    turn: &'a mut TurnState,
}

impl<'a, M: Transferable> AgentContext<'a, M> {
    pub(crate) fn new(
        header: &'a Arc<AgentHeader>,
        mailbox: &'a Arc<Mailbox<M>>,
        waker: &'a Waker,
        supervisor: &'a Supervisor,
        turn: &'a mut TurnState,
    ) -> Self {
        Self {
            header,
            mailbox,
            waker,
            supervisor,
            turn,
        }
    }

    pub fn id(&self) -> AgentId {
        self.header.id()
    }

    /// Handle to this agent, e.g. to hand to peers
    pub fn handle(&self) -> AgentHandle<M> {
        AgentHandle::new(Arc::clone(self.mailbox), Arc::clone(self.header))
    }

    /// Next message, if one is queued and the turn's budget allows
    ///
    /// `None` does not mean the stream ended: return [`Step::Wait`] and the
    /// agent is resumed when more arrive.
    pub fn recv(&mut self) -> Option<Envelope<M>> {
        if self.turn.budget == 0 {
            self.turn.exhausted = true;
            return None;
        }

        match self.mailbox.dequeue() {
            Some(envelope) => {
                self.turn.budget -= 1;
                self.turn.received += 1;
                Some(envelope)
            }
            None => {
                self.turn.drained = true;
                None
            }
        }
    }

    /// [`recv`](Self::recv) without the envelope
    pub fn recv_message(&mut self) -> Option<M> {
        self.recv().map(Envelope::into_payload)
    }

    /// Messages waiting in the mailbox
    pub fn pending(&self) -> usize {
        self.mailbox.len()
    }

    /// A terminate was requested; drain and finish
    pub fn is_terminating(&self) -> bool {
        self.header.is_terminating()
    }

    /// Signal another agent, stamped with this agent as the sender
    pub fn signal<N: Transferable>(
        &self,
        target: &AgentHandle<N>,
        message: N,
    ) -> std::result::Result<EnqueueStatus, SendError<N>> {
        target.signal_from(self.id(), message)
    }

    /// Spawn a child agent, placed near this one when the strategy agrees
    pub fn spawn<B: Behavior>(&self, behavior: B) -> Result<AgentHandle<B::Message>> {
        self.supervisor.spawn(behavior)
    }

    /// Waker that re-schedules this agent
    pub fn waker(&self) -> &Waker {
        self.waker
    }

    /// Task context for polling futures and channels from a behavior
    pub fn task_context(&self) -> Context<'_> {
        Context::from_waker(self.waker)
    }

    /// Poll an awaitable, failing with `AwaitTimeout` once `timeout` has
    /// passed since the first poll
    pub fn poll_await<T>(
        &mut self,
        awaitable: &mut Awaitable<T>,
        timeout: Duration,
    ) -> Poll<Result<T>> {
        let mut cx = Context::from_waker(self.waker);
        awaitable.poll_timeout(&mut cx, timeout, self.supervisor.timer())
    }

    /// Resume this agent at `deadline` even if nothing else wakes it
    pub fn wake_at(&self, deadline: Instant) {
        self.supervisor.timer().register(deadline, self.waker.clone());
    }

    pub fn wake_after(&self, delay: Duration) {
        self.wake_at(deadline_after(Instant::now(), delay));
    }
}

/// Behavior backed by a closure
pub struct FnBehavior<M, F> {
    f: F,
    _message: PhantomData<fn() -> M>,
}

impl<M, F> Behavior for FnBehavior<M, F>
where
    M: Transferable,
    F: FnMut(&mut AgentContext<'_, M>) -> anyhow::Result<Step> + Send + 'static,
{
    type Message = M;

    fn resume(&mut self, ctx: &mut AgentContext<'_, M>) -> anyhow::Result<Step> {
        (self.f)(ctx)
    }
}

/// Build a behavior from a closure
///
/// ```no_run
/// use agent_weave::supervisor::{from_fn, AgentContext, Step};
///
/// let echo = from_fn(|ctx: &mut AgentContext<'_, String>| {
///     while let Some(message) = ctx.recv_message() {
///         println!("{}", message);
///     }
///     Ok(Step::Wait)
/// });
/// # let _ = echo;
/// ```
pub fn from_fn<M, F>(f: F) -> FnBehavior<M, F>
where
    M: Transferable,
    F: FnMut(&mut AgentContext<'_, M>) -> anyhow::Result<Step> + Send + 'static,
{
    FnBehavior {
        f,
        _message: PhantomData,
    }
}
