// src/supervisor/supervisor.rs
//! Agent lifecycle: spawn, run, fail, terminate
//!
//! # Architecture
//!
//! ```text
//! Supervisor
//! ├─ registry: AgentId → { header, mailbox, capability }
//! ├─ failures: AgentId → FailureReport
//! ├─ scheduler: worker pool running AgentTask turns
//! └─ timer: deadline wakeups for waiting agents
//! ```
//!
//! The registry only holds identity-level data. The behavior itself is owned
//! by its task, which moves between run queues and the agent's parked slot.

use crate::capability::{AgentId, CapabilityTag};
use crate::mailbox::{Mailbox, PressureObserver};
use crate::observability::RuntimeMetrics;
use crate::scheduler::{
    AgentHeader, AgentState, AgentWaker, RunOutcome, Runnable, SchedulerStats, Timer,
    TurnReport, WorkStealingScheduler,
};
use crate::strategy::{AgentProfile, ProfileStore, SchedulingStrategy};
use crate::supervisor::agent::{AgentContext, Behavior, Step, TurnState};
use crate::supervisor::handle::AgentHandle;
use crate::supervisor::policy::{FailureAction, FailurePolicy, FailureReport};
use crate::utils::clock::deadline_after;
use crate::utils::config::{MailboxConfig, RuntimeConfig};
use crate::utils::errors::{Result, RuntimeError};
use dashmap::DashMap;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::Waker;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-agent spawn overrides
#[derive(Clone, Default)]
pub struct SpawnOptions {
    /// Mailbox sizing; the runtime default when `None`
    pub mailbox: Option<MailboxConfig>,

    /// Receives the mailbox's backpressure transitions
    pub observer: Option<Arc<dyn PressureObserver>>,

    /// How the agent's own state may be referenced; `Isolated` when `None`
    pub capability: Option<CapabilityTag>,

    /// Expected cost of the new agent, consulted by the placement strategy
    pub profile: Option<AgentProfile>,

    /// Place the new agent as if it behaved like this already-running one
    pub profile_of: Option<AgentId>,
}

impl SpawnOptions {
    pub fn with_mailbox(mut self, mailbox: MailboxConfig) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PressureObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_capability(mut self, capability: CapabilityTag) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn with_profile(mut self, profile: AgentProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Borrow the observed profile of `sibling`; ignored once it has finished
    pub fn with_profile_of(mut self, sibling: AgentId) -> Self {
        self.profile_of = Some(sibling);
        self
    }
}

/// Read-only view of a registered agent
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub id: AgentId,
    pub state: AgentState,
    pub capability: CapabilityTag,
    pub terminating: bool,
    pub mailbox_len: usize,
    pub uptime: Duration,

    /// Observed execution profile; `None` before the first turn
    pub profile: Option<AgentProfile>,
}

/// Type-erased mailbox operations the registry needs
trait MailboxControl: Send + Sync {
    fn close(&self);
    fn len(&self) -> usize;
}

impl<M: Send> MailboxControl for Mailbox<M> {
    fn close(&self) {
        Mailbox::close(self);
    }

    fn len(&self) -> usize {
        Mailbox::len(self)
    }
}

struct AgentEntry {
    header: Arc<AgentHeader>,
    mailbox: Arc<dyn MailboxControl>,
    capability: CapabilityTag,
    spawned_at: Instant,
}

/// Owns every agent of one runtime
pub struct Supervisor {
    self_ref: Weak<Supervisor>,

    scheduler: WorkStealingScheduler,

    timer: Timer,

    registry: DashMap<AgentId, AgentEntry>,

    /// Last failure of each agent that was stopped by the policy
    failures: DashMap<AgentId, FailureReport>,

    policy: Arc<dyn FailurePolicy>,

    mailbox_config: MailboxConfig,

    drain_timeout: Duration,

    metrics: Arc<RuntimeMetrics>,

    running: AtomicBool,
}

impl Supervisor {
    /// Create a stopped supervisor
    pub fn new(
        config: &RuntimeConfig,
        strategy: Arc<dyn SchedulingStrategy>,
        metrics: Arc<RuntimeMetrics>,
        policy: Arc<dyn FailurePolicy>,
    ) -> Arc<Self> {
        let profiles = Arc::new(ProfileStore::new(config.strategy.ewma_alpha));
        let scheduler = WorkStealingScheduler::new(
            config.scheduler.clone(),
            strategy,
            profiles,
            Arc::clone(&metrics),
        );

        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            scheduler,
            timer: Timer::new(),
            registry: DashMap::new(),
            failures: DashMap::new(),
            policy,
            mailbox_config: config.mailbox,
            drain_timeout: config.scheduler.drain_timeout(),
            metrics,
            running: AtomicBool::new(false),
        })
    }

    /// Start workers and the timer
    pub fn start(&self) -> Result<()> {
        self.scheduler.start()?;
        self.timer
            .start()
            .map_err(|e| RuntimeError::ConfigError(format!("failed to spawn timer: {}", e)))?;
        self.running.store(true, Ordering::Release);

        info!(
            "Supervisor started with {} workers",
            self.scheduler.num_workers()
        );
        Ok(())
    }

    /// Terminate every agent, wait for them to drain, then stop the pool
    ///
    /// Agents still registered after the drain timeout are dropped. Must not
    /// be called from inside a behavior: the caller's own agent cannot drain.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let ids: Vec<AgentId> = self.registry.iter().map(|entry| *entry.key()).collect();
        info!("Stopping supervisor, terminating {} agents", ids.len());
        for id in ids {
            let _ = self.terminate(id);
        }

        let deadline = deadline_after(Instant::now(), self.drain_timeout);
        while !self.registry.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }

        let stragglers = self.registry.len();
        if stragglers > 0 {
            warn!("{} agents did not drain before shutdown", stragglers);
        }

        self.scheduler.shutdown();
        self.timer.shutdown();

        // Parked tasks reference their own header; finishing breaks the cycle.
        let headers: Vec<Arc<AgentHeader>> = self
            .registry
            .iter()
            .map(|entry| Arc::clone(&entry.header))
            .collect();
        self.registry.clear();
        for header in headers {
            header.finish();
        }

        info!("Supervisor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn an agent with default options
    pub fn spawn<B: Behavior>(&self, behavior: B) -> Result<AgentHandle<B::Message>> {
        self.spawn_with(behavior, SpawnOptions::default())
    }

    /// Spawn an agent; fails with `SpawnRejected` unless running
    pub fn spawn_with<B: Behavior>(
        &self,
        behavior: B,
        options: SpawnOptions,
    ) -> Result<AgentHandle<B::Message>> {
        if !self.is_running() {
            return Err(RuntimeError::SpawnRejected);
        }

        let capability = options.capability.unwrap_or(CapabilityTag::Isolated);
        if !matches!(
            capability,
            CapabilityTag::Isolated | CapabilityTag::MutableLocal
        ) {
            return Err(RuntimeError::CapabilityViolation(format!(
                "agent state cannot be {}",
                capability
            )));
        }

        let mut mailbox =
            Mailbox::new(options.mailbox.unwrap_or(self.mailbox_config))?
                .with_metrics(Arc::clone(&self.metrics));
        if let Some(observer) = options.observer {
            mailbox = mailbox.with_observer(observer);
        }
        let mailbox = Arc::new(mailbox);

        let id = AgentId::next();
        let header = Arc::new(AgentHeader::new(
            id,
            Arc::downgrade(self.scheduler.shared()),
        ));

        self.registry.insert(
            id,
            AgentEntry {
                header: Arc::clone(&header),
                mailbox: Arc::clone(&mailbox) as Arc<dyn MailboxControl>,
                capability,
                spawned_at: Instant::now(),
            },
        );

        let task = AgentTask {
            waker: AgentWaker::waker(Arc::clone(&header)),
            header: Arc::clone(&header),
            mailbox: Arc::clone(&mailbox),
            behavior,
            supervisor: self.self_ref.clone(),
            restarts: 0,
        };

        let shared = self.scheduler.shared();
        let hint = options
            .profile
            .or_else(|| options.profile_of.and_then(|sibling| self.profile(sibling)));
        let placement = shared.strategy().placement(
            shared.current_worker(),
            &shared.loads(),
            hint.as_ref(),
        );
        self.scheduler.submit(Box::new(task), placement);
        self.metrics.record_spawn();

        debug!("Spawned {} ({:?})", id, placement);
        Ok(AgentHandle::new(mailbox, header))
    }

    /// Close the agent's mailbox and let it drain
    ///
    /// Further signals fail with `MailboxClosed`. Terminating twice is a
    /// no-op.
    pub fn terminate(&self, id: AgentId) -> Result<()> {
        let (header, mailbox) = {
            let entry = self
                .registry
                .get(&id)
                .ok_or(RuntimeError::AgentNotFound(id))?;
            (Arc::clone(&entry.header), Arc::clone(&entry.mailbox))
        };

        if header.request_termination() {
            mailbox.close();
            debug!("Terminating {} ({} messages to drain)", id, mailbox.len());
            header.wake();
        }
        Ok(())
    }

    pub fn agent_info(&self, id: AgentId) -> Option<AgentInfo> {
        self.registry.get(&id).map(|entry| AgentInfo {
            id,
            state: entry.header.state(),
            capability: entry.capability,
            terminating: entry.header.is_terminating(),
            mailbox_len: entry.mailbox.len(),
            uptime: entry.spawned_at.elapsed(),
            profile: self.profile(id),
        })
    }

    /// Observed execution profile of a running agent
    pub fn profile(&self, id: AgentId) -> Option<AgentProfile> {
        self.scheduler.shared().profiles().get(id)
    }

    /// Agents registered and not yet finished
    pub fn agent_count(&self) -> usize {
        self.registry.len()
    }

    /// Why the agent was stopped, if a failure stopped it
    pub fn failure(&self, id: AgentId) -> Option<FailureReport> {
        self.failures.get(&id).map(|report| report.value().clone())
    }

    pub fn failures(&self) -> Vec<FailureReport> {
        self.failures
            .iter()
            .map(|report| report.value().clone())
            .collect()
    }

    pub fn scheduler(&self) -> &WorkStealingScheduler {
        &self.scheduler
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn metrics(&self) -> &Arc<RuntimeMetrics> {
        &self.metrics
    }

    pub(crate) fn timer(&self) -> &Timer {
        &self.timer
    }

    fn deregister(&self, id: AgentId) {
        if self.registry.remove(&id).is_some() {
            self.metrics.record_termination();
            debug!("Agent {} finished", id);
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A behavior bound to its mailbox; what the scheduler runs
struct AgentTask<B: Behavior> {
    header: Arc<AgentHeader>,
    mailbox: Arc<Mailbox<B::Message>>,
    waker: Waker,
    behavior: B,
    supervisor: Weak<Supervisor>,
    restarts: u32,
}

impl<B: Behavior> Runnable for AgentTask<B> {
    fn header(&self) -> &Arc<AgentHeader> {
        &self.header
    }

    fn run(&mut self, quantum: usize) -> TurnReport {
        let Some(supervisor) = self.supervisor.upgrade() else {
            return TurnReport {
                outcome: RunOutcome::Done,
                messages: 0,
            };
        };

        let mut turn = TurnState::new(quantum);
        let outcome = self.turn(&supervisor, quantum, &mut turn);
        TurnReport {
            outcome,
            messages: turn.received,
        }
    }
}

impl<B: Behavior> AgentTask<B> {
    fn turn(&mut self, supervisor: &Supervisor, quantum: usize, turn: &mut TurnState) -> RunOutcome {
        for _ in 0..quantum {
            if self.header.is_terminating() && self.mailbox.is_empty() {
                return self.stop(supervisor, turn);
            }

            turn.drained = false;
            let resumed = {
                let mut ctx = AgentContext::new(
                    &self.header,
                    &self.mailbox,
                    &self.waker,
                    supervisor,
                    turn,
                );
                resume_guarded(|| self.behavior.resume(&mut ctx))
            };

            match resumed {
                Ok(Step::Yield) => return RunOutcome::Yield,
                Ok(Step::Done) => return self.complete(supervisor),
                Ok(Step::Wait) => {
                    if self.header.is_terminating() {
                        return self.stop(supervisor, turn);
                    }
                    if turn.exhausted && !self.mailbox.is_empty() {
                        return RunOutcome::Yield;
                    }

                    self.mailbox.register_receiver(&self.waker);

                    // A message that landed after the behavior drained the
                    // mailbox may have missed the registration.
                    if !(turn.drained && !self.mailbox.is_empty()) {
                        return RunOutcome::Wait;
                    }
                }
                Err(reason) => {
                    if let Some(outcome) = self.fail(supervisor, reason) {
                        return outcome;
                    }
                }
            }
        }

        RunOutcome::Yield
    }

    /// Give the behavior its stop hook, then finish
    fn stop(&mut self, supervisor: &Supervisor, turn: &mut TurnState) -> RunOutcome {
        let mut ctx = AgentContext::new(
            &self.header,
            &self.mailbox,
            &self.waker,
            supervisor,
            turn,
        );
        let stopped = resume_guarded(|| {
            self.behavior.on_stop(&mut ctx);
            Ok(Step::Done)
        });
        if let Err(reason) = stopped {
            warn!("Agent {} failed in on_stop: {}", self.header.id(), reason);
        }

        self.complete(supervisor)
    }

    fn complete(&mut self, supervisor: &Supervisor) -> RunOutcome {
        self.mailbox.close();
        supervisor.deregister(self.header.id());
        RunOutcome::Done
    }

    /// Apply the failure policy; `None` keeps the current turn going
    fn fail(&mut self, supervisor: &Supervisor, reason: String) -> Option<RunOutcome> {
        let id = self.header.id();
        supervisor.metrics.record_failure();

        let report = FailureReport {
            agent: id,
            reason,
            restarts: self.restarts,
            failed_at: Instant::now(),
        };

        let action = if self.header.is_terminating() {
            FailureAction::Stop
        } else {
            supervisor.policy.on_failure(&report)
        };

        match action {
            FailureAction::Restart => {
                warn!("Agent {} failed, restarting: {}", id, report.reason);
                self.restarts += 1;
                let restarted = resume_guarded(|| {
                    self.behavior.on_restart();
                    Ok(Step::Yield)
                });
                match restarted {
                    Ok(_) => Some(RunOutcome::Yield),
                    Err(reason) => {
                        warn!("Agent {} failed in on_restart: {}", id, reason);
                        supervisor.failures.insert(id, report);
                        Some(self.complete(supervisor))
                    }
                }
            }
            FailureAction::Stop => {
                warn!("Agent {} stopped after failure: {}", id, report.reason);
                supervisor.failures.insert(id, report);
                Some(self.complete(supervisor))
            }
        }
    }
}

/// Run a behavior callback, turning errors and panics into a reason string
fn resume_guarded(f: impl FnOnce() -> anyhow::Result<Step>) -> std::result::Result<Step, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(step)) => Ok(step),
        Ok(Err(err)) => Err(format!("{:#}", err)),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
