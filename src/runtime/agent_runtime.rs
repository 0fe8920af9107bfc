// src/runtime/agent_runtime.rs
//! The runtime facade
//!
//! Owns the supervisor (and through it the worker pool and timer), the
//! lease table and the shared counters. Everything an embedding application
//! needs goes through here:
//!
//! - lifecycle: `start`, `stop`
//! - agents: `spawn`, `signal`, `terminate`
//! - primitives: `await_future`, `channel`, `quorum`, `shard`, `lease`,
//!   `broadcast`
//! - observability: `metrics`, `stats`

use crate::capability::{AgentId, Transferable};
use crate::mailbox::{self, ChannelReceiver, ChannelSender, EnqueueStatus};
use crate::observability::{MetricsSnapshot, RuntimeMetrics};
use crate::primitives::{
    self, Awaitable, Ballot, BroadcastReceipt, Gossip, Lease, LeaseTable, Peer, QuorumOutcome,
    QuorumRound, Resolver,
};
use crate::scheduler::SchedulerStats;
use crate::strategy;
use crate::supervisor::{
    AgentHandle, Behavior, FailurePolicy, FailureReport, SpawnOptions, StopOnFailure, Supervisor,
};
use crate::utils::clock::Clock;
use crate::utils::config::{MailboxConfig, RuntimeConfig};
use crate::utils::errors::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Point-in-time runtime overview
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    /// Queue depths and worker phases
    pub scheduler: SchedulerStats,

    pub metrics: MetricsSnapshot,

    /// Agents registered and not yet finished
    pub agents: usize,

    /// Live leases
    pub leases: usize,
}

/// A work-stealing agent runtime
///
/// Not restartable: after `stop` a new runtime must be created.
pub struct AgentRuntime {
    config: RuntimeConfig,
    supervisor: Arc<Supervisor>,
    leases: Arc<LeaseTable>,
    metrics: Arc<RuntimeMetrics>,
}

impl AgentRuntime {
    /// Create a stopped runtime that stops agents on their first failure
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Self::with_policy(config, Arc::new(StopOnFailure))
    }

    /// Create a stopped runtime with a custom failure policy
    pub fn with_policy(config: RuntimeConfig, policy: Arc<dyn FailurePolicy>) -> Result<Self> {
        config.validate()?;

        let workers = config.scheduler.worker_count();
        let metrics = Arc::new(RuntimeMetrics::new(workers));
        let strategy = strategy::from_config(&config.strategy);
        debug!(
            "Creating runtime: {} workers, {} strategy",
            workers,
            strategy.name()
        );

        let supervisor = Supervisor::new(&config, strategy, Arc::clone(&metrics), policy);
        let leases = Arc::new(LeaseTable::new(config.lease.clone()));

        Ok(Self {
            config,
            supervisor,
            leases,
            metrics,
        })
    }

    /// Read lease expiry from `clock` instead of the system clock
    ///
    /// Replaces the lease table, so call it before granting leases.
    pub fn with_lease_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.leases = Arc::new(LeaseTable::with_clock(self.config.lease.clone(), clock));
        self
    }

    /// Start the worker pool
    pub fn start(&self) -> Result<()> {
        self.supervisor.start()?;
        info!(
            "Agent runtime started ({} workers)",
            self.supervisor.scheduler().num_workers()
        );
        Ok(())
    }

    /// Terminate every agent, wait for quiescence and stop the workers
    pub fn stop(&self) {
        if self.supervisor.is_running() {
            self.supervisor.stop();
            info!("Agent runtime stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Spawn an agent, preferring the calling worker when there is one
    pub fn spawn<B: Behavior>(&self, behavior: B) -> Result<AgentHandle<B::Message>> {
        self.supervisor.spawn(behavior)
    }

    pub fn spawn_with<B: Behavior>(
        &self,
        behavior: B,
        options: SpawnOptions,
    ) -> Result<AgentHandle<B::Message>> {
        self.supervisor.spawn_with(behavior, options)
    }

    /// Enqueue `message` for the agent behind `handle`
    ///
    /// Use [`AgentHandle::signal`] directly to get a rejected message back.
    pub fn signal<M: Transferable>(
        &self,
        handle: &AgentHandle<M>,
        message: M,
    ) -> Result<EnqueueStatus> {
        Ok(handle.signal(message)?)
    }

    /// Close the agent's mailbox and let it drain
    pub fn terminate<M: Transferable>(&self, handle: &AgentHandle<M>) -> Result<()> {
        self.supervisor.terminate(handle.id())
    }

    pub fn terminate_id(&self, id: AgentId) -> Result<()> {
        self.supervisor.terminate(id)
    }

    pub fn await_future<T: Send + 'static>(&self) -> (Resolver<T>, Awaitable<T>) {
        primitives::await_future()
    }

    /// Bounded channel with default watermarks for `capacity`
    pub fn channel<T: Transferable>(
        &self,
        capacity: usize,
    ) -> Result<(ChannelSender<T>, ChannelReceiver<T>)> {
        mailbox::channel(MailboxConfig::with_capacity(capacity))
    }

    pub fn channel_with<T: Transferable>(
        &self,
        config: MailboxConfig,
    ) -> Result<(ChannelSender<T>, ChannelReceiver<T>)> {
        mailbox::channel(config)
    }

    /// Run a quorum round, blocking the calling thread
    ///
    /// From inside a behavior use [`start_quorum`](Self::start_quorum) and
    /// poll the round instead.
    pub fn quorum<P, R, T>(
        &self,
        participants: &[T],
        threshold: usize,
        payload: P,
        timeout: Duration,
    ) -> Result<QuorumOutcome<R>>
    where
        P: Send + Sync + 'static,
        R: Send + 'static,
        T: Peer<Ballot<P, R>>,
    {
        primitives::quorum(participants, threshold, payload, timeout)
    }

    pub fn start_quorum<P, R, T>(
        &self,
        participants: &[T],
        threshold: usize,
        payload: P,
    ) -> Result<QuorumRound<R>>
    where
        P: Send + Sync + 'static,
        R: Send + 'static,
        T: Peer<Ballot<P, R>>,
    {
        primitives::start_quorum(participants, threshold, payload)
    }

    pub fn shard<'a, S: AsRef<[u8]>>(&self, key: impl AsRef<[u8]>, shards: &'a [S]) -> Result<&'a S> {
        primitives::shard(key, shards)
    }

    /// Acquire `key` for `holder`; `LeaseConflict` while a live lease exists
    pub fn lease(&self, key: impl Into<String>, holder: AgentId, ttl: Duration) -> Result<Lease> {
        self.leases.acquire(key, holder, ttl)
    }

    /// The full lease API (renew, release, waiting acquire)
    pub fn leases(&self) -> &Arc<LeaseTable> {
        &self.leases
    }

    /// Gossip `payload` to `fanout` random peers
    pub fn broadcast<T, P>(&self, peers: &[P], payload: T, fanout: usize) -> Result<BroadcastReceipt>
    where
        T: Send + Sync + 'static,
        P: Peer<Gossip<T>>,
    {
        primitives::broadcast(peers, payload, fanout)
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn failures(&self) -> Vec<FailureReport> {
        self.supervisor.failures()
    }

    pub fn metrics(&self) -> &Arc<RuntimeMetrics> {
        &self.metrics
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            scheduler: self.supervisor.scheduler_stats(),
            metrics: self.metrics.snapshot(),
            agents: self.supervisor.agent_count(),
            leases: self.leases.live_count(),
        }
    }
}

impl Drop for AgentRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}
