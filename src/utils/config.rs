// src/utils/config.rs
//! Runtime configuration
//!
//! Loaded from an optional `config/agent-weave.{toml,yaml,json}` file and
//! overlaid with `AGENT_WEAVE__*` environment variables, e.g.
//! `AGENT_WEAVE__SCHEDULER__WORKERS=8`.

use crate::utils::errors::{Result, RuntimeError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "config/agent-weave";
const ENV_PREFIX: &str = "AGENT_WEAVE";

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker pool and stealing parameters
    pub scheduler: SchedulerConfig,

    /// Default mailbox sizing for spawned agents
    pub mailbox: MailboxConfig,

    /// Placement / victim selection policy
    pub strategy: StrategyConfig,

    /// Lease table defaults
    pub lease: LeaseConfig,
}

impl RuntimeConfig {
    /// Load configuration from the default file (if present) and environment
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit file; format follows the extension
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.scheduler.workers = workers;
        self
    }

    pub fn with_mailbox(mut self, mailbox: MailboxConfig) -> Self {
        self.mailbox = mailbox;
        self
    }

    pub fn with_strategy(mut self, kind: StrategyKind) -> Self {
        self.strategy.kind = kind;
        self
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.mailbox.validate()?;
        self.strategy.validate()?;
        Ok(())
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads (0 = one per available core)
    pub workers: usize,

    /// Slots in each worker's local run queue
    pub local_queue_capacity: usize,

    /// Failed steal rounds before a worker parks
    pub steal_attempts: usize,

    /// Behavior resumes per scheduling turn before the agent is re-queued
    pub quantum: usize,

    /// Upper bound on a single park; the worker re-checks queues afterwards
    pub park_timeout_ms: u64,

    /// How long `stop` waits for terminating agents to drain
    pub drain_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            local_queue_capacity: 256,
            steal_attempts: 4,
            quantum: 32,
            park_timeout_ms: 10,
            drain_timeout_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    /// Resolved worker count
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Maximum number of workers allowed to steal concurrently
    pub fn max_stealers(&self) -> usize {
        (self.worker_count() / 2).max(1)
    }

    pub fn park_timeout(&self) -> Duration {
        Duration::from_millis(self.park_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_queue_capacity == 0 {
            return Err(RuntimeError::ConfigError(
                "local_queue_capacity must be positive".into(),
            ));
        }
        if self.quantum == 0 {
            return Err(RuntimeError::ConfigError("quantum must be positive".into()));
        }
        Ok(())
    }
}

/// Mailbox sizing: capacity C, high watermark H, low watermark L
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub capacity: usize,
    pub high_watermark: usize,
    pub low_watermark: usize,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            high_watermark: 768,
            low_watermark: 256,
        }
    }
}

impl MailboxConfig {
    pub fn new(capacity: usize, high_watermark: usize, low_watermark: usize) -> Self {
        Self {
            capacity,
            high_watermark,
            low_watermark,
        }
    }

    /// Watermarks at 3/4 and 1/4 of `capacity`
    pub fn with_capacity(capacity: usize) -> Self {
        let high = (capacity * 3 / 4).max(1);
        let low = capacity / 4;
        Self::new(capacity, high, low.min(high.saturating_sub(1)))
    }

    /// Enforces `L < H <= C` and `C > 0`
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(RuntimeError::InvalidArgument(
                "mailbox capacity must be positive".into(),
            ));
        }
        if self.high_watermark > self.capacity {
            return Err(RuntimeError::InvalidArgument(format!(
                "high watermark {} exceeds capacity {}",
                self.high_watermark, self.capacity
            )));
        }
        if self.low_watermark >= self.high_watermark {
            return Err(RuntimeError::InvalidArgument(format!(
                "low watermark {} must be below high watermark {}",
                self.low_watermark, self.high_watermark
            )));
        }
        Ok(())
    }
}

/// Which scheduling strategy the runtime installs at start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Random victims, spawn on the spawning worker
    #[default]
    Default,
    /// Profile-driven victims and placement
    Predictive,
}

/// Strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub kind: StrategyKind,

    /// Smoothing factor for the moving averages in agent profiles
    pub ewma_alpha: f64,

    /// Spawner's predicted load must exceed the least-loaded worker's by this
    /// factor before placement leaves the spawning worker
    pub imbalance_ratio: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::Default,
            ewma_alpha: 0.2,
            imbalance_ratio: 1.5,
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return Err(RuntimeError::ConfigError(format!(
                "ewma_alpha must be in (0, 1], got {}",
                self.ewma_alpha
            )));
        }
        if self.imbalance_ratio < 1.0 {
            return Err(RuntimeError::ConfigError(format!(
                "imbalance_ratio must be >= 1.0, got {}",
                self.imbalance_ratio
            )));
        }
        Ok(())
    }
}

/// Lease table defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// TTL used by `acquire_default`
    pub default_ttl_ms: u64,

    /// Poll interval for `acquire_within`
    pub retry_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 30_000,
            retry_interval_ms: 5,
        }
    }
}

impl LeaseConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }
}
