// src/strategy/profile.rs
//! Rolling per-agent execution profiles
//!
//! Workers record one sample per scheduling turn. Profiles are exponentially
//! weighted moving averages, so they adapt to phase changes in an agent's
//! workload without keeping history.

use crate::capability::AgentId;
use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Rolling execution profile of one agent
#[derive(Debug, Clone, Serialize)]
pub struct AgentProfile {
    /// Average wall time of a turn, nanoseconds
    pub avg_run_time_ns: f64,

    /// Average messages consumed per second between turns
    pub avg_msg_rate: f64,

    /// Share of turns that ended by exhausting the quantum (0.0 - 1.0)
    pub cpu_intensity: f64,

    /// Turns observed
    pub turns: u64,

    #[serde(skip)]
    last_turn_at: Option<Instant>,
}

impl AgentProfile {
    /// A profile seeded from expected behavior rather than observed turns
    ///
    /// Used as a spawn hint for agents that have not run yet.
    pub fn estimated(run_time: Duration, cpu_intensity: f64) -> Self {
        Self {
            avg_run_time_ns: run_time.as_nanos() as f64,
            avg_msg_rate: 0.0,
            cpu_intensity: cpu_intensity.clamp(0.0, 1.0),
            turns: 1,
            last_turn_at: None,
        }
    }

    fn new() -> Self {
        Self {
            avg_run_time_ns: 0.0,
            avg_msg_rate: 0.0,
            cpu_intensity: 0.0,
            turns: 0,
            last_turn_at: None,
        }
    }

    fn update(&mut self, sample: &TurnSample, alpha: f64) {
        let run_ns = sample.elapsed.as_nanos() as f64;
        let cpu_bound = if sample.quantum_exhausted { 1.0 } else { 0.0 };
        let rate = self
            .last_turn_at
            .map(|prev| sample.at.saturating_duration_since(prev).as_secs_f64())
            .filter(|secs| *secs > 0.0)
            .map(|secs| sample.messages as f64 / secs)
            .unwrap_or(0.0);

        if self.turns == 0 {
            self.avg_run_time_ns = run_ns;
            self.cpu_intensity = cpu_bound;
            self.avg_msg_rate = rate;
        } else {
            self.avg_run_time_ns = ewma(self.avg_run_time_ns, run_ns, alpha);
            self.cpu_intensity = ewma(self.cpu_intensity, cpu_bound, alpha);
            self.avg_msg_rate = ewma(self.avg_msg_rate, rate, alpha);
        }

        self.turns += 1;
        self.last_turn_at = Some(sample.at);
    }
}

#[inline]
pub(crate) fn ewma(current: f64, sample: f64, alpha: f64) -> f64 {
    alpha * sample + (1.0 - alpha) * current
}

/// One turn's measurements
#[derive(Debug, Clone, Copy)]
pub struct TurnSample {
    pub elapsed: Duration,
    pub messages: usize,
    pub quantum_exhausted: bool,
    pub at: Instant,
}

/// Concurrent profile table
#[derive(Debug)]
pub struct ProfileStore {
    profiles: DashMap<AgentId, AgentProfile>,
    alpha: f64,
}

impl ProfileStore {
    pub fn new(alpha: f64) -> Self {
        Self {
            profiles: DashMap::new(),
            alpha: alpha.clamp(f64::EPSILON, 1.0),
        }
    }

    /// Fold `sample` into the agent's profile and return the updated profile
    pub fn record(&self, agent: AgentId, sample: TurnSample) -> AgentProfile {
        let mut profile = self.profiles.entry(agent).or_insert_with(AgentProfile::new);
        profile.update(&sample, self.alpha);
        profile.value().clone()
    }

    /// Smoothing factor applied to every sample
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn get(&self, agent: AgentId) -> Option<AgentProfile> {
        self.profiles.get(&agent).map(|p| p.value().clone())
    }

    pub fn remove(&self, agent: AgentId) {
        self.profiles.remove(&agent);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
