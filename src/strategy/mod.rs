// src/strategy/mod.rs
//! Pluggable scheduling strategies
//!
//! A strategy answers two questions for the scheduler:
//!
//! - **Victim order**: which workers an idle worker should try to steal from,
//!   best first
//! - **Placement**: where a newly spawned agent should be queued
//!
//! The scheduler is correct with any answer; a strategy only affects how
//! well load is spread. [`DefaultStrategy`] randomizes victims and keeps new
//! agents on the spawning worker. [`PredictiveStrategy`] uses
//! [`AgentProfile`]s and a [`Forecaster`] to steal from the most loaded
//! workers first and to move spawns off overloaded workers.

pub mod forecast;
pub mod predictive;
pub mod profile;

pub use forecast::{EwmaForecaster, Forecaster};
pub use predictive::PredictiveStrategy;
pub use profile::{AgentProfile, ProfileStore, TurnSample};

use crate::utils::config::{StrategyConfig, StrategyKind};
use rand::seq::SliceRandom;
use rand::RngCore;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Worker activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Idle,
    Running,
    Stealing,
}

/// Point-in-time load of one worker
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WorkerLoadSnapshot {
    pub index: usize,

    /// Tasks in the local queue and LIFO slot
    pub queued: usize,

    /// Moving average of this worker's turn time, nanoseconds
    pub mean_turn_ns: f64,

    /// Moving average of the profiled cost of the agents this worker runs,
    /// as priced by [`SchedulingStrategy::turn_cost`]; 0 until measured
    pub predicted_turn_ns: f64,

    pub phase: WorkerPhase,
}

/// Where to queue a new agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// A specific worker's queue
    Worker(usize),

    /// The shared global queue
    Global,
}

/// Victim selection and spawn placement policy
pub trait SchedulingStrategy: Send + Sync + fmt::Debug {
    /// Workers to try stealing from, best first; must not contain `thief`
    fn victim_order(
        &self,
        thief: usize,
        loads: &[WorkerLoadSnapshot],
        rng: &mut dyn RngCore,
    ) -> Vec<usize>;

    /// Queue for a new agent spawned from `spawner` (`None` off-pool)
    fn placement(
        &self,
        spawner: Option<usize>,
        loads: &[WorkerLoadSnapshot],
        profile: Option<&AgentProfile>,
    ) -> Placement;

    /// Predicted nanoseconds of one turn of an agent with `profile`
    ///
    /// Workers fold this into their published load after every turn.
    fn turn_cost(&self, profile: &AgentProfile) -> f64 {
        profile.avg_run_time_ns
    }

    fn name(&self) -> &'static str;
}

/// Random victims, spawner affinity
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStrategy;

impl SchedulingStrategy for DefaultStrategy {
    fn victim_order(
        &self,
        thief: usize,
        loads: &[WorkerLoadSnapshot],
        rng: &mut dyn RngCore,
    ) -> Vec<usize> {
        let mut victims: Vec<usize> = (0..loads.len()).filter(|&i| i != thief).collect();
        victims.shuffle(rng);
        victims
    }

    fn placement(
        &self,
        spawner: Option<usize>,
        _loads: &[WorkerLoadSnapshot],
        _profile: Option<&AgentProfile>,
    ) -> Placement {
        spawner.map(Placement::Worker).unwrap_or(Placement::Global)
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Build the strategy selected by `config`
pub fn from_config(config: &StrategyConfig) -> Arc<dyn SchedulingStrategy> {
    match config.kind {
        StrategyKind::Default => Arc::new(DefaultStrategy),
        StrategyKind::Predictive => Arc::new(PredictiveStrategy::new(
            Arc::new(EwmaForecaster::default()),
            config.imbalance_ratio,
        )),
    }
}

#[cfg(test)]
pub(crate) fn loads(queued: &[usize]) -> Vec<WorkerLoadSnapshot> {
    queued
        .iter()
        .enumerate()
        .map(|(index, &queued)| WorkerLoadSnapshot {
            index,
            queued,
            mean_turn_ns: 0.0,
            predicted_turn_ns: 0.0,
            phase: if queued > 0 {
                WorkerPhase::Running
            } else {
                WorkerPhase::Idle
            },
        })
        .collect()
}
