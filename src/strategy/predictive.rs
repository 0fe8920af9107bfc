// src/strategy/predictive.rs
//! Profile-driven victim selection and placement

use crate::strategy::forecast::{EwmaForecaster, Forecaster};
use crate::strategy::profile::AgentProfile;
use crate::strategy::{Placement, SchedulingStrategy, WorkerLoadSnapshot};
use rand::seq::SliceRandom;
use rand::RngCore;
use std::cmp::Ordering;
use std::sync::Arc;

/// Steals from the heaviest predicted backlog first; moves spawns to the
/// lightest worker once the spawner is predicted to be overloaded.
#[derive(Debug, Clone)]
pub struct PredictiveStrategy {
    forecaster: Arc<dyn Forecaster>,

    /// Spawner backlog must exceed `ratio * lightest` to give up affinity
    imbalance_ratio: f64,
}

impl PredictiveStrategy {
    pub fn new(forecaster: Arc<dyn Forecaster>, imbalance_ratio: f64) -> Self {
        Self {
            forecaster,
            imbalance_ratio: imbalance_ratio.max(1.0),
        }
    }

    fn lightest(&self, loads: &[WorkerLoadSnapshot]) -> Option<(usize, f64)> {
        loads
            .iter()
            .map(|load| (load.index, self.forecaster.worker_backlog(load)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
    }
}

impl Default for PredictiveStrategy {
    fn default() -> Self {
        Self::new(Arc::new(EwmaForecaster::default()), 1.5)
    }
}

impl SchedulingStrategy for PredictiveStrategy {
    fn victim_order(
        &self,
        thief: usize,
        loads: &[WorkerLoadSnapshot],
        rng: &mut dyn RngCore,
    ) -> Vec<usize> {
        let mut ranked: Vec<(usize, f64)> = loads
            .iter()
            .filter(|load| load.index != thief)
            .map(|load| (load.index, self.forecaster.worker_backlog(load)))
            .collect();

        // Shuffle first so equal backlogs are tried in random order.
        ranked.shuffle(rng);
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        ranked.into_iter().map(|(index, _)| index).collect()
    }

    fn placement(
        &self,
        spawner: Option<usize>,
        loads: &[WorkerLoadSnapshot],
        profile: Option<&AgentProfile>,
    ) -> Placement {
        let Some((lightest, lightest_backlog)) = self.lightest(loads) else {
            return Placement::Global;
        };

        let Some(spawner) = spawner else {
            return Placement::Worker(lightest);
        };

        let spawner_backlog = loads
            .get(spawner)
            .map(|load| self.forecaster.worker_backlog(load))
            .unwrap_or(0.0);
        let cost = self.forecaster.turn_cost(profile);

        if spawner_backlog + cost > self.imbalance_ratio * (lightest_backlog + cost) {
            Placement::Worker(lightest)
        } else {
            Placement::Worker(spawner)
        }
    }

    fn turn_cost(&self, profile: &AgentProfile) -> f64 {
        self.forecaster.turn_cost(Some(profile))
    }

    fn name(&self) -> &'static str {
        "predictive"
    }
}
