// src/strategy/forecast.rs
//! Load forecasting contract
//!
//! The forecasting model is pluggable. The scheduler only consumes its
//! outputs: a predicted backlog per worker and a predicted turn cost per
//! agent, both in nanoseconds.

use crate::strategy::profile::AgentProfile;
use crate::strategy::WorkerLoadSnapshot;
use std::fmt;

/// Predicts work from observed profiles
pub trait Forecaster: Send + Sync + fmt::Debug {
    /// Predicted nanoseconds of queued work on a worker
    fn worker_backlog(&self, load: &WorkerLoadSnapshot) -> f64;

    /// Predicted nanoseconds of one turn of an agent
    fn turn_cost(&self, profile: Option<&AgentProfile>) -> f64;
}

/// Forecaster that extrapolates the moving averages as-is
#[derive(Debug, Clone)]
pub struct EwmaForecaster {
    /// Cost assumed for turns nothing is known about
    pub default_turn_ns: f64,
}

impl Default for EwmaForecaster {
    fn default() -> Self {
        Self {
            default_turn_ns: 10_000.0,
        }
    }
}

impl Forecaster for EwmaForecaster {
    fn worker_backlog(&self, load: &WorkerLoadSnapshot) -> f64 {
        let per_turn = if load.predicted_turn_ns > 0.0 {
            load.predicted_turn_ns
        } else if load.mean_turn_ns > 0.0 {
            load.mean_turn_ns
        } else {
            self.default_turn_ns
        };
        load.queued as f64 * per_turn
    }

    fn turn_cost(&self, profile: Option<&AgentProfile>) -> f64 {
        match profile {
            Some(p) if p.turns > 0 => p.avg_run_time_ns * (1.0 + p.cpu_intensity),
            _ => self.default_turn_ns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::WorkerPhase;
    use std::time::Duration;

    #[test]
    fn test_backlog_uses_default_until_measured() {
        let forecaster = EwmaForecaster::default();
        let load = WorkerLoadSnapshot {
            index: 0,
            queued: 3,
            mean_turn_ns: 0.0,
            predicted_turn_ns: 0.0,
            phase: WorkerPhase::Running,
        };
        assert_eq!(forecaster.worker_backlog(&load), 30_000.0);

        let measured = WorkerLoadSnapshot {
            mean_turn_ns: 500.0,
            ..load
        };
        assert_eq!(forecaster.worker_backlog(&measured), 1_500.0);

        let profiled = WorkerLoadSnapshot {
            predicted_turn_ns: 2_000.0,
            ..measured
        };
        assert_eq!(forecaster.worker_backlog(&profiled), 6_000.0);
    }

    #[test]
    fn test_unknown_agent_cost() {
        let forecaster = EwmaForecaster::default();
        assert_eq!(forecaster.turn_cost(None), 10_000.0);
    }

    #[test]
    fn test_cpu_bound_agents_cost_more() {
        let forecaster = EwmaForecaster::default();
        let io = AgentProfile::estimated(Duration::from_micros(4), 0.0);
        let cpu = AgentProfile::estimated(Duration::from_micros(4), 1.0);
        assert_eq!(forecaster.turn_cost(Some(&io)), 4_000.0);
        assert_eq!(forecaster.turn_cost(Some(&cpu)), 8_000.0);
    }
}
