// src/supervisor/policy.rs
//! What happens to an agent whose behavior fails

use crate::capability::AgentId;
use std::fmt;
use std::time::Instant;

/// A behavior error or panic, as observed by the supervisor
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub agent: AgentId,

    /// Error chain or panic message
    pub reason: String,

    /// Restarts already granted before this failure
    pub restarts: u32,

    pub failed_at: Instant,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} restarts: {}",
            self.agent, self.restarts, self.reason
        )
    }
}

/// Decision for a failed agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Close the mailbox and deregister the agent
    Stop,

    /// Keep the mailbox, call `Behavior::on_restart` and resume
    Restart,
}

/// Supervision policy, consulted once per failure
pub trait FailurePolicy: Send + Sync + fmt::Debug {
    fn on_failure(&self, report: &FailureReport) -> FailureAction;
}

/// Stop every failed agent
#[derive(Debug, Clone, Copy, Default)]
pub struct StopOnFailure;

impl FailurePolicy for StopOnFailure {
    fn on_failure(&self, _report: &FailureReport) -> FailureAction {
        FailureAction::Stop
    }
}

/// Restart up to `max_restarts` times, then stop
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub max_restarts: u32,
}

impl RestartPolicy {
    pub fn new(max_restarts: u32) -> Self {
        Self { max_restarts }
    }
}

impl FailurePolicy for RestartPolicy {
    fn on_failure(&self, report: &FailureReport) -> FailureAction {
        if report.restarts < self.max_restarts {
            FailureAction::Restart
        } else {
            FailureAction::Stop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(restarts: u32) -> FailureReport {
        FailureReport {
            agent: AgentId::from_raw(9),
            reason: "boom".into(),
            restarts,
            failed_at: Instant::now(),
        }
    }

    #[test]
    fn test_stop_on_failure() {
        assert_eq!(StopOnFailure.on_failure(&report(0)), FailureAction::Stop);
    }

    #[test]
    fn test_restart_policy_gives_up() {
        let policy = RestartPolicy::new(2);
        assert_eq!(policy.on_failure(&report(0)), FailureAction::Restart);
        assert_eq!(policy.on_failure(&report(1)), FailureAction::Restart);
        assert_eq!(policy.on_failure(&report(2)), FailureAction::Stop);
    }

    #[test]
    fn test_report_display() {
        assert_eq!(
            report(1).to_string(),
            "agent-9 failed after 1 restarts: boom"
        );
    }
}
