// src/utils/mod.rs
//! Shared infrastructure: errors, configuration and time sources.

pub mod clock;
pub mod config;
pub mod errors;

pub use clock::{deadline_after, Clock, ManualClock, SystemClock};
pub use config::{
    LeaseConfig, MailboxConfig, RuntimeConfig, SchedulerConfig, StrategyConfig, StrategyKind,
};
pub use errors::{Result, RuntimeError};
