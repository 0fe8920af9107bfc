// src/observability/mod.rs
//! Logging and runtime counters
//!
//! - **Tracing**: `tracing-subscriber` fmt layer filtered by `RUST_LOG`
//! - **Metrics**: read-only atomic counters an external exporter can poll,
//!   mirrored into the `metrics` facade
//!
//! Exporting and formatting metrics is left to the embedding application.

pub mod metrics;

pub use self::metrics::{MetricsSnapshot, RuntimeMetrics};

use crate::utils::errors::{Result, RuntimeError};
use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install the global tracing subscriber (human-readable output)
pub fn init_tracing() -> Result<()> {
    init_tracing_with(LogFormat::Pretty)
}

/// Install the global tracing subscriber with the given output format
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing_with(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true);

    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| RuntimeError::ConfigError(format!("tracing init failed: {}", e)))
}
