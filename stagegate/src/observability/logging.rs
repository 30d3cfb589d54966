//! Structured logging setup.

use crate::errors::GateError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Default filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Builds the filter: `RUST_LOG` if set, otherwise `fallback`.
#[must_use]
pub fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Installs a global `tracing` subscriber.
///
/// Uses the `RUST_LOG` env var if set, otherwise [`DEFAULT_LOG_LEVEL`].
///
/// # Errors
///
/// Returns [`GateError::Config`] if a global subscriber is already set.
pub fn init_tracing(format: LogFormat) -> Result<(), GateError> {
    init_tracing_with_level(format, DEFAULT_LOG_LEVEL)
}

/// Installs a global `tracing` subscriber with a custom fallback level.
///
/// # Errors
///
/// Returns [`GateError::Config`] if a global subscriber is already set.
pub fn init_tracing_with_level(format: LogFormat, fallback: &str) -> Result<(), GateError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(fallback))
        .with_target(false);

    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    installed.map_err(|e| GateError::Config(format!("failed to install tracing subscriber: {e}")))
}
