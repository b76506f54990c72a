//! Tracing subscriber set-up.
//!
//! The runtime only emits through `tracing` macros; hosts that already
//! install a subscriber can skip this module entirely.

use crate::errors::PipefitterError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `pipefitter=debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Include the module path of each event.
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// JSON output at `info`.
    #[must_use]
    pub fn production() -> Self {
        Self {
            json: true,
            ..Self::default()
        }
    }

    /// Human-readable output at `debug`.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            ..Self::default()
        }
    }
}

/// Builds the filter: `RUST_LOG` when set, otherwise `config.level`.
///
/// # Errors
///
/// Returns an error if `config.level` is not a valid filter directive.
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter, PipefitterError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| PipefitterError::Tracing(format!("invalid log level '{}': {e}", config.level)))
}

/// Installs a global `fmt` subscriber.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a global subscriber is
/// already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), PipefitterError> {
    let filter = env_filter(config)?;

    let layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.include_target)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(config.include_target)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| PipefitterError::Tracing(e.to_string()))
}
