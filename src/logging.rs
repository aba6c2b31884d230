//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events. Embedders that do not install
//! their own subscriber can call [`init_tracing`] once at startup.

use crate::config::{LogFormat, LoggingConfig};
use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter: `RUST_LOG` when set, else the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = match config.level.trim() {
        "" => "info",
        level => level,
    };
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", config.level))
}

/// Install the global subscriber.
///
/// Returns an error if the level is not a valid filter directive or a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init(),
    }
    .context("Failed to install tracing subscriber")
}
