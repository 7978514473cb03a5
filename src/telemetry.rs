//! # Logging Setup
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the process that embeds it. [`init_logging`] is the one-call setup used by
//! the bundled binary and available to applications.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogConfig, LogFormat};
use crate::error::{Error, Result};

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.level` when set.
///
/// # Errors
///
/// `Error::Config` if the filter directive is invalid or a global subscriber
/// was already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Config(format!("invalid log filter '{}': {e}", config.level)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("failed to initialize tracing subscriber: {e}")))?;

    tracing::debug!(level = %config.level, format = %config.format, "logging initialized");
    Ok(())
}
