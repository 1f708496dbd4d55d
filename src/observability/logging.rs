//! # Structured Logging
//!
//! `tracing` subscriber setup for the `credvault` binary. Library code only
//! emits events and spans; embedding applications install their own
//! subscriber.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig, VaultConfig};
use crate::errors::{Result, VaultError};

/// Build the env filter: `RUST_LOG` wins, then `--verbose`, then the configured level
fn build_filter(config: &ObservabilityConfig, verbose: bool) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = if verbose { "debug" } else { config.log_level.as_str() };
    EnvFilter::try_new(level).map_err(|e| {
        VaultError::config_with_source(format!("Invalid log filter '{}'", level), Box::new(e))
    })
}

/// Install the global subscriber, writing to stderr.
///
/// Returns `Ok(false)` when a subscriber was already installed (e.g. by an
/// integration test harness).
pub fn init_logging(config: &ObservabilityConfig, verbose: bool) -> Result<bool> {
    let filter = build_filter(config, verbose)?;

    let installed = match config.log_format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            fmt()
                .json()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .with_current_span(true)
                .finish(),
        ),
        LogFormat::Pretty => tracing::subscriber::set_global_default(
            fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .with_target(false)
                .finish(),
        ),
    };

    Ok(installed.is_ok())
}

/// Log configuration at startup (never includes key material)
pub fn log_config_info(config: &VaultConfig) {
    tracing::info!(
        database_url = %config.database.url,
        cache_ttl_secs = config.key_manager.cache_ttl_seconds,
        extra_fallbacks = config.key_manager.fallback_vars.len(),
        log_format = ?config.observability.log_format,
        "Credential vault configuration"
    );
}
