//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use crate::error::ConfigurationError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "telemetry_tests.rs"]
mod tests;

/// Build the filter: `RUST_LOG` when set, otherwise the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigurationError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| ConfigurationError::Invalid {
        message: format!("logging.level '{}': {}", config.level, e),
    })
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` if a subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, ConfigurationError> {
    let filter = env_filter(config)?;
    let json = config.json_format;

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init()
        .is_ok();
    Ok(installed)
}
