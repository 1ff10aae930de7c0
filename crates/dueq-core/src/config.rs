//! Configuration for queue handles.
//!
//! Sources are applied in order, later ones overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. An optional file (format chosen by extension: toml, yaml or json)
//! 3. Environment variables prefixed `DUEQ__`, e.g. `DUEQ__DEFAULTS__VT=60`

use crate::error::{ConfigurationError, ValidationError};
use crate::keys::{Namespace, DEFAULT_NAMESPACE};
use crate::message::{MaxSize, QueueRecord, DEFAULT_VT_SECONDS};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "DUEQ";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DueqConfig {
    /// Prefix for every store key
    pub namespace: String,

    /// Publish queue depth on every send
    pub realtime: bool,

    /// Settings applied to queues created without explicit options
    pub defaults: QueueDefaults,

    pub logging: LoggingConfig,
}

impl Default for DueqConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            realtime: false,
            defaults: QueueDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DueqConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let loaded: DueqConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check every value is within its accepted range
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        Namespace::new(self.namespace.as_str()).map_err(invalid)?;
        self.defaults.to_record().map_err(invalid)?;
        if self.logging.level.trim().is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "logging.level must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// The validated key namespace
    pub fn namespace(&self) -> Result<Namespace, ConfigurationError> {
        Namespace::new(self.namespace.as_str()).map_err(invalid)
    }
}

fn invalid(err: impl std::fmt::Display) -> ConfigurationError {
    ConfigurationError::Invalid {
        message: err.to_string(),
    }
}

/// Defaults for newly created queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueDefaults {
    /// Visibility timeout in seconds
    pub vt: u32,

    /// Delivery delay in seconds
    pub delay: u32,

    /// Payload limit in bytes, or -1 for unlimited
    pub maxsize: MaxSize,
}

impl Default for QueueDefaults {
    fn default() -> Self {
        Self {
            vt: DEFAULT_VT_SECONDS,
            delay: 0,
            maxsize: MaxSize::default(),
        }
    }
}

impl QueueDefaults {
    /// Validate and convert into queue creation settings
    pub fn to_record(&self) -> Result<QueueRecord, ValidationError> {
        let record = QueueRecord {
            vt: self.vt,
            delay: self.delay,
            maxsize: self.maxsize,
        };
        record.validate()?;
        Ok(record)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}
