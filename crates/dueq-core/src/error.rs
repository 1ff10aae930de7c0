//! Error types for queue operations.

use thiserror::Error;

/// Result alias used by every facade operation.
pub type QueueResult<T> = Result<T, QueueError>;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Queue already exists: {queue_name}")]
    QueueAlreadyExists { queue_name: String },

    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    PayloadTooLarge { size: usize, max_size: usize },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl QueueError {
    /// Check if error is transient and may succeed when retried by the caller.
    ///
    /// The queue itself never retries; this is a hint for an outer retry policy.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::QueueAlreadyExists { .. } => false,
            Self::MessageNotFound { .. } => false,
            Self::PayloadTooLarge { .. } => false,
            Self::Validation(_) => false,
            Self::Backend(err) => err.is_transient(),
            Self::Configuration(_) => false,
        }
    }
}

/// Input rejected before any store access
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

/// Failures reported by a storage backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The store no longer knows the procedure handle (e.g. after a restart).
    #[error("Procedure not loaded: {handle}")]
    ProcedureNotLoaded { handle: String },

    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("Stored value under '{key}' is not a valid {expected}")]
    CorruptValue { key: String, expected: String },

    #[error("Key '{key}' holds a value of the wrong type")]
    WrongType { key: String },

    #[error("Command not allowed here: {message}")]
    InvalidCommand { message: String },
}

impl BackendError {
    /// Check if error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ProcedureNotLoaded { .. } => true,
            Self::Unavailable { .. } => true,
            Self::CorruptValue { .. } => false,
            Self::WrongType { .. } => false,
            Self::InvalidCommand { .. } => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Parsing {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
