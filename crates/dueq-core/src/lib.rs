//! # dueq
//!
//! At-least-once message queues with visibility timeouts, built on a shared
//! key-value/ordered-set store rather than a dedicated broker.
//!
//! Each queue keeps its messages in an index ordered by due-time. Receiving a
//! message leases it: its due-time moves forward by the visibility timeout,
//! and if it is not deleted before then it becomes eligible again with an
//! incremented receive count.
//!
//! This library provides:
//! - Queue lifecycle (create, list, inspect, reconfigure, delete)
//! - Send with optional delay, receive with a lease, pop, delete
//! - Time-ordered 32-character message ids
//! - A storage backend trait and an in-memory implementation
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`clock`] - Store time readings and clock sources
//! - [`id`] - Message id generation and validation
//! - [`message`] - Queue names, settings, attributes and received messages
//! - [`keys`] - Store key layout
//! - [`backend`] - Storage backend capability trait
//! - [`backends`] - Backend implementations
//! - [`engine`] - Atomic receive, pop and change-visibility procedures
//! - [`queue`] - The [`MessageQueue`] facade
//! - [`config`] - Configuration loading
//! - [`telemetry`] - Tracing setup

pub mod backend;
pub mod backends;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod id;
pub mod keys;
pub mod message;
pub mod queue;
pub mod telemetry;

// Re-export commonly used types at crate root for convenience
pub use backend::StoreBackend;
pub use backends::InMemoryBackend;
pub use clock::{Clock, ManualClock, StoreTime, SystemClock};
pub use config::{DueqConfig, LoggingConfig, QueueDefaults};
pub use error::{BackendError, ConfigurationError, QueueError, QueueResult, ValidationError};
pub use id::{IdGenerator, MessageId};
pub use message::{
    validate_delay, validate_vt, MaxSize, QueueAttributes, QueueAttributesUpdate, QueueName,
    QueueRecord, ReceivedMessage,
};
pub use queue::MessageQueue;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
