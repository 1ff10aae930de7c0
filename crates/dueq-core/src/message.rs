//! Queue and message types including core domain identifiers.

use crate::error::ValidationError;
use crate::id::MessageId;
use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Largest accepted visibility timeout or delay, in seconds
pub const MAX_DELAY_SECONDS: u32 = 9_999_999;

/// Smallest configurable message size limit, in bytes
pub const MIN_MESSAGE_SIZE: u32 = 1024;

/// Largest configurable message size limit, in bytes
pub const MAX_PAYLOAD_SIZE: u32 = 65536;

/// Default visibility timeout for new queues, in seconds
pub const DEFAULT_VT_SECONDS: u32 = 30;

static QUEUE_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,160}$").expect("queue name pattern is valid"));

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if !QUEUE_NAME_PATTERN.is_match(&name) {
            return Err(ValidationError::InvalidFormat {
                field: "queue".to_string(),
                message: "must be 1-160 characters of [A-Za-z0-9_-]".to_string(),
            });
        }
        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Validate a visibility timeout in seconds
pub fn validate_vt(vt: u32) -> Result<u32, ValidationError> {
    validate_seconds("vt", vt)
}

/// Validate a delivery delay in seconds
pub fn validate_delay(delay: u32) -> Result<u32, ValidationError> {
    validate_seconds("delay", delay)
}

fn validate_seconds(field: &str, value: u32) -> Result<u32, ValidationError> {
    if value > MAX_DELAY_SECONDS {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: format!("must be between 0 and {}", MAX_DELAY_SECONDS),
        });
    }
    Ok(value)
}

// ============================================================================
// Queue Configuration
// ============================================================================

/// Per-queue payload size limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum MaxSize {
    Bytes(u32),
    Unlimited,
}

impl MaxSize {
    /// Stored representation of [`MaxSize::Unlimited`]
    pub const UNLIMITED_SENTINEL: i64 = -1;

    /// Create a bounded limit, validating the range
    pub fn new(bytes: u32) -> Result<Self, ValidationError> {
        if !(MIN_MESSAGE_SIZE..=MAX_PAYLOAD_SIZE).contains(&bytes) {
            return Err(ValidationError::OutOfRange {
                field: "maxsize".to_string(),
                message: format!(
                    "must be between {} and {}",
                    MIN_MESSAGE_SIZE, MAX_PAYLOAD_SIZE
                ),
            });
        }
        Ok(Self::Bytes(bytes))
    }

    /// Check a payload length against the limit
    pub fn admits(&self, len: usize) -> bool {
        match self {
            Self::Bytes(max) => len <= *max as usize,
            Self::Unlimited => true,
        }
    }
}

impl Default for MaxSize {
    fn default() -> Self {
        Self::Bytes(MAX_PAYLOAD_SIZE)
    }
}

impl From<MaxSize> for i64 {
    fn from(size: MaxSize) -> Self {
        match size {
            MaxSize::Bytes(bytes) => i64::from(bytes),
            MaxSize::Unlimited => MaxSize::UNLIMITED_SENTINEL,
        }
    }
}

impl TryFrom<i64> for MaxSize {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value == Self::UNLIMITED_SENTINEL {
            return Ok(Self::Unlimited);
        }
        let bytes = u32::try_from(value).map_err(|_| ValidationError::OutOfRange {
            field: "maxsize".to_string(),
            message: format!("{} is not a valid size", value),
        })?;
        Self::new(bytes)
    }
}

impl fmt::Display for MaxSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "{}", bytes),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// Per-queue scheduling settings.
///
/// Supplied when a queue is created, and read back from the queue's record
/// before every send and receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRecord {
    pub vt: u32,
    pub delay: u32,
    pub maxsize: MaxSize,
}

impl Default for QueueRecord {
    fn default() -> Self {
        Self {
            vt: DEFAULT_VT_SECONDS,
            delay: 0,
            maxsize: MaxSize::default(),
        }
    }
}

impl QueueRecord {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_vt(self.vt)?;
        validate_delay(self.delay)?;
        if let MaxSize::Bytes(bytes) = self.maxsize {
            MaxSize::new(bytes)?;
        }
        Ok(())
    }
}

/// Snapshot of a queue's configuration, counters and depth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAttributes {
    /// Default visibility timeout in seconds
    pub vt: u32,
    /// Default delivery delay in seconds
    pub delay: u32,
    pub maxsize: MaxSize,
    /// Total deliveries across the queue's lifetime
    pub totalrecv: u64,
    /// Total messages sent across the queue's lifetime
    pub totalsent: u64,
    /// Creation time, epoch milliseconds
    pub created: i64,
    /// Last attribute change, epoch milliseconds
    pub modified: i64,
    /// Messages currently in the queue
    pub msgs: u64,
    /// Messages not yet eligible for delivery
    pub hiddenmsgs: u64,
}

/// Changes applied by `set_queue_attributes`; `None` leaves a field alone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueAttributesUpdate {
    pub vt: Option<u32>,
    pub delay: Option<u32>,
    pub maxsize: Option<MaxSize>,
}

impl QueueAttributesUpdate {
    pub fn vt(mut self, vt: u32) -> Self {
        self.vt = Some(vt);
        self
    }

    pub fn delay(mut self, delay: u32) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn maxsize(mut self, maxsize: MaxSize) -> Self {
        self.maxsize = Some(maxsize);
        self
    }

    /// Validate every supplied field
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(vt) = self.vt {
            validate_vt(vt)?;
        }
        if let Some(delay) = self.delay {
            validate_delay(delay)?;
        }
        if let Some(MaxSize::Bytes(bytes)) = self.maxsize {
            MaxSize::new(bytes)?;
        }
        Ok(())
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message handed to a consumer by receive or pop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub id: MessageId,
    pub body: Bytes,
    /// Number of times this message has been delivered, this delivery included
    pub rc: u64,
    /// Time of the first delivery, epoch milliseconds
    pub fr: i64,
    /// Time the message was sent, epoch milliseconds
    pub sent_at: i64,
}

impl ReceivedMessage {
    /// Body as UTF-8 text, if it is valid UTF-8
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
