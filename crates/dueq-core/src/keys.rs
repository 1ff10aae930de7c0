//! Store key layout.
//!
//! Every key is prefixed with a namespace:
//!
//! - `<ns>:<queue>:Q` hash holding the queue config, counters and message bodies
//! - `<ns>:<queue>` sorted set mapping message id to due-time in milliseconds
//! - `<ns>:QUEUES` set of queue names
//! - `<ns>:rt:<queue>` notification topic for queue depth

use crate::error::ValidationError;
use crate::id::MessageId;
use crate::message::QueueName;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

pub const FIELD_VT: &str = "vt";
pub const FIELD_DELAY: &str = "delay";
pub const FIELD_MAXSIZE: &str = "maxsize";
pub const FIELD_CREATED: &str = "created";
pub const FIELD_MODIFIED: &str = "modified";
pub const FIELD_TOTALRECV: &str = "totalrecv";
pub const FIELD_TOTALSENT: &str = "totalsent";

/// Default key prefix
pub const DEFAULT_NAMESPACE: &str = "dueq";

static NAMESPACE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("namespace pattern is valid"));

/// Validated key prefix shared by every queue of one deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(ns: impl Into<String>) -> Result<Self, ValidationError> {
        let ns = ns.into();
        if !NAMESPACE_PATTERN.is_match(&ns) {
            return Err(ValidationError::InvalidFormat {
                field: "namespace".to_string(),
                message: "must be 1-64 characters of [A-Za-z0-9_-]".to_string(),
            });
        }
        Ok(Self(ns))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the set that registers every queue name
    pub fn registry_key(&self) -> String {
        format!("{}:QUEUES", self.0)
    }

    pub fn queue_keys(&self, queue: &QueueName) -> QueueKeys {
        QueueKeys {
            index: format!("{}:{}", self.0, queue),
            hash: format!("{}:{}:Q", self.0, queue),
            topic: format!("{}:rt:{}", self.0, queue),
        }
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self(DEFAULT_NAMESPACE.to_string())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The store keys belonging to one queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    /// Sorted set of message ids scored by due-time
    pub index: String,
    /// Hash of config fields and message bodies
    pub hash: String,
    /// Depth notification topic
    pub topic: String,
}

/// Hash field holding a message's receive count
pub fn rc_field(id: &str) -> String {
    format!("{}:rc", id)
}

/// Hash field holding a message's first-receive time
pub fn fr_field(id: &str) -> String {
    format!("{}:fr", id)
}

/// Every hash field owned by one message
pub fn message_fields(id: &MessageId) -> Vec<String> {
    vec![
        id.as_str().to_string(),
        rc_field(id.as_str()),
        fr_field(id.as_str()),
    ]
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
