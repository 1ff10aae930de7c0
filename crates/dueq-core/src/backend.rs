//! Storage backend capability interface.
//!
//! The queue never talks to a store directly. It describes work as
//! [`Command`] batches and named [`Procedure`] calls, and a [`StoreBackend`]
//! executes them with the store's atomicity guarantee. Key routing (which
//! connection or shard owns a key) is the backend's concern.

use crate::clock::StoreTime;
use crate::error::BackendError;
use crate::keys::QueueKeys;
use async_trait::async_trait;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::fmt;

// ============================================================================
// Commands and Replies
// ============================================================================

/// Bound of a sorted-set score range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBound {
    NegInfinity,
    Inclusive(i64),
    PosInfinity,
}

impl ScoreBound {
    pub(crate) fn admits_min(&self, score: i64) -> bool {
        match self {
            Self::NegInfinity => true,
            Self::Inclusive(min) => score >= *min,
            Self::PosInfinity => false,
        }
    }

    pub(crate) fn admits_max(&self, score: i64) -> bool {
        match self {
            Self::NegInfinity => false,
            Self::Inclusive(max) => score <= *max,
            Self::PosInfinity => true,
        }
    }
}

/// A single store command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    HGet { key: String, field: String },
    HMGet { key: String, fields: Vec<String> },
    HSet { key: String, field: String, value: Bytes },
    HIncrBy { key: String, field: String, by: i64 },
    HDel { key: String, fields: Vec<String> },
    ZAdd { key: String, member: String, score: i64 },
    ZRem { key: String, member: String },
    ZScore { key: String, member: String },
    ZCard { key: String },
    ZCount { key: String, min: ScoreBound, max: ScoreBound },
    SAdd { key: String, member: String },
    SRem { key: String, member: String },
    SMembers { key: String },
    Del { key: String },
}

impl Command {
    /// Whether the command leaves the store unchanged
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::HGet { .. }
                | Self::HMGet { .. }
                | Self::ZScore { .. }
                | Self::ZCard { .. }
                | Self::ZCount { .. }
                | Self::SMembers { .. }
        )
    }

    /// Key the command operates on
    pub fn key(&self) -> &str {
        match self {
            Self::HGet { key, .. }
            | Self::HMGet { key, .. }
            | Self::HSet { key, .. }
            | Self::HIncrBy { key, .. }
            | Self::HDel { key, .. }
            | Self::ZAdd { key, .. }
            | Self::ZRem { key, .. }
            | Self::ZScore { key, .. }
            | Self::ZCard { key }
            | Self::ZCount { key, .. }
            | Self::SAdd { key, .. }
            | Self::SRem { key, .. }
            | Self::SMembers { key }
            | Self::Del { key } => key,
        }
    }
}

/// Precondition checked inside the same atomic unit as a write batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchGuard {
    /// The hash field must be present
    FieldExists { key: String, field: String },
    /// The hash field must be absent
    FieldAbsent { key: String, field: String },
}

impl BatchGuard {
    pub fn key(&self) -> &str {
        match self {
            Self::FieldExists { key, .. } | Self::FieldAbsent { key, .. } => key,
        }
    }
}

/// A store reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Integer(i64),
    Bulk(Bytes),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn as_integer(&self, key: &str) -> Result<i64, BackendError> {
        match self {
            Self::Integer(value) => Ok(*value),
            _ => Err(unexpected_reply(key, "integer")),
        }
    }

    /// Optional bulk value; `Nil` maps to `None`
    pub fn into_bulk(self, key: &str) -> Result<Option<Bytes>, BackendError> {
        match self {
            Self::Nil => Ok(None),
            Self::Bulk(bytes) => Ok(Some(bytes)),
            _ => Err(unexpected_reply(key, "bulk value")),
        }
    }

    pub fn into_array(self, key: &str) -> Result<Vec<Reply>, BackendError> {
        match self {
            Self::Array(items) => Ok(items),
            _ => Err(unexpected_reply(key, "array")),
        }
    }

    /// Optional bulk value parsed as a decimal integer
    pub fn parse_integer(self, key: &str) -> Result<Option<i64>, BackendError> {
        match self.into_bulk(key)? {
            None => Ok(None),
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|text| text.parse().ok())
                .map(Some)
                .ok_or_else(|| BackendError::CorruptValue {
                    key: key.to_string(),
                    expected: "integer".to_string(),
                }),
        }
    }
}

fn unexpected_reply(key: &str, expected: &str) -> BackendError {
    BackendError::CorruptValue {
        key: key.to_string(),
        expected: expected.to_string(),
    }
}

// ============================================================================
// Procedures
// ============================================================================

// Script sources for stores that run procedures as server-side Lua. The
// in-memory backend executes the same steps natively and only uses these to
// derive handles. Arguments follow `ProcedureCall::script_keys` and
// `ProcedureCall::script_args`.

const RECEIVE_SCRIPT: &str = r#"
local ids = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", "0", "1")
if #ids == 0 then
  return {}
end
local id = ids[1]
redis.call("ZADD", KEYS[1], ARGV[2], id)
redis.call("HINCRBY", KEYS[2], "totalrecv", 1)
local body = redis.call("HGET", KEYS[2], id)
local rc = redis.call("HINCRBY", KEYS[2], id .. ":rc", 1)
local fr = ARGV[1]
if rc == 1 then
  redis.call("HSET", KEYS[2], id .. ":fr", ARGV[1])
else
  fr = redis.call("HGET", KEYS[2], id .. ":fr")
end
return {id, body, rc, fr}
"#;

const POP_SCRIPT: &str = r#"
local ids = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", "0", "1")
if #ids == 0 then
  return {}
end
local id = ids[1]
redis.call("HINCRBY", KEYS[2], "totalrecv", 1)
local body = redis.call("HGET", KEYS[2], id)
local rc = redis.call("HINCRBY", KEYS[2], id .. ":rc", 1)
local fr = ARGV[1]
if rc > 1 then
  fr = redis.call("HGET", KEYS[2], id .. ":fr")
end
redis.call("ZREM", KEYS[1], id)
redis.call("HDEL", KEYS[2], id, id .. ":rc", id .. ":fr")
return {id, body, rc, fr}
"#;

const CHANGE_VISIBILITY_SCRIPT: &str = r#"
if redis.call("ZSCORE", KEYS[1], ARGV[1]) then
  redis.call("ZADD", KEYS[1], ARGV[2], ARGV[1])
  return 1
end
return 0
"#;

/// The indivisible select-and-mutate procedures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Procedure {
    Receive,
    Pop,
    ChangeVisibility,
}

impl Procedure {
    pub const ALL: [Procedure; 3] = [Self::Receive, Self::Pop, Self::ChangeVisibility];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Pop => "pop",
            Self::ChangeVisibility => "change_visibility",
        }
    }

    /// Script source submitted to stores that compile procedures
    pub fn script(&self) -> &'static str {
        match self {
            Self::Receive => RECEIVE_SCRIPT,
            Self::Pop => POP_SCRIPT,
            Self::ChangeVisibility => CHANGE_VISIBILITY_SCRIPT,
        }
    }

    /// Handle the store assigns to this procedure once loaded
    pub fn handle(&self) -> ProcedureHandle {
        ProcedureHandle::for_script(self.script())
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Store-side handle of a loaded procedure: the hex SHA-1 of its script
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcedureHandle(String);

impl ProcedureHandle {
    pub fn for_script(script: &str) -> Self {
        Self(hex::encode(Sha1::digest(script.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcedureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Arguments of one procedure invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureCall {
    Receive {
        keys: QueueKeys,
        now_ms: i64,
        new_due_ms: i64,
    },
    Pop {
        keys: QueueKeys,
        now_ms: i64,
    },
    ChangeVisibility {
        keys: QueueKeys,
        id: String,
        new_due_ms: i64,
    },
}

impl ProcedureCall {
    pub fn procedure(&self) -> Procedure {
        match self {
            Self::Receive { .. } => Procedure::Receive,
            Self::Pop { .. } => Procedure::Pop,
            Self::ChangeVisibility { .. } => Procedure::ChangeVisibility,
        }
    }

    /// `KEYS` for the procedure's script, in order
    pub fn script_keys(&self) -> Vec<String> {
        match self {
            Self::Receive { keys, .. } | Self::Pop { keys, .. } => {
                vec![keys.index.clone(), keys.hash.clone()]
            }
            Self::ChangeVisibility { keys, .. } => vec![keys.index.clone()],
        }
    }

    /// `ARGV` for the procedure's script, in order
    pub fn script_args(&self) -> Vec<String> {
        match self {
            Self::Receive {
                now_ms, new_due_ms, ..
            } => vec![now_ms.to_string(), new_due_ms.to_string()],
            Self::Pop { now_ms, .. } => vec![now_ms.to_string()],
            Self::ChangeVisibility { id, new_due_ms, .. } => {
                vec![id.clone(), new_due_ms.to_string()]
            }
        }
    }
}

/// A message selected by receive or pop, as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub body: Bytes,
    pub rc: u64,
    pub fr: i64,
}

/// Result of one procedure invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureReply {
    /// Receive or pop; `None` when nothing was due
    Delivered(Option<Delivery>),
    /// Change-visibility; `false` when the message had no index entry
    Updated(bool),
}

// ============================================================================
// Backend Trait
// ============================================================================

/// Capabilities a store must offer to host queues
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Run read-only commands against one consistent snapshot
    async fn read(&self, commands: Vec<Command>) -> Result<Vec<Reply>, BackendError>;

    /// Run a batch of commands as one all-or-nothing unit
    async fn atomic_write_batch(&self, commands: Vec<Command>) -> Result<Vec<Reply>, BackendError>;

    /// Run a batch as one all-or-nothing unit only if `guard` holds.
    ///
    /// The guard is evaluated in the same unit as the writes, so no other
    /// client can act between the check and the batch. Returns `None`
    /// without writing anything when the guard fails.
    async fn guarded_write_batch(
        &self,
        guard: BatchGuard,
        commands: Vec<Command>,
    ) -> Result<Option<Vec<Reply>>, BackendError>;

    /// Register a procedure with the store and return its handle
    async fn load_procedure(&self, procedure: Procedure) -> Result<ProcedureHandle, BackendError>;

    /// Invoke a loaded procedure as one indivisible unit.
    ///
    /// Fails with [`BackendError::ProcedureNotLoaded`] when the store no
    /// longer knows the handle.
    async fn atomic_procedure(
        &self,
        handle: &ProcedureHandle,
        call: ProcedureCall,
    ) -> Result<ProcedureReply, BackendError>;

    /// The store's clock
    async fn current_time(&self) -> Result<StoreTime, BackendError>;

    /// Publish to a topic, returning the number of receivers
    async fn publish(&self, topic: &str, payload: String) -> Result<usize, BackendError>;
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
