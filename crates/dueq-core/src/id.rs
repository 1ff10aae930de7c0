//! Message identifiers.
//!
//! An id is 32 characters: a fixed-width base-36 encoding of the store time
//! at which the message was sent, followed by a random suffix. Because the
//! timestamp part is zero-padded and base-36 digits sort in ASCII order, ids
//! generated at increasing times also sort lexicographically.

use crate::clock::StoreTime;
use crate::error::ValidationError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{LazyLock, Mutex};

/// Total id length
pub const ID_LENGTH: usize = 32;

/// Width of the base-36 timestamp prefix
pub const TIMESTAMP_WIDTH: usize = 10;

/// Width of the random suffix
pub const SUFFIX_LENGTH: usize = ID_LENGTH - TIMESTAMP_WIDTH;

const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const BASE36_DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static MESSAGE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9:]{32}$").expect("message id pattern is valid"));

/// Validated message identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Parse and validate an id supplied by a caller
    pub fn parse(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if !MESSAGE_ID_PATTERN.is_match(&id) {
            return Err(ValidationError::InvalidFormat {
                field: "id".to_string(),
                message: "must be exactly 32 characters of [A-Za-z0-9:]".to_string(),
            });
        }
        Ok(Self(id))
    }

    /// Wrap an id read back from the store
    pub(crate) fn from_store(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Send time in epoch milliseconds, decoded from the timestamp prefix.
    ///
    /// Returns `None` if the prefix is not base-36.
    pub fn sent_at_millis(&self) -> Option<i64> {
        let prefix = self.0.get(..TIMESTAMP_WIDTH)?;
        let micros = u64::from_str_radix(prefix, 36).ok()?;
        i64::try_from(micros / 1_000).ok()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Largest timestamp that fits the fixed-width base-36 prefix
const MAX_TIMESTAMP_DIGITS: u64 = 36u64.pow(TIMESTAMP_WIDTH as u32) - 1;

/// Build an id from a time reading and a randomness source.
///
/// Pure apart from the RNG, so a seeded RNG reproduces the same id. Fails for
/// readings the timestamp prefix cannot hold: before the epoch or past
/// `36^10` microseconds.
pub fn build_id<R: Rng>(at: StoreTime, rng: &mut R) -> Result<MessageId, ValidationError> {
    let digits = at
        .timestamp_digits()
        .filter(|digits| *digits <= MAX_TIMESTAMP_DIGITS)
        .ok_or_else(|| ValidationError::OutOfRange {
            field: "timestamp".to_string(),
            message: format!("store time {} cannot be encoded in a message id", at),
        })?;

    let mut id = encode_base36(digits, TIMESTAMP_WIDTH);
    for _ in 0..SUFFIX_LENGTH {
        let idx = rng.gen_range(0..SUFFIX_ALPHABET.len());
        id.push(SUFFIX_ALPHABET[idx] as char);
    }
    Ok(MessageId(id))
}

fn encode_base36(mut value: u64, width: usize) -> String {
    let mut digits = Vec::with_capacity(width);
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    while digits.len() < width {
        digits.push(b'0');
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Generates message ids from store time readings
pub struct IdGenerator {
    rng: Mutex<StdRng>,
}

impl IdGenerator {
    /// Generator seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator for tests
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn generate(&self, at: StoreTime) -> Result<MessageId, ValidationError> {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        build_id(at, &mut *rng)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
