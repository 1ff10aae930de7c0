//! Time source for the store.
//!
//! Every scheduling comparison inside one operation uses a single reading
//! taken from the backend's clock, never the caller's local clock. The
//! [`Clock`] trait lets the in-memory backend run on wall time in production
//! and on a hand-advanced clock in tests.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const MICROS_PER_SECOND: i64 = 1_000_000;

/// A store clock reading: whole seconds plus a microsecond fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreTime {
    secs: i64,
    micros: u32,
}

impl StoreTime {
    /// Create a reading, normalising a fraction of one second or more.
    pub fn new(secs: i64, micros: u32) -> Self {
        Self::from_micros(secs * MICROS_PER_SECOND + i64::from(micros))
    }

    /// Create a reading on a whole second
    pub const fn from_secs(secs: i64) -> Self {
        Self { secs, micros: 0 }
    }

    /// Create a reading from microseconds since the epoch
    pub fn from_micros(total: i64) -> Self {
        Self {
            secs: total.div_euclid(MICROS_PER_SECOND),
            micros: total.rem_euclid(MICROS_PER_SECOND) as u32,
        }
    }

    /// Create a reading from milliseconds since the epoch
    pub fn from_millis(millis: i64) -> Self {
        Self::from_micros(millis * 1_000)
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn micros(&self) -> u32 {
        self.micros
    }

    /// Microseconds since the epoch
    pub fn as_micros(&self) -> i64 {
        self.secs * MICROS_PER_SECOND + i64::from(self.micros)
    }

    /// Milliseconds since the epoch; the unit of every due-time in the index.
    pub fn as_millis(&self) -> i64 {
        self.secs * 1_000 + i64::from(self.micros / 1_000)
    }

    /// The decimal digits `<secs><micros:06>` read as one integer, which is
    /// the value the id generator encodes.
    ///
    /// `None` for readings before the epoch or past the range of `u64`.
    pub fn timestamp_digits(&self) -> Option<u64> {
        u64::try_from(self.secs)
            .ok()?
            .checked_mul(MICROS_PER_SECOND as u64)?
            .checked_add(u64::from(self.micros))
    }

    /// Convert to a chrono timestamp
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.secs, self.micros * 1_000).single()
    }
}

impl fmt::Display for StoreTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

impl From<DateTime<Utc>> for StoreTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::new(dt.timestamp(), dt.timestamp_subsec_micros())
    }
}

/// Clock provides the current time to a backend
pub trait Clock: Send + Sync {
    fn now(&self) -> StoreTime;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> StoreTime {
        StoreTime::from(Utc::now())
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same reading, so a test can keep one handle and give
/// another to the backend.
#[derive(Debug, Clone)]
pub struct ManualClock {
    micros: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: StoreTime) -> Self {
        Self {
            micros: Arc::new(AtomicI64::new(start.as_micros())),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, to: StoreTime) {
        self.micros.store(to.as_micros(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> StoreTime {
        StoreTime::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
