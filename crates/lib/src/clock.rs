//! Time provider abstraction
//!
//! Provides a [`Clock`] trait that abstracts over time sources, allowing
//! production code to use real system time while tests drive a controllable
//! mock clock through the same seam.

use std::fmt::Debug;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// A time provider for getting current timestamps.
///
/// Every engine in this crate takes a clock at construction so that tests
/// can pin or advance time deterministically (baseline learning, response
/// deadlines, audit ordering).
pub trait Clock: Send + Sync + Debug {
    /// Returns the current time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Returns the current time as milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64 {
        self.now_utc().timestamp_millis()
    }
}

/// Production clock using real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock pinned to an explicit instant.
///
/// Time only moves when the test calls [`FixedClock::advance`] or
/// [`FixedClock::set`], which keeps timestamp-sensitive assertions stable.
#[derive(Debug)]
pub struct FixedClock {
    millis: Mutex<i64>,
}

impl FixedClock {
    /// Create a clock pinned to the given milliseconds since the Unix epoch.
    pub fn new(millis: i64) -> Self {
        Self {
            millis: Mutex::new(millis),
        }
    }

    /// Create a clock pinned to the given UTC timestamp.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self::new(instant.timestamp_millis())
    }

    /// Advance the clock by the given number of milliseconds.
    pub fn advance(&self, ms: i64) {
        *self.millis.lock().unwrap() += ms;
    }

    /// Pin the clock to a specific time in milliseconds.
    pub fn set(&self, ms: i64) {
        *self.millis.lock().unwrap() = ms;
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        // 2024-01-01 00:00:00 UTC
        Self::new(1_704_067_200_000)
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let millis = *self.millis.lock().unwrap();
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }
}
