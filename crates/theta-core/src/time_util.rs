//! Time utilities.
//!
//! Epoch timestamps for records and telemetry, `HH:MM:SS` session-time
//! parsing, and the [`Clock`] used to evaluate the session deadline.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{Local, NaiveTime, Timelike};
use parking_lot::Mutex;

use crate::error::ThetaError;

// ---------------------------------------------------------------------------
// Epoch timestamps
// ---------------------------------------------------------------------------

#[inline]
fn since_epoch() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    since_epoch().as_millis() as u64
}

/// Current time as **microseconds** since Unix epoch.
#[inline]
pub fn now_us() -> u64 {
    since_epoch().as_micros() as u64
}

/// Current time as **nanoseconds** since Unix epoch.
#[inline]
pub fn now_ns() -> u64 {
    since_epoch().as_nanos() as u64
}

// ---------------------------------------------------------------------------
// Session times
// ---------------------------------------------------------------------------

/// Parse a local time of day in `HH:MM:SS` (or `HH:MM`) form.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ThetaError> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| ThetaError::Config(format!("invalid time of day '{s}': {e}")))
}

/// How long to wait from `now` until the next occurrence of `target`.
///
/// If `target` has already passed today, the wait runs to tomorrow's
/// occurrence.
pub fn delay_until(now: NaiveTime, target: NaiveTime) -> Duration {
    const DAY_SECS: i64 = 24 * 60 * 60;
    let now_s = now.num_seconds_from_midnight() as i64;
    let target_s = target.num_seconds_from_midnight() as i64;
    let mut secs = target_s - now_s;
    if secs <= 0 {
        secs += DAY_SECS;
    }
    let nanos = now.nanosecond().min(999_999_999) as u64;
    Duration::from_secs(secs as u64).saturating_sub(Duration::from_nanos(nanos))
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of the local time of day used for deadline checks.
pub trait Clock: Send + Sync {
    fn time_of_day(&self) -> NaiveTime;
}

/// Wall clock in the local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn time_of_day(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// A clock that only moves when told to. Used for replays and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveTime>,
}

impl ManualClock {
    pub fn new(now: NaiveTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: NaiveTime) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn time_of_day(&self) -> NaiveTime {
        *self.now.lock()
    }
}
