//! Injectable clock: a monotonic instant source plus a wall-clock source.
//!
//! Scheduler and rate-limit code depend on [`Clock`] rather than calling
//! `Instant::now()`/`Utc::now()` directly, so tests can drive time deterministically.

use chrono::{DateTime, Utc};
use std::time::Instant;

/// A source of monotonic and wall-clock time.
pub trait Clock: Send + Sync {
    /// Monotonic instant, used for interval/timeout arithmetic.
    fn now_monotonic(&self) -> Instant;
    /// Wall-clock time, used for timestamps persisted to records and events.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A fixed clock for tests: returns the same instant/timestamp every call unless advanced.
#[cfg(any(test, feature = "test-util"))]
pub struct FixedClock {
    monotonic: std::sync::Mutex<Instant>,
    utc: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(any(test, feature = "test-util"))]
impl FixedClock {
    pub fn new(utc: DateTime<Utc>) -> Self {
        Self {
            monotonic: std::sync::Mutex::new(Instant::now()),
            utc: std::sync::Mutex::new(utc),
        }
    }

    pub fn advance(&self, duration: std::time::Duration) {
        *self.utc.lock().unwrap() += chrono::Duration::from_std(duration).unwrap();
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Clock for FixedClock {
    fn now_monotonic(&self) -> Instant {
        *self.monotonic.lock().unwrap()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        *self.utc.lock().unwrap()
    }
}
