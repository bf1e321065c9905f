//! Timestamp authority.

use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::types::Timestamp;

/// Source of logical "now" timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current logical time.
    fn now(&self) -> Timestamp;
}

/// Wall clock in milliseconds, strictly increasing within the process.
///
/// Two mutations issued in the same millisecond still get distinct,
/// ordered stamps.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Timestamp::from_millis(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start.as_millis()),
        }
    }

    /// Move the clock to an absolute time.
    pub fn set(&self, at: Timestamp) {
        self.now.store(at.as_millis(), Ordering::Release);
    }

    /// Move the clock forward and return the new time.
    pub fn advance(&self, millis: i64) -> Timestamp {
        Timestamp::from_millis(self.now.fetch_add(millis, Ordering::AcqRel) + millis)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now.load(Ordering::Acquire))
    }
}
