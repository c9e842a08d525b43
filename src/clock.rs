//! Wall-clock time sources
//!
//! Logical expiry, sale windows and identifier time segments all read the
//! clock through this trait so tests can drive time by hand.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to an absolute time (may go backwards)
    pub fn set(&self, time: DateTime<Utc>) {
        *self.now.lock() = time;
    }

    /// Move the clock forward
    pub fn advance(&self, delta: std::time::Duration) {
        let delta = ChronoDuration::from_std(delta).unwrap_or(ChronoDuration::zero());
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
