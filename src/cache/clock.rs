//! Time sources for freshness decisions.

use std::sync::Mutex;

use time::{Duration, OffsetDateTime};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::clock";

/// Wall-clock source consulted by the cache whenever it needs "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// UTC system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Manually advanced clock for deterministic tests and tooling.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, value: OffsetDateTime) {
        *mutex_lock(&self.now, SOURCE, "set") = value;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = mutex_lock(&self.now, SOURCE, "advance");
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *mutex_lock(&self.now, SOURCE, "now")
    }
}
