//! Time source abstraction
//!
//! Slot state and delay detection read "now" only through [`Clock`], so tests
//! can drive time explicitly with [`ManualClock`].

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current time in epoch milliseconds
pub trait Clock: Send + Sync + 'static {
    /// Current time in milliseconds since the epoch
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by `chrono`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `now_millis`
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    /// Set the current time
    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    /// Move the clock forward by `millis`
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
