// SPDX-License-Identifier: MIT

//! Clock abstraction for testable time handling.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A clock that provides the current time as Unix epoch seconds.
///
/// Status timestamps (`startTime`, `stopTime`) are epoch seconds with
/// fractional precision, matching the original implementation's
/// `time.time()` convention.
pub trait Clock: Clone + Send + Sync + 'static {
    fn epoch_secs(&self) -> f64;
}

/// Real system clock.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_secs(&self) -> f64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
    }
}

/// Fake clock for deterministic tests.
#[derive(Clone)]
pub struct FakeClock {
    epoch_secs: Arc<Mutex<f64>>,
}

impl FakeClock {
    pub fn new(start: f64) -> Self {
        Self { epoch_secs: Arc::new(Mutex::new(start)) }
    }

    pub fn advance(&self, secs: f64) {
        *self.epoch_secs.lock() += secs;
    }

    pub fn set(&self, secs: f64) {
        *self.epoch_secs.lock() = secs;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(1_700_000_000.0)
    }
}

impl Clock for FakeClock {
    fn epoch_secs(&self) -> f64 {
        *self.epoch_secs.lock()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
