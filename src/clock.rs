//! Clock abstraction consumed by the wheel.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A source of the current time, expressed as a millisecond timestamp.
///
/// All comparisons inside the wheel go through a single `Clock`, so the
/// implementation only needs to be internally consistent with itself; it
/// need not be wall-clock accurate.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Production clock. Anchors a monotonic [`Instant`] to a wall-clock
/// timestamp once at construction, then derives `now_ms` from elapsed
/// monotonic time so the wheel is immune to wall-clock adjustments.
pub struct SystemClock {
    epoch: Instant,
    epoch_ms: i64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_ms: wall_clock_ms(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        self.epoch_ms + self.epoch.elapsed().as_millis() as i64
    }
}

fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_millis() as i64
}

/// A clock double for deterministic tests: time only moves when told to.
pub struct TestClock {
    now_ms: AtomicI64,
}

impl TestClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::AcqRel);
    }

    pub fn set_ms(&self, value_ms: i64) {
        self.now_ms.store(value_ms, Ordering::Release);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic_nondecreasing() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = clock.now_ms();
        assert!(b >= a);
    }

    #[test]
    fn test_clock_only_moves_when_advanced() {
        let clock = TestClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_ms(250);
        assert_eq!(clock.now_ms(), 1_250);
        clock.set_ms(5_000);
        assert_eq!(clock.now_ms(), 5_000);
    }
}
