//! Time sources for the registry.
//!
//! Bucket arithmetic runs on a monotonic [`Instant`]; reset timestamps in
//! decisions are reported in Unix seconds. Both come from one [`Clock`] so
//! tests can drive them together.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// Monotonic time used for refill math and idle tracking.
    fn now(&self) -> Instant;

    /// Wall-clock seconds since the Unix epoch.
    fn unix_now(&self) -> u64;
}

/// The process clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
///
/// Cloning shares the underlying time, so a test can keep one handle and
/// give another to the registry.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    instant: Instant,
    unix: Duration,
}

impl ManualClock {
    /// Start at a fixed Unix timestamp.
    pub fn starting_at(unix_secs: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                instant: Instant::now(),
                unix: Duration::from_secs(unix_secs),
            })),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.inner.lock();
        state.instant += by;
        state.unix += by;
    }

    /// Move the monotonic reading backwards, as a misbehaving time source
    /// might. The wall clock is left alone.
    pub fn rewind(&self, by: Duration) {
        let mut state = self.inner.lock();
        if let Some(earlier) = state.instant.checked_sub(by) {
            state.instant = earlier;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.lock().instant
    }

    fn unix_now(&self) -> u64 {
        self.inner.lock().unix.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_both_readings() {
        let clock = ManualClock::starting_at(1_700_000_000);
        let start = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now() - start, Duration::from_secs(90));
        assert_eq!(clock.unix_now(), 1_700_000_090);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::starting_at(0);
        let other = clock.clone();

        other.advance(Duration::from_secs(5));
        assert_eq!(clock.unix_now(), 5);
    }

    #[test]
    fn test_system_clock_is_past_epoch() {
        assert!(SystemClock.unix_now() > 1_600_000_000);
    }
}
