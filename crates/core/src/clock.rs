//! Time abstraction for testability
//!
//! Backoff deadlines and connectivity timestamps are read through [`Clock`]
//! so retry timing can be driven deterministically in tests.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use civicsync_core::clock::{Clock, MockClock};
//!
//! let clock = MockClock::new();
//! let start = clock.now();
//! clock.advance(Duration::from_secs(5));
//! assert_eq!((clock.now() - start).num_seconds(), 5);
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Wall clock source
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests
///
/// Clones share the same elapsed time.
#[derive(Debug, Clone)]
pub struct MockClock {
    base: DateTime<Utc>,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Starts at the current real time
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Starts at a fixed instant
    pub fn at(base: DateTime<Utc>) -> Self {
        Self { base, elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Simulates time passing without waiting
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Moves the clock forward to `target`; earlier targets are ignored
    pub fn advance_to(&self, target: DateTime<Utc>) {
        if let Ok(delta) = (target - self.now()).to_std() {
            self.advance(delta);
        }
    }

    /// Time advanced since creation
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed()).unwrap_or(chrono::Duration::MAX);
        self.base.checked_add_signed(elapsed).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_elapsed_time() {
        let clock = MockClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_millis(1_500));
        assert_eq!(other.elapsed(), Duration::from_millis(1_500));
        assert_eq!(clock.now(), other.now());
    }

    #[test]
    fn advance_to_ignores_past_targets() {
        let clock = MockClock::new();
        let start = clock.now();
        clock.advance_to(start + chrono::Duration::seconds(3));
        assert_eq!(clock.elapsed(), Duration::from_secs(3));

        clock.advance_to(start);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
