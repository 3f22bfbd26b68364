//! Time source abstraction used by both storage backends.
//!
//! Bucket accounting is continuous-time: every decision reads the clock once
//! and derives elapsed seconds from the previous event. Injecting the clock
//! keeps the backends deterministic under test.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock time source with nanosecond resolution.
///
/// The origin is the unix epoch. Readings must be safe to take concurrently.
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds since the unix epoch.
    fn now_ns(&self) -> i64;

    /// Current time in whole seconds since the unix epoch.
    ///
    /// The remote backend passes this to its server-side scripts, which run
    /// at seconds resolution.
    fn now_unix(&self) -> i64 {
        self.now_ns() / 1_000_000_000
    }
}

/// System wall clock.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Manually advanced clock for tests.
///
/// Starts at an arbitrary positive instant so that expiry arithmetic behaves
/// like it does on a real clock.
#[derive(Debug)]
pub struct ManualClock {
    now_ns: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(1_700_000_000_000_000_000)
    }

    pub fn starting_at(now_ns: i64) -> Self {
        Self {
            now_ns: AtomicI64::new(now_ns),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ns
            .fetch_add(i64::try_from(by.as_nanos()).unwrap_or(i64::MAX), Ordering::SeqCst);
    }

    pub fn set_ns(&self, now_ns: i64) {
        self.now_ns.store(now_ns, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_non_decreasing() {
        let clock = SystemClock::new();
        let first = clock.now_ns();
        let second = clock.now_ns();
        assert!(second >= first);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::starting_at(1_000_000_000);
        assert_eq!(clock.now_ns(), 1_000_000_000);
        assert_eq!(clock.now_unix(), 1);

        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now_ns(), 1_500_000_000);

        clock.set_ns(5_000_000_000);
        assert_eq!(clock.now_unix(), 5);
    }
}
