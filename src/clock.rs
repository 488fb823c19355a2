//! Time source used for every blocking wait and rate limit
//!
//! Script delays, HID hold times and hot-swap polling all read the clock
//! through this trait so tests can run them without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Millisecond clock with a blocking sleep
pub trait Clock: Send {
    /// Milliseconds elapsed since the clock was created
    fn now_ms(&self) -> u64;

    /// Block the caller for `ms` milliseconds
    fn sleep_ms(&self, ms: u64);
}

/// Wall clock backed by `Instant` and `thread::sleep`
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }
}

/// Deterministic clock: `sleep_ms` advances time instantly.
///
/// Clones share the same counter, so a storage session, a keyboard and a
/// script engine built from clones of one `ManualClock` observe one timeline.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without anyone sleeping
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_sleep_advances_time() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_ms(), 0);
        clock.sleep_ms(50);
        assert_eq!(clock.now_ms(), 50);
    }

    #[test]
    fn manual_clock_clones_share_timeline() {
        let a = ManualClock::new();
        let b = a.clone();
        a.advance(120);
        assert_eq!(b.now_ms(), 120);
        b.set(10);
        assert_eq!(a.now_ms(), 10);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_ms();
        clock.sleep_ms(2);
        assert!(clock.now_ms() >= first + 2);
    }
}
