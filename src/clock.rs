//! Time sources for the rate limiting engine.
//!
//! Algorithms and the key store never call `Instant::now()` directly; they ask
//! a [`Clock`], so tests can drive them with synthetic time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of the current instant.
///
/// Implementors must be shareable across threads, since a single clock is
/// consulted by every caller of the limiter.
pub trait Clock: Send + Sync {
    /// Return the current instant.
    fn now(&self) -> Instant;
}

/// Clock backed by the operating system's monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can hand one clone to a
/// limiter and keep another to advance it.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Create a clock frozen at `start`.
    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Hands out a strictly later instant on every read, one millisecond apart,
/// and stalls the first reader. Concurrent callers therefore see times that
/// only agree with lock order if they read the clock while holding the lock.
#[cfg(test)]
pub(crate) struct SteppingClock {
    base: Instant,
    reads: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl SteppingClock {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            reads: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// The instant returned by the `n`th read, counting from one.
    pub(crate) fn nth(&self, n: u32) -> Instant {
        self.base + Duration::from_millis(u64::from(n))
    }
}

#[cfg(test)]
impl Clock for SteppingClock {
    fn now(&self) -> Instant {
        let n = self.reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        if n == 1 {
            std::thread::sleep(Duration::from_millis(50));
        }
        self.nth(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_frozen() {
        let clock = ManualClock::new();
        let first = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.now(), first);
    }

    #[test]
    fn test_manual_clock_advance_shared_between_clones() {
        let clock = ManualClock::new();
        let handle = clock.clone();
        let start = clock.now();

        handle.advance(Duration::from_secs(3));

        assert_eq!(clock.now() - start, Duration::from_secs(3));
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_stepping_clock_moves_on_every_read() {
        let clock = SteppingClock::new();
        assert_eq!(clock.now(), clock.nth(1));
        assert_eq!(clock.now(), clock.nth(2));
    }
}
