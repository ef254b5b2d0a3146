//! Sliding window rate limiting.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::limiter::{Algorithm, Decision, Limiter};
use crate::clock::Clock;
use crate::store::{KeyStore, Update};

/// Per-key log of accepted requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlidingWindowState {
    /// Timestamps of accepted requests, oldest first
    pub requests: VecDeque<Instant>,
}

/// Allows at most `max_requests` per key in any trailing interval of length
/// `window`.
///
/// The window slides continuously with each check; it is not aligned to
/// wall-clock boundaries. Only accepted requests are recorded, and a denied
/// check writes nothing back.
pub struct SlidingWindow {
    window: Duration,
    max_requests: u64,
    clock: Arc<dyn Clock>,
    store: Arc<KeyStore<SlidingWindowState>>,
}

impl SlidingWindow {
    /// Create a sliding window limiter.
    ///
    /// Parameters are not validated here; zero `max_requests` denies everything.
    pub fn new(
        window: Duration,
        max_requests: u64,
        clock: Arc<dyn Clock>,
        store: Arc<KeyStore<SlidingWindowState>>,
    ) -> Self {
        Self {
            window,
            max_requests,
            clock,
            store,
        }
    }

    /// Length of the trailing window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Requests allowed per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// The store holding the request logs.
    pub fn store(&self) -> &Arc<KeyStore<SlidingWindowState>> {
        &self.store
    }

    /// Check and record a request for `key`.
    pub fn allow(&self, key: &str) -> Decision {
        self.store.update(key, |state| {
            // Read under the store lock so the log stays in timestamp order.
            let now = self.clock.now();
            let mut requests = match state {
                Some(log) => self.live_requests(log, now),
                None => {
                    debug!(key = %key, max_requests = self.max_requests, "Creating request window");
                    VecDeque::new()
                }
            };

            if (requests.len() as u64) < self.max_requests {
                requests.push_back(now);
                let remaining = self.max_requests - requests.len() as u64;
                trace!(key = %key, remaining = remaining, "Request admitted to window");
                (
                    Update::Set(SlidingWindowState { requests }),
                    Decision::allow(remaining),
                )
            } else {
                trace!(key = %key, in_window = requests.len(), "Window full");
                (Update::Unchanged, Decision::deny(self.retry_after(&requests, now)))
            }
        })
    }

    /// Timestamps strictly newer than `now - window`.
    fn live_requests(&self, log: &SlidingWindowState, now: Instant) -> VecDeque<Instant> {
        match now.checked_sub(self.window) {
            Some(cutoff) => log.requests.iter().copied().filter(|&t| t > cutoff).collect(),
            None => log.requests.clone(),
        }
    }

    /// When the oldest request in the window falls out of it. `None` if that
    /// instant is past what `Instant` can represent.
    fn retry_after(&self, requests: &VecDeque<Instant>, now: Instant) -> Option<Duration> {
        requests
            .iter()
            .min()
            .and_then(|&oldest| oldest.checked_add(self.window))
            .map(|reopens| reopens.saturating_duration_since(now))
    }
}

impl Limiter for SlidingWindow {
    fn allow(&self, key: &str) -> Decision {
        SlidingWindow::allow(self, key)
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }

    fn close(&self) {
        self.store.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SteppingClock};
    use crate::store::StoreConfig;

    fn window(window: Duration, max_requests: u64) -> (SlidingWindow, ManualClock) {
        let clock = ManualClock::new();
        let store = KeyStore::with_clock(StoreConfig::default(), Arc::new(clock.clone())).unwrap();
        let limiter = SlidingWindow::new(window, max_requests, Arc::new(clock.clone()), Arc::new(store));
        (limiter, clock)
    }

    #[test]
    fn test_first_request_allowed() {
        let (limiter, _clock) = window(Duration::from_secs(1), 5);
        assert_eq!(limiter.allow("fresh"), Decision::allow(4));
    }

    #[test]
    fn test_end_to_end_sequence() {
        let (limiter, clock) = window(Duration::from_secs(10), 3);

        for expected in [2, 1, 0] {
            assert_eq!(limiter.allow("user"), Decision::allow(expected));
        }

        let denied = limiter.allow("user");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);

        clock.advance(Duration::from_secs(11));
        assert_eq!(limiter.allow("user"), Decision::allow(2));
    }

    #[test]
    fn test_limit_within_span_then_slide() {
        let (limiter, clock) = window(Duration::from_secs(10), 3);

        // Spread the three allowed requests over 2 seconds.
        assert!(limiter.allow("k").allowed);
        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("k").allowed);
        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("k").allowed);
        assert!(!limiter.allow("k").allowed);

        // At exactly 10s after the first request it has left the window.
        clock.advance(Duration::from_secs(8));
        assert_eq!(limiter.allow("k"), Decision::allow(0));

        // The second request is still inside the window.
        assert!(!limiter.allow("k").allowed);
    }

    #[test]
    fn test_request_just_inside_window_still_counts() {
        let (limiter, clock) = window(Duration::from_secs(10), 1);

        assert!(limiter.allow("k").allowed);
        clock.advance(Duration::from_secs(10) - Duration::from_nanos(1));
        assert!(!limiter.allow("k").allowed);
    }

    #[test]
    fn test_denial_does_not_persist_pruning() {
        let (limiter, clock) = window(Duration::from_secs(10), 2);

        assert!(limiter.allow("k").allowed);
        clock.advance(Duration::from_secs(6));
        assert!(limiter.allow("k").allowed);
        clock.advance(Duration::from_secs(6));

        // First request has expired, so this one is admitted and the log is
        // pruned then appended.
        assert!(limiter.allow("k").allowed);
        assert_eq!(limiter.store().get("k").unwrap().requests.len(), 2);

        // A denial leaves the stored log exactly as it was.
        let before = limiter.store().get("k").unwrap();
        assert!(!limiter.allow("k").allowed);
        assert_eq!(limiter.store().get("k").unwrap(), before);
    }

    #[test]
    fn test_retry_after_tracks_oldest_request() {
        let (limiter, clock) = window(Duration::from_secs(10), 2);

        assert!(limiter.allow("k").allowed);
        clock.advance(Duration::from_secs(3));
        assert!(limiter.allow("k").allowed);
        clock.advance(Duration::from_secs(1));

        let denied = limiter.allow("k");
        assert_eq!(denied.retry_after, Some(Duration::from_secs(6)));

        clock.advance(Duration::from_secs(6));
        assert!(limiter.allow("k").allowed);
    }

    #[test]
    fn test_zero_max_requests_always_denies() {
        let (limiter, _clock) = window(Duration::from_secs(1), 0);

        let decision = limiter.allow("k");
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, None);
        assert!(!limiter.store().contains_key("k"));
    }

    #[test]
    fn test_concurrent_callers_never_double_book() {
        let (limiter, _clock) = window(Duration::from_secs(60), 10);
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.allow("shared").allowed)
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(granted, 10);
        assert_eq!(limiter.store().get("shared").unwrap().requests.len(), 10);
    }

    #[test]
    fn test_unrepresentable_window_end_has_no_retry_after() {
        let (limiter, clock) = window(Duration::from_secs(i64::MAX as u64), 1);

        assert!(limiter.allow("k").allowed);
        clock.advance(Duration::from_secs(3600));

        let denied = limiter.allow("k");
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, None);
    }

    #[test]
    fn test_log_stays_ordered_under_contention() {
        let clock = Arc::new(SteppingClock::new());
        let store = KeyStore::with_clock(StoreConfig::default(), Arc::new(ManualClock::new())).unwrap();
        let limiter = Arc::new(SlidingWindow::new(
            Duration::from_secs(60),
            20,
            clock.clone(),
            Arc::new(store),
        ));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.allow("shared").allowed)
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }

        let log = limiter.store().get("shared").unwrap().requests;
        assert_eq!(log.len(), 20);
        assert!(log.iter().zip(log.iter().skip(1)).all(|(a, b)| a < b));
        assert_eq!(log.back().copied(), Some(clock.nth(20)));
    }
}
