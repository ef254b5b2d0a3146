//! The decision facade callers talk to.

use std::sync::Arc;
use tracing::{debug, info, trace};

use super::limiter::{Algorithm, Decision, Limiter};
use super::sliding_window::SlidingWindow;
use super::token_bucket::TokenBucket;
use crate::clock::{Clock, SystemClock};
use crate::config::{AlgorithmSettings, LimiterSettings};
use crate::error::Result;
use crate::store::KeyStore;

/// Single entry point for rate limit decisions.
///
/// Holds exactly one configured [`Limiter`] and delegates every check to it,
/// so transports and configuration never depend on which algorithm runs.
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct RateLimitService {
    limiter: Arc<dyn Limiter>,
}

impl std::fmt::Debug for RateLimitService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitService")
            .field("algorithm", &self.limiter.algorithm())
            .finish()
    }
}

impl RateLimitService {
    /// Wrap an already constructed limiter.
    pub fn new(limiter: Arc<dyn Limiter>) -> Self {
        Self { limiter }
    }

    /// Build the limiter described by `settings`, using the system clock.
    pub fn from_settings(settings: &LimiterSettings) -> Result<Self> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Build the limiter described by `settings`, reading time from `clock`.
    ///
    /// Fails if the settings are invalid; no limiter is built in that case.
    pub fn with_clock(settings: &LimiterSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        settings.validate()?;

        let limiter: Arc<dyn Limiter> = match settings.algorithm {
            AlgorithmSettings::TokenBucket { capacity, rate } => {
                let store = KeyStore::with_clock(settings.store, clock.clone())?;
                let bucket = TokenBucket::new(capacity, rate, clock, Arc::new(store));
                info!(
                    algorithm = %Algorithm::TokenBucket,
                    capacity = bucket.capacity(),
                    rate = bucket.rate(),
                    ttl = ?bucket.store().ttl(),
                    max_keys = bucket.store().max_keys(),
                    "Rate limiter initialized"
                );
                Arc::new(bucket)
            }
            AlgorithmSettings::SlidingWindow {
                window,
                max_requests,
            } => {
                let store = KeyStore::with_clock(settings.store, clock.clone())?;
                let sliding = SlidingWindow::new(window, max_requests, clock, Arc::new(store));
                info!(
                    algorithm = %Algorithm::SlidingWindow,
                    window = ?sliding.window(),
                    max_requests = sliding.max_requests(),
                    ttl = ?sliding.store().ttl(),
                    max_keys = sliding.store().max_keys(),
                    "Rate limiter initialized"
                );
                Arc::new(sliding)
            }
        };

        Ok(Self::new(limiter))
    }

    /// Decide whether a request for `key` may proceed.
    pub fn check_limit(&self, key: &str) -> Decision {
        let decision = self.limiter.allow(key);

        if decision.allowed {
            trace!(key = %key, remaining = decision.remaining, "Request allowed");
        } else {
            debug!(key = %key, retry_after = ?decision.retry_after, "Rate limit exceeded");
        }

        decision
    }

    /// The algorithm behind this service, which determines what
    /// [`Decision::remaining`] counts.
    pub fn algorithm(&self) -> Algorithm {
        self.limiter.algorithm()
    }

    /// Stop the limiter's background maintenance.
    pub fn close(&self) {
        self.limiter.close();
        info!(algorithm = %self.limiter.algorithm(), "Rate limiter closed");
    }
}
