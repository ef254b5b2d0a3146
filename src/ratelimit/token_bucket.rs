//! Token bucket rate limiting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::limiter::{Algorithm, Decision, Limiter};
use crate::clock::Clock;
use crate::store::{KeyStore, Update};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Per-key bucket state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketState {
    /// Tokens currently in the bucket
    pub tokens: u64,
    /// When the bucket was last refilled and drawn from
    pub last_refill: Instant,
}

/// A bucket of `capacity` tokens per key, refilled at `rate` tokens per
/// second. Each allowed request takes one token.
///
/// Refill is integral: `floor(elapsed_ns * rate / 1e9)` tokens are added and
/// the fractional remainder is dropped. A denied request writes nothing, so
/// the next check still measures from the last successful refill.
pub struct TokenBucket {
    capacity: u64,
    rate: u64,
    clock: Arc<dyn Clock>,
    store: Arc<KeyStore<TokenBucketState>>,
}

impl TokenBucket {
    /// Create a token bucket limiter.
    ///
    /// Parameters are not validated here; a zero capacity denies everything.
    pub fn new(
        capacity: u64,
        rate: u64,
        clock: Arc<dyn Clock>,
        store: Arc<KeyStore<TokenBucketState>>,
    ) -> Self {
        Self {
            capacity,
            rate,
            clock,
            store,
        }
    }

    /// Maximum tokens a bucket holds.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// The store holding the buckets.
    pub fn store(&self) -> &Arc<KeyStore<TokenBucketState>> {
        &self.store
    }

    /// Check and consume a token for `key`.
    pub fn allow(&self, key: &str) -> Decision {
        self.store.update(key, |state| {
            // Read under the store lock so refill times are written in clock order.
            let now = self.clock.now();
            let (tokens, elapsed) = match state {
                Some(bucket) => {
                    let elapsed = now.saturating_duration_since(bucket.last_refill);
                    let refilled = bucket.tokens.saturating_add(self.tokens_for(elapsed));
                    (refilled.min(self.capacity), elapsed)
                }
                None => {
                    debug!(key = %key, capacity = self.capacity, "Creating token bucket");
                    (self.capacity, Duration::ZERO)
                }
            };

            if tokens > 0 {
                let remaining = tokens - 1;
                trace!(key = %key, remaining = remaining, "Token granted");
                let bucket = TokenBucketState {
                    tokens: remaining,
                    last_refill: now,
                };
                (Update::Set(bucket), Decision::allow(remaining))
            } else {
                trace!(key = %key, elapsed = ?elapsed, "Token bucket empty");
                (Update::Unchanged, Decision::deny(self.retry_after(elapsed)))
            }
        })
    }

    fn tokens_for(&self, elapsed: Duration) -> u64 {
        let added = elapsed.as_nanos() * u128::from(self.rate) / NANOS_PER_SEC;
        u64::try_from(added).unwrap_or(u64::MAX)
    }

    /// Time until one whole token accrues, given `elapsed` already banked
    /// since the last refill.
    fn retry_after(&self, elapsed: Duration) -> Option<Duration> {
        if self.capacity == 0 || self.rate == 0 {
            return None;
        }
        let per_token = NANOS_PER_SEC.div_ceil(u128::from(self.rate));
        let wait = per_token.saturating_sub(elapsed.as_nanos());
        Some(Duration::from_nanos(u64::try_from(wait).unwrap_or(u64::MAX)))
    }
}

impl Limiter for TokenBucket {
    fn allow(&self, key: &str) -> Decision {
        TokenBucket::allow(self, key)
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }

    fn close(&self) {
        self.store.close();
    }
}
