//! The limiter abstraction shared by every algorithm.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::RateWardenError;

/// Outcome of a rate limit check.
///
/// `remaining` is interpreted per algorithm: tokens left in the bucket for
/// [`Algorithm::TokenBucket`], free slots in the current window for
/// [`Algorithm::SlidingWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Quota left after this request
    pub remaining: u64,
    /// On denial, how long until the key would next be admitted
    pub retry_after: Option<Duration>,
}

impl Decision {
    /// An allowed decision with `remaining` quota left.
    pub fn allow(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
        }
    }

    /// A denied decision.
    pub fn deny(retry_after: Option<Duration>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after,
        }
    }
}

/// The supported rate limiting algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Refilling bucket of tokens
    TokenBucket,
    /// Trailing window over accepted request timestamps
    SlidingWindow,
}

impl Algorithm {
    /// The configuration name of this algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "tokenbucket",
            Algorithm::SlidingWindow => "slidingwindow",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = RateWardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tokenbucket" => Ok(Algorithm::TokenBucket),
            "slidingwindow" => Ok(Algorithm::SlidingWindow),
            _ => Err(RateWardenError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Trait for rate limiter implementations.
///
/// This is the seam between the [`RateLimitService`](super::RateLimitService)
/// facade and the algorithms, so the facade can hold any of them.
pub trait Limiter: Send + Sync {
    /// Decide whether a request for `key` may proceed, consuming quota if so.
    fn allow(&self, key: &str) -> Decision;

    /// Which algorithm this limiter runs.
    fn algorithm(&self) -> Algorithm;

    /// Release background resources held by the limiter.
    fn close(&self) {}
}
