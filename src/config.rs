//! Configuration management for ratewarden.
//!
//! Raw options arrive as [`Settings`] (from YAML, a settings file, or
//! `RATEWARDEN_*` environment variables) and are validated into the typed
//! [`LimiterSettings`] that the [`RateLimitService`](crate::ratelimit::RateLimitService)
//! is built from.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RateWardenError, Result};
use crate::ratelimit::Algorithm;
use crate::store::StoreConfig;

/// Prefix for environment variable overrides, e.g. `RATEWARDEN_CAPACITY`.
pub const ENV_PREFIX: &str = "RATEWARDEN";

/// Raw, unvalidated limiter options.
///
/// Numeric fields are signed so that negative input can be reported rather
/// than failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Algorithm name: `tokenbucket` or `slidingwindow`
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Token bucket capacity
    #[serde(default = "default_capacity")]
    pub capacity: i64,

    /// Token bucket refill rate, tokens per second
    #[serde(default = "default_rate")]
    pub rate: i64,

    /// Sliding window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,

    /// Sliding window request limit
    #[serde(default = "default_max_requests")]
    pub max_requests: i64,

    /// Idle seconds before a key's state is purged (0 disables expiry)
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: i64,

    /// Maximum resident keys (0 = unlimited)
    #[serde(default)]
    pub max_keys: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            capacity: default_capacity(),
            rate: default_rate(),
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            ttl_secs: default_ttl_secs(),
            max_keys: 0,
        }
    }
}

fn default_algorithm() -> String {
    Algorithm::TokenBucket.as_str().to_string()
}

fn default_capacity() -> i64 {
    10
}

fn default_rate() -> i64 {
    1
}

fn default_window_secs() -> i64 {
    60
}

fn default_max_requests() -> i64 {
    10
}

fn default_ttl_secs() -> i64 {
    3600
}

impl Settings {
    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RateWardenError::Config(format!("Failed to parse settings: {}", e)))
    }

    /// Load settings from an optional file, then apply `RATEWARDEN_*`
    /// environment variables on top.
    ///
    /// The file format is picked from its extension (YAML, TOML, JSON, ...).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading settings file");
            builder = builder.add_source(config::File::from(path));
        }

        let settings: Settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Validate and convert into typed limiter settings.
    ///
    /// Only the parameters of the selected algorithm are checked.
    pub fn resolve(&self) -> Result<LimiterSettings> {
        let algorithm = match self.algorithm.parse::<Algorithm>()? {
            Algorithm::TokenBucket => AlgorithmSettings::TokenBucket {
                capacity: positive("capacity", self.capacity)?,
                rate: positive("rate", self.rate)?,
            },
            Algorithm::SlidingWindow => AlgorithmSettings::SlidingWindow {
                window: Duration::from_secs(positive("window_secs", self.window_secs)?),
                max_requests: positive("max_requests", self.max_requests)?,
            },
        };

        let max_keys = usize::try_from(non_negative("max_keys", self.max_keys)?).map_err(|_| {
            RateWardenError::InvalidParameter {
                name: "max_keys",
                reason: format!("{} does not fit in memory size", self.max_keys),
            }
        })?;

        let store = StoreConfig {
            ttl: Duration::from_secs(non_negative("ttl_secs", self.ttl_secs)?),
            max_keys,
        };

        Ok(LimiterSettings { algorithm, store })
    }
}

fn positive(name: &'static str, value: i64) -> Result<u64> {
    if value <= 0 {
        return Err(RateWardenError::InvalidParameter {
            name,
            reason: format!("must be positive, got {}", value),
        });
    }
    Ok(value as u64)
}

fn non_negative(name: &'static str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| RateWardenError::InvalidParameter {
        name,
        reason: format!("must not be negative, got {}", value),
    })
}

/// Parameters of the selected algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmSettings {
    /// Token bucket with `capacity` tokens refilled at `rate` per second
    TokenBucket { capacity: u64, rate: u64 },
    /// At most `max_requests` per trailing `window`
    SlidingWindow { window: Duration, max_requests: u64 },
}

impl AlgorithmSettings {
    /// Which algorithm these settings select.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            AlgorithmSettings::TokenBucket { .. } => Algorithm::TokenBucket,
            AlgorithmSettings::SlidingWindow { .. } => Algorithm::SlidingWindow,
        }
    }
}

/// Fully resolved settings for building a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSettings {
    /// Algorithm and its parameters
    pub algorithm: AlgorithmSettings,
    /// Key store bounds
    pub store: StoreConfig,
}

impl LimiterSettings {
    /// Token bucket settings with default store bounds.
    pub fn token_bucket(capacity: u64, rate: u64) -> Self {
        Self {
            algorithm: AlgorithmSettings::TokenBucket { capacity, rate },
            store: StoreConfig::default(),
        }
    }

    /// Sliding window settings with default store bounds.
    pub fn sliding_window(window: Duration, max_requests: u64) -> Self {
        Self {
            algorithm: AlgorithmSettings::SlidingWindow {
                window,
                max_requests,
            },
            store: StoreConfig::default(),
        }
    }

    /// Builder-style: set the key store bounds.
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Reject parameters no limiter should be built with.
    pub fn validate(&self) -> Result<()> {
        let zero = |name: &'static str| RateWardenError::InvalidParameter {
            name,
            reason: "must be positive, got 0".to_string(),
        };

        match self.algorithm {
            AlgorithmSettings::TokenBucket { capacity, rate } => {
                if capacity == 0 {
                    return Err(zero("capacity"));
                }
                if rate == 0 {
                    return Err(zero("rate"));
                }
            }
            AlgorithmSettings::SlidingWindow {
                window,
                max_requests,
            } => {
                if window.is_zero() {
                    return Err(zero("window"));
                }
                if max_requests == 0 {
                    return Err(zero("max_requests"));
                }
            }
        }
        Ok(())
    }
}
