//! Ratewarden - In-Process Rate Limiting Engine
//!
//! This crate decides, per caller-supplied key, whether a request may proceed
//! and how much quota is left. Two algorithms are available behind a single
//! [`RateLimitService`](ratelimit::RateLimitService) facade: a token bucket and
//! a sliding window log. Per-key state lives in a bounded [`KeyStore`](store::KeyStore)
//! with idle expiry and least-recently-used eviction.

pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod ratelimit;
pub mod store;
