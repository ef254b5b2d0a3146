//! Stream driver for the rate limit service.
//!
//! Feeds keys from any async line source through a [`RateLimitService`] and
//! writes newline-delimited JSON decisions. The binary wires it to stdin and
//! stdout.
//!
//! [`RateLimitService`]: crate::ratelimit::RateLimitService

mod session;

pub use session::{run, DecisionRecord};
