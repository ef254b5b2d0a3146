//! Rate limiting algorithms and the decision facade.

mod limiter;
mod service;
mod sliding_window;
mod token_bucket;

pub use limiter::{Algorithm, Decision, Limiter};
pub use service::RateLimitService;
pub use sliding_window::{SlidingWindow, SlidingWindowState};
pub use token_bucket::{TokenBucket, TokenBucketState};
