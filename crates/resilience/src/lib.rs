// crates/resilience/src/lib.rs
//! Resilience primitives for the steadyline transport
//!
//! This module provides:
//! - Rate limiting (token bucket and sliding window behind one trait)
//! - Retry policies with clamped bounds and backoff schedules
//! - Cancellation-aware sleeping
//!
//! # Example
//!
//! ```rust
//! use steadyline_resilience::{RateBudget, RetryPolicy};
//! use std::time::Duration;
//!
//! // Retry with exponential backoff
//! let policy = RetryPolicy::new(3)
//!     .with_min_delay(Duration::from_millis(100));
//! assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
//!
//! // Token bucket admission
//! let budget = RateBudget::TokenBucket { rate_per_second: 16.0, burst: 200 };
//! assert!(budget.validate().is_ok());
//! ```

mod cancel;
mod error;
mod rate_limiter;
mod retry;
mod sliding_window;
mod token_bucket;

pub use cancel::{run_or_cancel, sleep_or_cancel};
pub use error::{ResilienceError, ResilienceResult};
pub use rate_limiter::{RateBudget, RateLimiter};
pub use retry::{
    Backoff, RetryPolicy, MAX_CONNECTION_RETRIES_LIMIT, MAX_RETRIES_LIMIT, MIN_DELAY_CEILING,
    MIN_DELAY_FLOOR,
};
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_exports_accessible() {
        // Verify all types are exported
        let _: RetryPolicy = RetryPolicy::default();
        let _: RateBudget = RateBudget::default();
        let _: TokenBucket = TokenBucket::new(1.0, 1).unwrap();
        let _: Backoff = Backoff::Fixed(std::time::Duration::from_secs(1));
        let _: CancellationToken = CancellationToken::new();
    }
}
