// crates/resilience/src/rate_limiter.rs
//! Rate limiting contract and budgets

use crate::error::{ResilienceError, ResilienceResult};
use crate::sliding_window::SlidingWindow;
use crate::token_bucket::TokenBucket;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Admission control shared by every worker
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Waits until one unit of quota is available
    async fn wait(&self, cancel: &CancellationToken) -> ResilienceResult<()> {
        self.wait_n(1, cancel).await
    }

    /// Waits until `n` units of quota are available
    ///
    /// Requests larger than the limiter could ever admit at once fail with
    /// [`ResilienceError::InvalidBudget`] instead of waiting forever.
    async fn wait_n(&self, n: u32, cancel: &CancellationToken) -> ResilienceResult<()>;

    /// Clears accumulated quota state, leaving the limiter full
    fn reset(&self);

    /// Releases background resources; pending and future waits fail
    fn shutdown(&self);
}

/// Quota configuration for one of the two strategies
#[derive(Debug, Clone, PartialEq)]
pub enum RateBudget {
    /// At most `capacity` admissions per `window`, released per sub-interval
    SlidingWindow {
        window: Duration,
        sub_interval: Duration,
        capacity: u32,
    },
    /// Continuous refill at `rate_per_second`, holding at most `burst` tokens
    TokenBucket { rate_per_second: f64, burst: u32 },
}

impl RateBudget {
    /// Checks the budget invariants
    pub fn validate(&self) -> ResilienceResult<()> {
        match self {
            RateBudget::SlidingWindow {
                window,
                sub_interval,
                capacity,
            } => {
                if *capacity == 0 {
                    return Err(invalid("capacity must be greater than 0"));
                }
                if sub_interval.is_zero() {
                    return Err(invalid("sub-interval must be greater than 0"));
                }
                if window < sub_interval || window.as_nanos() % sub_interval.as_nanos() != 0 {
                    return Err(invalid(
                        "window must be a whole multiple of the sub-interval",
                    ));
                }
                Ok(())
            }
            RateBudget::TokenBucket {
                rate_per_second,
                burst,
            } => {
                if *burst == 0 {
                    return Err(invalid("burst must be greater than 0"));
                }
                if !rate_per_second.is_finite() || *rate_per_second <= 0.0 {
                    return Err(invalid("rate must be a positive number"));
                }
                Ok(())
            }
        }
    }

    /// Largest single request the budget can admit
    pub fn max_request(&self) -> u32 {
        match self {
            RateBudget::SlidingWindow { capacity, .. } => *capacity,
            RateBudget::TokenBucket { burst, .. } => *burst,
        }
    }

    /// Builds the limiter described by this budget
    ///
    /// The sliding window spawns its ticker, so it needs a tokio runtime.
    pub fn build(&self) -> ResilienceResult<Arc<dyn RateLimiter>> {
        self.validate()?;
        match self {
            RateBudget::SlidingWindow {
                window,
                sub_interval,
                capacity,
            } => Ok(Arc::new(SlidingWindow::new(
                *window,
                *sub_interval,
                *capacity,
            )?)),
            RateBudget::TokenBucket {
                rate_per_second,
                burst,
            } => Ok(Arc::new(TokenBucket::new(*rate_per_second, *burst)?)),
        }
    }
}

impl Default for RateBudget {
    fn default() -> Self {
        RateBudget::TokenBucket {
            rate_per_second: 16.0,
            burst: 200,
        }
    }
}

pub(crate) fn invalid(message: &str) -> ResilienceError {
    ResilienceError::InvalidBudget(message.to_string())
}
