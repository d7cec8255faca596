// crates/resilience/src/token_bucket.rs
//! Token bucket rate limiter

use crate::cancel::sleep_or_cancel;
use crate::error::{ResilienceError, ResilienceResult};
use crate::rate_limiter::{invalid, RateLimiter};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Fixed-rate token bucket
///
/// Callers reserve tokens up front, letting the balance go negative, and then
/// sleep for as long as the refill needs to cover the debt. A cancelled
/// caller hands its reservation back.
#[derive(Debug)]
pub struct TokenBucket {
    rate_per_second: f64,
    burst: u32,
    state: Mutex<BucketState>,
    closed: CancellationToken,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket
    pub fn new(rate_per_second: f64, burst: u32) -> ResilienceResult<Self> {
        if burst == 0 {
            return Err(invalid("burst must be greater than 0"));
        }
        if !rate_per_second.is_finite() || rate_per_second <= 0.0 {
            return Err(invalid("rate must be a positive number"));
        }

        Ok(Self {
            rate_per_second,
            burst,
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last_refill: Instant::now(),
            }),
            closed: CancellationToken::new(),
        })
    }

    /// Refill rate
    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_second
    }

    /// Bucket size
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Tokens currently available, refilled to now
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state);
        state.tokens.max(0.0)
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_second).min(f64::from(self.burst));
        state.last_refill = now;
    }

    fn reserve(&self, n: u32) -> Duration {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state);
        state.tokens -= f64::from(n);

        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.rate_per_second)
        }
    }

    fn give_back(&self, n: u32) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.tokens = (state.tokens + f64::from(n)).min(f64::from(self.burst));
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn wait_n(&self, n: u32, cancel: &CancellationToken) -> ResilienceResult<()> {
        if self.closed.is_cancelled() {
            return Err(ResilienceError::LimiterShutdown);
        }
        if cancel.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }
        if n == 0 {
            return Ok(());
        }
        if n > self.burst {
            return Err(ResilienceError::InvalidBudget(format!(
                "requested {} tokens but burst is {}",
                n, self.burst
            )));
        }

        let delay = self.reserve(n);
        if delay.is_zero() {
            return Ok(());
        }

        log::trace!(tokens = n, delay_ms = delay.as_millis() as u64; "token bucket wait");

        let outcome = tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(ResilienceError::LimiterShutdown),
            slept = sleep_or_cancel(delay, cancel) => slept,
        };

        if outcome.is_err() {
            self.give_back(n);
        }
        outcome
    }

    fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.tokens = f64::from(self.burst);
        state.last_refill = Instant::now();
    }

    fn shutdown(&self) {
        self.closed.cancel();
    }
}
