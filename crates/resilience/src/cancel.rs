// crates/resilience/src/cancel.rs
//! Cancellation-aware suspension helpers
//!
//! Every place that waits (limiter admission, retry backoff, reconnect
//! backoff) goes through these so that a cancelled token always wins.

use crate::error::{ResilienceError, ResilienceResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleeps for `delay` unless `cancel` fires first
///
/// Returns [`ResilienceError::Cancelled`] immediately if the token is already
/// cancelled, even for a zero delay.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> ResilienceResult<()> {
    if cancel.is_cancelled() {
        return Err(ResilienceError::Cancelled);
    }
    if delay.is_zero() {
        return Ok(());
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResilienceError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Drives `future` to completion unless `cancel` fires first
pub async fn run_or_cancel<F, T>(future: F, cancel: &CancellationToken) -> ResilienceResult<T>
where
    F: Future<Output = T>,
{
    if cancel.is_cancelled() {
        return Err(ResilienceError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResilienceError::Cancelled),
        out = future => Ok(out),
    }
}
