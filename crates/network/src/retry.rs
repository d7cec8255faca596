// crates/network/src/retry.rs
//! Retry interceptors
//!
//! Two interceptors share the retry work and never act on the same failure:
//!
//! | interceptor | owns |
//! |---|---|
//! | [`RetryInterceptor`] | transport timeouts and resets, 500, 502, transient I/O marker bodies |
//! | [`DefaultRetryInterceptor`] | 429, 503, 504 |

use crate::pipeline::{Interceptor, Next};
use crate::redact::redact_url;
use crate::request::{Request, Response};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;
use steadyline_core::{TransportError, TransportErrorKind, TRANSIENT_IO_MARKER};
use steadyline_resilience::{sleep_or_cancel, RetryPolicy};

/// Header carrying the attempt number of each physical send
pub const RETRY_ATTEMPT_HEADER: &str = "retry-attempt";

/// Upper bound on the total time [`DefaultRetryInterceptor`] spends sleeping
pub const DEFAULT_RETRY_MAX_TOTAL_DELAY: Duration = Duration::from_secs(180);

/// Statuses handled by [`DefaultRetryInterceptor`]
pub fn is_default_retry_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 503 | 504)
}

/// Statuses handled by [`RetryInterceptor`] regardless of body
pub fn is_backoff_retry_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 500 | 502)
}

/// Parses `Retry-After` as delta seconds or an HTTP date
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::from_secs_f64(seconds));
        }
        return None;
    }

    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

/// Records the next attempt number of the request's sequence
fn stamp_attempt(request: &mut Request) {
    let attempt = request.next_attempt();
    request.headers_mut().insert(
        HeaderName::from_static(RETRY_ATTEMPT_HEADER),
        HeaderValue::from(attempt),
    );
}

fn cancelled(err: steadyline_resilience::ResilienceError) -> TransportError {
    TransportError::with_source(TransportErrorKind::Cancelled, "retry wait cancelled", err)
}

fn should_backoff_retry(outcome: &Result<Response, TransportError>) -> bool {
    match outcome {
        Err(err) => err.is_transient(),
        Ok(response) => {
            let status = response.status();
            if is_backoff_retry_status(status) {
                return true;
            }
            if status.as_u16() < 400 || is_default_retry_status(status) {
                return false;
            }
            response.buffered_body().is_some_and(|body| {
                String::from_utf8_lossy(body)
                    .to_lowercase()
                    .contains(&TRANSIENT_IO_MARKER.to_lowercase())
            })
        }
    }
}

/// Exponential-backoff retry for connection failures and 500/502
#[derive(Debug, Clone)]
pub struct RetryInterceptor {
    policy: RetryPolicy,
    max_retry_after: Duration,
}

impl RetryInterceptor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            max_retry_after: DEFAULT_RETRY_MAX_TOTAL_DELAY,
        }
    }

    /// Caps how long a single `Retry-After` hint may make it sleep
    pub fn with_max_retry_after(mut self, max_retry_after: Duration) -> Self {
        self.max_retry_after = max_retry_after;
        self
    }
}

#[async_trait]
impl Interceptor for RetryInterceptor {
    async fn intercept(
        &self,
        request: Request,
        next: Next<'_>,
    ) -> Result<Response, TransportError> {
        let cancel = next.cancel();
        let method = request.method().clone();
        let url = redact_url(request.url());
        let mut request = request;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::new(
                    TransportErrorKind::Cancelled,
                    "request cancelled before send",
                ));
            }

            if attempt > 0 || !request.headers().contains_key(RETRY_ATTEMPT_HEADER) {
                stamp_attempt(&mut request);
            }
            let replay = if request.is_retry_safe() {
                request.try_clone()
            } else {
                None
            };

            let outcome = next.run(request).await;
            if !should_backoff_retry(&outcome) || attempt >= self.policy.max_retries() {
                return outcome;
            }

            let Some(replay) = replay else {
                log::debug!(
                    method = method.as_str(),
                    url = url.as_str(),
                    attempt = attempt;
                    "request body cannot be replayed, not retrying"
                );
                return outcome;
            };

            attempt += 1;
            let hinted = outcome
                .as_ref()
                .ok()
                .and_then(|r| retry_after(r.headers()))
                .map(|hint| hint.min(self.max_retry_after));
            let delay = hinted.unwrap_or_else(|| self.policy.delay_for_attempt(attempt));

            match &outcome {
                Ok(response) => log::debug!(
                    method = method.as_str(),
                    url = url.as_str(),
                    status = response.status().as_u16(),
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64;
                    "retrying request"
                ),
                Err(err) => log::debug!(
                    method = method.as_str(),
                    url = url.as_str(),
                    error = err.to_string().as_str(),
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64;
                    "retrying request after transport error"
                ),
            }

            drop(outcome);
            sleep_or_cancel(delay, cancel).await.map_err(cancelled)?;
            request = replay;
        }
    }
}

/// Retry for 429/503/504, the statuses a provider uses to shed load
///
/// Sleeps the server's `Retry-After` when given, otherwise
/// `max(1s, min_delay)` raised to the attempt number, and gives up once the
/// sleeps would add up to more than [`DEFAULT_RETRY_MAX_TOTAL_DELAY`].
#[derive(Debug, Clone)]
pub struct DefaultRetryInterceptor {
    max_retries: u32,
    base_seconds: u64,
    max_total_delay: Duration,
}

impl DefaultRetryInterceptor {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            max_retries: policy.max_retries(),
            base_seconds: policy.min_delay().as_secs().max(1),
            max_total_delay: DEFAULT_RETRY_MAX_TOTAL_DELAY,
        }
    }

    /// Overrides the cumulative sleep cap
    pub fn with_max_total_delay(mut self, max_total_delay: Duration) -> Self {
        self.max_total_delay = max_total_delay;
        self
    }

    fn fallback_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.base_seconds.saturating_pow(attempt))
    }
}

#[async_trait]
impl Interceptor for DefaultRetryInterceptor {
    async fn intercept(
        &self,
        request: Request,
        next: Next<'_>,
    ) -> Result<Response, TransportError> {
        let cancel = next.cancel();
        let mut request = request;
        let mut attempt: u32 = 0;
        let mut slept = Duration::ZERO;

        loop {
            if attempt > 0 || !request.headers().contains_key(RETRY_ATTEMPT_HEADER) {
                stamp_attempt(&mut request);
            }
            let replay = if request.is_retry_safe() {
                request.try_clone()
            } else {
                None
            };

            let response = next.run(request).await?;
            if !is_default_retry_status(response.status()) || attempt >= self.max_retries {
                return Ok(response);
            }
            let Some(replay) = replay else {
                return Ok(response);
            };

            attempt += 1;
            let delay =
                retry_after(response.headers()).unwrap_or_else(|| self.fallback_delay(attempt));
            if slept + delay > self.max_total_delay {
                log::debug!(
                    status = response.status().as_u16(),
                    delay_ms = delay.as_millis() as u64;
                    "retry delay budget exhausted"
                );
                return Ok(response);
            }
            slept += delay;

            log::debug!(
                status = response.status().as_u16(),
                attempt = attempt,
                delay_ms = delay.as_millis() as u64;
                "retrying shed request"
            );

            drop(response);
            sleep_or_cancel(delay, cancel).await.map_err(cancelled)?;
            request = replay;
        }
    }
}
