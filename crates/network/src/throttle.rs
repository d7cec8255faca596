// crates/network/src/throttle.rs
//! Shared throttle fence
//!
//! When one call sees a 429 the fence is raised, and every call going through
//! any pipeline that shares the fence waits for it before sending. The expiry
//! only ever moves forward, so concurrent raises can race freely.

use crate::pipeline::{Interceptor, Next};
use crate::request::{Request, Response};
use crate::retry::retry_after;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use steadyline_core::{TransportError, TransportErrorKind};
use steadyline_resilience::{sleep_or_cancel, CancellationToken, ResilienceResult};
use tokio::time::Instant;

/// A time-bounded pause shared between callers
#[derive(Debug)]
pub struct ThrottleFence {
    origin: Instant,
    until_ms: AtomicU64,
}

impl ThrottleFence {
    /// A fence that is already down
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            until_ms: AtomicU64::new(0),
        }
    }

    /// Convenience for sharing
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Keeps callers out for at least `duration` from now
    pub fn raise(&self, duration: Duration) {
        let until = self.now_ms().saturating_add(duration.as_millis() as u64);
        self.until_ms.fetch_max(until, Ordering::AcqRel);
    }

    /// Time left until the fence drops
    pub fn remaining(&self) -> Duration {
        let until = self.until_ms.load(Ordering::Acquire);
        Duration::from_millis(until.saturating_sub(self.now_ms()))
    }

    /// Returns true while callers should hold back
    pub fn is_raised(&self) -> bool {
        !self.remaining().is_zero()
    }

    /// Waits until the fence is down or `cancel` fires
    pub async fn wait(&self, cancel: &CancellationToken) -> ResilienceResult<()> {
        loop {
            let remaining = self.remaining();
            if remaining.is_zero() {
                return Ok(());
            }
            sleep_or_cancel(remaining, cancel).await?;
        }
    }
}

impl Default for ThrottleFence {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits on the fence before sending and raises it on 429
#[derive(Debug, Clone)]
pub struct ThrottlingInterceptor {
    fence: Arc<ThrottleFence>,
    default_pause: Duration,
    max_pause: Duration,
}

impl ThrottlingInterceptor {
    /// `default_pause` is used when the 429 carries no usable `Retry-After`
    pub fn new(fence: Arc<ThrottleFence>, default_pause: Duration, max_pause: Duration) -> Self {
        Self {
            fence,
            default_pause,
            max_pause,
        }
    }

    pub fn fence(&self) -> &Arc<ThrottleFence> {
        &self.fence
    }
}

#[async_trait]
impl Interceptor for ThrottlingInterceptor {
    async fn intercept(
        &self,
        request: Request,
        next: Next<'_>,
    ) -> Result<Response, TransportError> {
        let cancel = next.cancel();

        let pending = self.fence.remaining();
        if !pending.is_zero() {
            log::debug!(wait_ms = pending.as_millis() as u64; "waiting on throttle fence");
        }
        self.fence.wait(cancel).await.map_err(|e| {
            TransportError::with_source(TransportErrorKind::Cancelled, "throttle wait cancelled", e)
        })?;

        let response = next.run(request).await?;

        if response.status().as_u16() == 429 {
            let pause = retry_after(response.headers())
                .unwrap_or(self.default_pause)
                .min(self.max_pause);
            self.fence.raise(pause);
            log::info!(
                status = 429,
                pause_ms = pause.as_millis() as u64;
                "provider throttling, raising fence"
            );
        }

        Ok(response)
    }
}
