// crates/network/src/rate_limit.rs
//! Admission control in front of the transport

use crate::pipeline::{Interceptor, Next};
use crate::request::{Request, Response};
use async_trait::async_trait;
use std::sync::Arc;
use steadyline_core::{TransportError, TransportErrorKind};
use steadyline_resilience::{RateLimiter, ResilienceError};

/// Takes `request.cost()` units from a shared limiter before every send
#[derive(Clone)]
pub struct RateLimitInterceptor {
    limiter: Arc<dyn RateLimiter>,
}

impl RateLimitInterceptor {
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    async fn intercept(
        &self,
        request: Request,
        next: Next<'_>,
    ) -> Result<Response, TransportError> {
        self.limiter
            .wait_n(request.cost(), next.cancel())
            .await
            .map_err(|err| {
                let kind = match err {
                    ResilienceError::Cancelled => TransportErrorKind::Cancelled,
                    _ => TransportErrorKind::Request,
                };
                TransportError::with_source(kind, "admission refused", err)
            })?;

        next.run(request).await
    }
}
