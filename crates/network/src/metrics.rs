// crates/network/src/metrics.rs
//! Per-call counters

use crate::pipeline::{Interceptor, Next};
use crate::request::{Request, Response};
use async_trait::async_trait;
use std::sync::Arc;
use steadyline_core::{CountBus, TransportError};
use tokio::time::Instant;

/// Provider header reporting what a call cost against its quota
pub const RESOURCE_UNIT_HEADER: &str = "x-ms-resource-unit";

/// Which bucket a finished call is counted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Redirect,
    Throttled,
    ClientError,
    ServerError,
    TransportError,
}

impl Outcome {
    pub fn of(result: &Result<Response, TransportError>) -> Self {
        let status = match result {
            Ok(response) => response.status().as_u16(),
            Err(_) => return Outcome::TransportError,
        };
        match status {
            429 => Outcome::Throttled,
            200..=299 => Outcome::Success,
            300..=399 => Outcome::Redirect,
            400..=499 => Outcome::ClientError,
            _ => Outcome::ServerError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Redirect => "redirect",
            Outcome::Throttled => "throttled",
            Outcome::ClientError => "client_error",
            Outcome::ServerError => "server_error",
            Outcome::TransportError => "transport_error",
        }
    }
}

/// Records calls, statuses, cost units, elapsed time and outcomes
///
/// Keys are `<prefix>.calls`, `<prefix>.status.<code>`,
/// `<prefix>.cost_units`, `<prefix>.elapsed_ms` and
/// `<prefix>.outcome.<bucket>`. The prefix belongs to the caller.
#[derive(Debug, Clone)]
pub struct MetricsInterceptor {
    counters: Arc<CountBus>,
    prefix: String,
}

impl MetricsInterceptor {
    pub fn new(counters: Arc<CountBus>, prefix: impl Into<String>) -> Self {
        Self {
            counters,
            prefix: prefix.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}.{}", self.prefix, name)
    }
}

#[async_trait]
impl Interceptor for MetricsInterceptor {
    async fn intercept(
        &self,
        request: Request,
        next: Next<'_>,
    ) -> Result<Response, TransportError> {
        let start = Instant::now();
        let result = next.run(request).await;
        let elapsed = start.elapsed();

        self.counters.inc(&self.key("calls"));
        self.counters
            .add(&self.key("elapsed_ms"), elapsed.as_millis() as u64);
        self.counters
            .inc(&self.key(&format!("outcome.{}", Outcome::of(&result).as_str())));

        if let Ok(response) = &result {
            self.counters
                .inc(&self.key(&format!("status.{}", response.status().as_u16())));
            let units = response
                .header_str(RESOURCE_UNIT_HEADER)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(1);
            self.counters.add(&self.key("cost_units"), units);
        }

        result
    }
}
