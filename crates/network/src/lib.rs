// crates/network/src/lib.rs
//! Resilient HTTP transport
//!
//! - [`Pipeline`]: interceptors (retry, default retry, logging, throttle
//!   fence, rate limit, metrics) around a [`Transport`]
//! - [`SupervisedSender`]: whole-call retries and the panic boundary
//! - [`ResumableReader`]: downloads that reconnect from the last offset
//! - [`Client`]: all of the above wired from a [`ClientConfig`]
//!
//! # Example
//!
//! ```rust,no_run
//! use steadyline_network::{Client, CancellationToken};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new()?;
//! let url = "https://graph.example.com/v1.0/me/drive".parse()?;
//! let drive: serde_json::Value = client.get_json(url, &CancellationToken::new()).await?;
//! println!("{}", drive["id"]);
//! # Ok(())
//! # }
//! ```

mod client;
mod credentials;
mod error;
mod getter;
mod logging;
mod metrics;
mod pipeline;
mod rate_limit;
mod redact;
mod request;
mod resume;
mod retry;
mod supervisor;
mod throttle;
mod transport;

#[cfg(test)]
mod testing;

pub use client::{standard_pipeline, Client, ClientBuilder, ClientConfig};
pub use credentials::{CredentialProvider, StaticToken};
pub use error::{parse_url, NetworkError, NetworkResult};
pub use getter::{Connection, Getter, HttpGetter};
pub use logging::LoggingInterceptor;
pub use metrics::{MetricsInterceptor, Outcome, RESOURCE_UNIT_HEADER};
pub use pipeline::{Interceptor, Next, Pipeline};
pub use rate_limit::RateLimitInterceptor;
pub use redact::{redact_url, REDACTED};
pub use request::{ByteStream, Request, RequestBody, Response, ResponseBody};
pub use resume::{DownloadState, ResumableReader};
pub use retry::{
    is_backoff_retry_status, is_default_retry_status, retry_after, DefaultRetryInterceptor,
    RetryInterceptor, DEFAULT_RETRY_MAX_TOTAL_DELAY, RETRY_ATTEMPT_HEADER,
};
pub use supervisor::{SupervisedSender, CLIENT_REQUEST_ID_HEADER, REQUEST_ID_HEADER};
pub use throttle::{ThrottleFence, ThrottlingInterceptor};
pub use transport::{map_reqwest_error, ReqwestTransport, Transport};

pub use steadyline_resilience::CancellationToken;
