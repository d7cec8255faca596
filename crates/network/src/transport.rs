// crates/network/src/transport.rs
//! The physical send

use crate::error::{NetworkError, NetworkResult};
use crate::request::{Request, RequestBody, Response, ResponseBody};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::io;
use std::time::Duration;
use steadyline_core::{chain, is_transient_io_kind, TransportError, TransportErrorKind};
use steadyline_resilience::{run_or_cancel, CancellationToken};

/// Sends one request and returns whatever came back
///
/// Non-success statuses are responses, not errors. Only failures below HTTP
/// (timeouts, resets, cancellation) come back as [`TransportError`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError>;
}

/// [`Transport`] backed by a `reqwest::Client`
///
/// Bodies of responses with status >= 400 are read into memory so that
/// interceptors and the classifier can inspect them. Successful bodies are
/// left streaming.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a client with an absolute per-call timeout
    pub fn new(timeout: Duration, user_agent: &str) -> NetworkResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(NetworkError::Http)?;

        Ok(Self { client })
    }

    /// Uses an already configured client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        let (method, url, headers, body) = request.into_parts();
        let mut builder = self.client.request(method, url).headers(headers);

        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Buffered(bytes) => builder.body(bytes),
            RequestBody::Streaming { stream, length } => {
                let builder = builder.body(reqwest::Body::wrap_stream(stream));
                match length {
                    Some(length) => builder.header(reqwest::header::CONTENT_LENGTH, length),
                    None => builder,
                }
            }
        };

        let response = run_or_cancel(builder.send(), cancel)
            .await
            .map_err(|e| TransportError::with_source(TransportErrorKind::Cancelled, "send cancelled", e))?
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let headers = response.headers().clone();

        let body = if status.as_u16() >= 400 {
            let bytes = run_or_cancel(response.bytes(), cancel)
                .await
                .map_err(|e| {
                    TransportError::with_source(TransportErrorKind::Cancelled, "read cancelled", e)
                })?
                .map_err(map_reqwest_error)?;
            ResponseBody::Buffered(bytes)
        } else {
            let stream = response
                .bytes_stream()
                .map_err(|e| {
                    let transport = map_reqwest_error(e);
                    let kind = if transport.is_transient() {
                        io::ErrorKind::ConnectionReset
                    } else {
                        io::ErrorKind::Other
                    };
                    io::Error::new(kind, transport)
                })
                .boxed();
            ResponseBody::Streaming(stream)
        };

        Ok(Response::new(status, headers, body))
    }
}

/// Maps a reqwest failure onto the transport failure classes
pub fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::StreamSevered
    } else if chain(&err).any(|link| {
        link.downcast_ref::<io::Error>()
            .is_some_and(|io| is_transient_io_kind(io.kind()))
    }) {
        TransportErrorKind::ConnectionReset
    } else {
        TransportErrorKind::Request
    };

    let message = err.to_string();
    TransportError::with_source(kind, message, err)
}
