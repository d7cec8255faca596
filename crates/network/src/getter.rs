// crates/network/src/getter.rs
//! Connection source for resumable downloads

use crate::request::{ByteStream, Request};
use crate::transport::Transport;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};
use std::sync::Arc;
use steadyline_core::{BoxError, ResponseError};
use steadyline_resilience::CancellationToken;

/// One physical connection handed out by a [`Getter`]
pub struct Connection {
    body: ByteStream,
    partial: bool,
}

impl Connection {
    /// A connection carrying the whole resource from byte 0
    pub fn full(body: ByteStream) -> Self {
        Self {
            body,
            partial: false,
        }
    }

    /// A connection that honoured the requested range
    pub fn partial(body: ByteStream) -> Self {
        Self {
            body,
            partial: true,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn into_body(self) -> ByteStream {
        self.body
    }
}

/// Opens connections to one resource
///
/// The getter owns the URL. Callers only pass extra headers, notably a
/// one-sided `Range: bytes=<offset>-` when [`Getter::supports_range`] is true.
#[async_trait]
pub trait Getter: Send + Sync {
    fn supports_range(&self) -> bool;

    async fn get(
        &self,
        headers: HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Connection, BoxError>;
}

/// [`Getter`] issuing GET requests through a transport
#[derive(Clone)]
pub struct HttpGetter {
    transport: Arc<dyn Transport>,
    url: Url,
    headers: HeaderMap,
    supports_range: bool,
}

impl HttpGetter {
    pub fn new(transport: Arc<dyn Transport>, url: Url) -> Self {
        Self {
            transport,
            url,
            headers: HeaderMap::new(),
            supports_range: true,
        }
    }

    /// Headers sent with every connection attempt
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Marks the resource as not accepting range requests
    pub fn without_range(mut self) -> Self {
        self.supports_range = false;
        self
    }
}

#[async_trait]
impl Getter for HttpGetter {
    fn supports_range(&self) -> bool {
        self.supports_range
    }

    async fn get(
        &self,
        headers: HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Connection, BoxError> {
        let mut request = Request::get(self.url.clone());
        request.headers_mut().extend(self.headers.clone());
        request.headers_mut().extend(headers);

        let response = self.transport.send(request, cancel).await?;
        let status = response.status();

        if status == StatusCode::PARTIAL_CONTENT {
            return Ok(Connection::partial(response.into_stream()));
        }
        if status.is_success() {
            return Ok(Connection::full(response.into_stream()));
        }

        let body = response.bytes().await?;
        Err(Box::new(ResponseError::new(status.as_u16(), &body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ok, status, status_with_body, ScriptedTransport};
    use reqwest::header::{HeaderValue, RANGE};

    fn getter(transport: Arc<ScriptedTransport>) -> HttpGetter {
        HttpGetter::new(transport, crate::testing::url())
    }

    #[tokio::test]
    async fn test_partial_content_is_partial() {
        let transport = Arc::new(ScriptedTransport::new(vec![status(206), ok()]));
        let getter = getter(transport.clone());
        let cancel = CancellationToken::new();

        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static("bytes=10-"));
        assert!(getter.get(headers, &cancel).await.unwrap().is_partial());
        assert!(!getter.get(HeaderMap::new(), &cancel).await.unwrap().is_partial());

        let seen = transport.requests();
        assert_eq!(seen[0].get(RANGE).unwrap(), "bytes=10-");
        assert!(seen[1].get(RANGE).is_none());
    }

    #[tokio::test]
    async fn test_error_status_becomes_response_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![status_with_body(
            404,
            r#"{"error":{"code":"itemNotFound"}}"#,
        )]));
        let err = getter(transport)
            .get(HeaderMap::new(), &CancellationToken::new())
            .await
            .err()
            .unwrap();

        let response = err.downcast_ref::<ResponseError>().unwrap();
        assert_eq!(response.status(), 404);
    }

    #[test]
    fn test_range_can_be_disabled() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        assert!(getter(transport.clone()).supports_range());
        assert!(!getter(transport).without_range().supports_range());
    }
}
