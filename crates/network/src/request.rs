// crates/network/src/request.rs
//! Request and response values passed through the pipeline

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use steadyline_core::{TransportError, TransportErrorKind};

/// A stream of body chunks
///
/// Failures are `io::Error`s so the stream can feed `std::io`/`tokio::io`
/// adapters directly. Transport failures travel as the error's payload.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Outgoing request body
pub enum RequestBody {
    /// No body
    Empty,
    /// A fully buffered body; can be replayed any number of times
    Buffered(Bytes),
    /// A one-shot body stream
    Streaming {
        stream: ByteStream,
        length: Option<u64>,
    },
}

impl RequestBody {
    /// Wraps a one-shot stream
    pub fn streaming(stream: ByteStream, length: Option<u64>) -> Self {
        Self::Streaming { stream, length }
    }

    /// Returns true if the body can be sent again from its start
    pub fn is_replayable(&self) -> bool {
        matches!(self, Self::Empty | Self::Buffered(_))
    }

    /// Body length when it is known up front
    pub fn known_length(&self) -> Option<u64> {
        match self {
            Self::Empty => Some(0),
            Self::Buffered(bytes) => Some(bytes.len() as u64),
            Self::Streaming { length, .. } => *length,
        }
    }

    fn try_clone(&self) -> Option<Self> {
        match self {
            Self::Empty => Some(Self::Empty),
            Self::Buffered(bytes) => Some(Self::Buffered(bytes.clone())),
            Self::Streaming { .. } => None,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            Self::Streaming { length, .. } => write!(f, "Streaming(length: {:?})", length),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Buffered(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Buffered(Bytes::from(bytes))
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::Buffered(Bytes::from(text))
    }
}

/// A request travelling through the pipeline
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: RequestBody,
    cost: u32,
    /// Physical sends so far, shared with every replay copy
    attempts: Arc<AtomicU32>,
}

impl Request {
    /// Creates a request with no headers, no body and a cost of 1
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            cost: 1,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Shorthand for a GET request
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Sets a header, replacing any previous value
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body
    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the number of admission units this request consumes
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Admission units
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Returns true if the request may be sent again after a failure
    ///
    /// GET and HEAD only need a replayable body (they normally have none).
    /// Every other method also needs a body of known, finite length.
    pub fn is_retry_safe(&self) -> bool {
        if matches!(self.method, Method::GET | Method::HEAD) {
            self.body.is_replayable()
        } else {
            self.body.is_replayable() && self.body.known_length().is_some()
        }
    }

    /// Copies the request if its body can be replayed
    pub fn try_clone(&self) -> Option<Self> {
        Some(Self {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
            cost: self.cost,
            attempts: Arc::clone(&self.attempts),
        })
    }

    /// Claims the next attempt number of this logical request
    ///
    /// Copies made by [`Request::try_clone`] draw from the same sequence, so
    /// numbers stay unique across every layer that replays the request.
    pub(crate) fn next_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn into_parts(self) -> (Method, Url, HeaderMap, RequestBody) {
        (self.method, self.url, self.headers, self.body)
    }
}

/// Incoming response body
pub enum ResponseBody {
    /// Fully read into memory
    Buffered(Bytes),
    /// Still on the wire
    Streaming(ByteStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            Self::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// A response coming back up the pipeline
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// A response with a buffered body and no headers
    pub fn buffered(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self::new(status, HeaderMap::new(), ResponseBody::Buffered(body.into()))
    }

    /// Sets a header, replacing any previous value
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as text, if present and valid
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Length announced by the server, or the buffered length
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .or(match &self.body {
                ResponseBody::Buffered(bytes) => Some(bytes.len() as u64),
                ResponseBody::Streaming(_) => None,
            })
    }

    /// The body if it has already been read
    pub fn buffered_body(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Buffered(bytes) => Some(bytes),
            ResponseBody::Streaming(_) => None,
        }
    }

    /// Reads the whole body
    pub async fn bytes(self) -> Result<Bytes, TransportError> {
        match self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Streaming(mut stream) => {
                let mut collected = Vec::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| {
                        TransportError::with_source(
                            TransportErrorKind::StreamSevered,
                            "failed reading response body",
                            e,
                        )
                    })?;
                    collected.extend_from_slice(&chunk);
                }
                Ok(Bytes::from(collected))
            }
        }
    }

    /// Turns the body into a chunk stream
    pub fn into_stream(self) -> ByteStream {
        match self.body {
            ResponseBody::Buffered(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            ResponseBody::Streaming(stream) => stream,
        }
    }
}
