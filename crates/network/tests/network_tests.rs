// crates/network/tests/network_tests.rs
//! Integration tests for the transport stack

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, RANGE, RETRY_AFTER};
use reqwest::{Method, StatusCode, Url};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use steadyline_core::{ClassifiedError, CountBus, ErrorKind, TransportError, TransportErrorKind};
use steadyline_network::{
    standard_pipeline, CancellationToken, Client, ClientConfig, Connection, Getter, Pipeline,
    Request, RequestBody, Response, RetryInterceptor, ThrottleFence, Transport,
    RETRY_ATTEMPT_HEADER,
};
use steadyline_resilience::{RateBudget, RetryPolicy};
use tokio::time::Instant;

/// Plays back canned outcomes, then answers 200
struct Script {
    outcomes: Mutex<VecDeque<Result<Response, TransportErrorKind>>>,
    seen: Mutex<Vec<(Instant, HeaderMap)>>,
}

impl Script {
    fn new(outcomes: Vec<Result<Response, TransportErrorKind>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn sends(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn attempts(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, h)| h[RETRY_ATTEMPT_HEADER].to_str().unwrap().to_string())
            .collect()
    }

    fn gaps(&self) -> Vec<Duration> {
        let seen = self.seen.lock().unwrap();
        seen.windows(2).map(|w| w[1].0 - w[0].0).collect()
    }
}

#[async_trait]
impl Transport for Script {
    async fn send(
        &self,
        request: Request,
        _cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        self.seen
            .lock()
            .unwrap()
            .push((Instant::now(), request.headers().clone()));
        match self.outcomes.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(kind)) => Err(TransportError::new(kind, "scripted failure")),
            None => Ok(Response::buffered(StatusCode::OK, r#"{"id":"root"}"#)),
        }
    }
}

fn reply(code: u16) -> Result<Response, TransportErrorKind> {
    Ok(Response::buffered(
        StatusCode::from_u16(code).unwrap(),
        Bytes::new(),
    ))
}

fn url() -> Url {
    Url::parse("https://graph.example.com/v1.0/me/drive/root").unwrap()
}

fn config() -> ClientConfig {
    ClientConfig {
        retry_policy: RetryPolicy::new(3).with_min_delay(Duration::from_millis(500)),
        ..ClientConfig::default()
    }
}

fn client(transport: Arc<Script>) -> Client {
    Client::builder(config())
        .transport(transport)
        .build()
        .expect("client")
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_retry_with_backoff() {
    let transport = Script::new(vec![reply(500), reply(502)]);
    let client = client(transport.clone());

    let response = client.get(url(), &CancellationToken::new()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.sends(), 3);
    assert_eq!(transport.attempts(), vec!["0", "1", "2"]);
    assert_eq!(
        transport.gaps(),
        vec![Duration::from_millis(500), Duration::from_millis(1000)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_honoured() {
    let shed = Response::buffered(StatusCode::SERVICE_UNAVAILABLE, Bytes::new())
        .with_header(RETRY_AFTER, HeaderValue::from_static("2"));
    let transport = Script::new(vec![Ok(shed)]);
    let client = client(transport.clone());

    let drive: serde_json::Value = client
        .get_json(url(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(drive["id"], "root");
    assert_eq!(transport.gaps(), vec![Duration::from_secs(2)]);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_fence_holds_other_requests() {
    let throttled = Response::buffered(StatusCode::TOO_MANY_REQUESTS, Bytes::new())
        .with_header(RETRY_AFTER, HeaderValue::from_static("4"));
    let transport = Script::new(vec![Ok(throttled)]);
    let fence = ThrottleFence::shared();
    let counters = Arc::new(CountBus::new());
    let limiter = RateBudget::TokenBucket {
        rate_per_second: 100.0,
        burst: 100,
    }
    .build()
    .unwrap();
    let pipeline = standard_pipeline(transport.clone(), &config(), fence.clone(), limiter, counters.clone());

    let start = Instant::now();
    let response = pipeline
        .send(Request::get(url()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.sends(), 2);
    // Retry-After drives the retry, the fence keeps the replay behind it
    assert!(start.elapsed() >= Duration::from_secs(4));
    assert_eq!(counters.get("steadyline.calls"), 2);
    assert_eq!(counters.get("steadyline.status.429"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_streaming_post_is_sent_once() {
    let transport = Script::new(vec![reply(500)]);
    let pipeline = Pipeline::new(transport.clone()).with(RetryInterceptor::new(
        RetryPolicy::new(3).with_min_delay(Duration::from_millis(100)),
    ));

    let body = stream::iter(vec![Ok(Bytes::from_static(b"chunk"))]).boxed();
    let request =
        Request::new(Method::POST, url()).with_body(RequestBody::streaming(body, None));
    let response = pipeline.send(request, &CancellationToken::new()).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(transport.sends(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_failures_are_supervised() {
    let transport = Script::new(vec![
        Err(TransportErrorKind::ConnectionReset),
        Err(TransportErrorKind::ConnectionReset),
        Err(TransportErrorKind::ConnectionReset),
        Err(TransportErrorKind::ConnectionReset),
    ]);
    let client = client(transport.clone());

    let response = client.get(url(), &CancellationToken::new()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.sends(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_carries_context() {
    let body = r#"{"error":{"code":"accessDenied","message":"Access denied"}}"#;
    let transport = Script::new(vec![Ok(Response::buffered(StatusCode::FORBIDDEN, body))]);
    let client = client(transport.clone());

    let err = client.get(url(), &CancellationToken::new()).await.unwrap_err();

    assert_eq!(transport.sends(), 1);
    assert_eq!(err.status(), Some(403));
    assert_eq!(err.context_value("method"), Some("GET"));
    assert!(err.context_value("url").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_refuses_new_calls() {
    let transport = Script::new(vec![]);
    let client = client(transport.clone());

    client.shutdown();
    assert!(client.get(url(), &CancellationToken::new()).await.is_err());
    assert_eq!(transport.sends(), 0);
}

const PAYLOAD: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Serves PAYLOAD, severing the first connection after `cut` bytes
struct Resource {
    ranges: bool,
    cut: Mutex<Option<usize>>,
    requested: Mutex<Vec<Option<String>>>,
}

impl Resource {
    fn new(ranges: bool, cut: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            ranges,
            cut: Mutex::new(cut),
            requested: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Getter for Resource {
    fn supports_range(&self) -> bool {
        self.ranges
    }

    async fn get(
        &self,
        headers: HeaderMap,
        _cancel: &CancellationToken,
    ) -> Result<Connection, steadyline_core::BoxError> {
        let range = headers.get(RANGE).map(|v| v.to_str().unwrap().to_string());
        self.requested.lock().unwrap().push(range.clone());

        let start = range
            .as_deref()
            .and_then(|r| r.strip_prefix("bytes="))
            .and_then(|r| r.strip_suffix('-'))
            .map(|r| r.parse::<usize>().unwrap())
            .unwrap_or(0);
        let cut = self.cut.lock().unwrap().take();

        let mut items: Vec<io::Result<Bytes>> = PAYLOAD[start..cut.unwrap_or(PAYLOAD.len())]
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if cut.is_some() {
            items.push(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }

        let body = stream::iter(items).boxed();
        Ok(if start > 0 {
            Connection::partial(body)
        } else {
            Connection::full(body)
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_download_resumes_with_range() {
    let client = client(Script::new(vec![]));
    let resource = Resource::new(true, Some(10));

    let mut reader = client
        .download_with(resource.clone(), CancellationToken::new())
        .await
        .unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();

    assert_eq!(out, PAYLOAD);
    assert_eq!(reader.offset(), PAYLOAD.len() as u64);
    assert_eq!(
        *resource.requested.lock().unwrap(),
        vec![None, Some("bytes=10-".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_download_resumes_without_range() {
    let client = client(Script::new(vec![]));
    let resource = Resource::new(false, Some(14));

    let reader = client
        .download_with(resource.clone(), CancellationToken::new())
        .await
        .unwrap();
    let chunks: Vec<Bytes> = reader
        .into_stream()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;

    assert_eq!(chunks.concat(), PAYLOAD);
    assert_eq!(*resource.requested.lock().unwrap(), vec![None, None]);
}

/// Refuses every connection
struct Unreachable;

#[async_trait]
impl Getter for Unreachable {
    fn supports_range(&self) -> bool {
        true
    }

    async fn get(
        &self,
        _headers: HeaderMap,
        _cancel: &CancellationToken,
    ) -> Result<Connection, steadyline_core::BoxError> {
        Err(Box::new(TransportError::new(
            TransportErrorKind::Timeout,
            "operation timed out",
        )))
    }
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_download_is_no_progress() {
    let client = client(Script::new(vec![]));

    let err: ClassifiedError = client
        .download_with(Arc::new(Unreachable), CancellationToken::new())
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::NoProgress);
    assert_eq!(err.context_value("attempts"), Some("3"));
}
