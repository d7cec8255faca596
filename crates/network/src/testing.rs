// crates/network/src/testing.rs
//! Scripted transport shared by the unit tests

use crate::request::{Request, Response};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};
use std::collections::VecDeque;
use std::sync::Mutex;
use steadyline_core::{TransportError, TransportErrorKind};
use steadyline_resilience::CancellationToken;
use tokio::time::Instant;

pub(crate) enum Step {
    Reply {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: Bytes,
    },
    Fail(TransportErrorKind),
    Panic,
}

impl Step {
    pub(crate) fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        if let Step::Reply { headers, .. } = &mut self {
            headers.push((name, value.into()));
        }
        self
    }
}

pub(crate) fn ok() -> Step {
    status(200)
}

pub(crate) fn status(code: u16) -> Step {
    status_with_body(code, "")
}

pub(crate) fn status_with_body(code: u16, body: &'static str) -> Step {
    Step::Reply {
        status: code,
        headers: Vec::new(),
        body: Bytes::from_static(body.as_bytes()),
    }
}

pub(crate) fn fail(kind: TransportErrorKind) -> Step {
    Step::Fail(kind)
}

pub(crate) fn url() -> Url {
    Url::parse("https://graph.example.com/v1.0/users/someone@example.com/drive/root").unwrap()
}

pub(crate) fn get() -> Request {
    Request::get(url())
}

/// Replays a fixed list of steps, then answers 200
pub(crate) struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    seen: Mutex<Vec<(HeaderMap, Instant)>>,
}

impl ScriptedTransport {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sends(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<HeaderMap> {
        self.seen.lock().unwrap().iter().map(|(h, _)| h.clone()).collect()
    }

    pub(crate) fn times(&self) -> Vec<Instant> {
        self.seen.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: Request,
        _cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        self.seen
            .lock()
            .unwrap()
            .push((request.headers().clone(), Instant::now()));

        let step = self.steps.lock().unwrap().pop_front();
        match step.unwrap_or_else(ok) {
            Step::Reply {
                status,
                headers,
                body,
            } => {
                let mut response = Response::buffered(StatusCode::from_u16(status).unwrap(), body);
                for (name, value) in headers {
                    response = response.with_header(
                        HeaderName::from_static(name),
                        HeaderValue::from_str(&value).unwrap(),
                    );
                }
                Ok(response)
            }
            Step::Fail(kind) => Err(TransportError::new(kind, "scripted failure")),
            Step::Panic => panic!("scripted panic"),
        }
    }
}
