// crates/network/src/logging.rs
//! Request/response logging

use crate::pipeline::{Interceptor, Next};
use crate::redact::redact_url;
use crate::request::{Request, Response};
use crate::retry::RETRY_ATTEMPT_HEADER;
use async_trait::async_trait;
use steadyline_core::TransportError;
use tokio::time::Instant;

/// Logs every physical send with redacted metadata
///
/// 2xx responses are logged at debug. Other statuses are logged at info with
/// the start of their body. Successful bodies are only logged when body
/// logging was switched on, and only if they are already in memory.
#[derive(Debug, Clone)]
pub struct LoggingInterceptor {
    log_bodies: bool,
    body_limit: usize,
}

impl LoggingInterceptor {
    pub fn new(log_bodies: bool, body_limit: usize) -> Self {
        Self {
            log_bodies,
            body_limit,
        }
    }

    fn body_excerpt(&self, response: &Response, force: bool) -> Option<String> {
        if !force && !self.log_bodies {
            return None;
        }
        let body = response.buffered_body()?;
        let kept = &body[..body.len().min(self.body_limit)];
        let mut text = String::from_utf8_lossy(kept).into_owned();
        if body.len() > self.body_limit {
            text.push_str("...");
        }
        Some(text)
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(
        &self,
        request: Request,
        next: Next<'_>,
    ) -> Result<Response, TransportError> {
        let method = request.method().clone();
        let url = redact_url(request.url());
        let attempt = request
            .headers()
            .get(RETRY_ATTEMPT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        let start = Instant::now();

        let result = next.run(request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Err(err) => {
                log::debug!(
                    method = method.as_str(),
                    url = url.as_str(),
                    attempt = attempt,
                    elapsed_ms = elapsed_ms,
                    error = err.to_string().as_str();
                    "request failed below HTTP"
                );
            }
            Ok(response) if response.status().is_success() => {
                let length = response.content_length().unwrap_or(0);
                match self.body_excerpt(response, false) {
                    Some(body) => log::debug!(
                        method = method.as_str(),
                        url = url.as_str(),
                        status = response.status().as_u16(),
                        content_length = length,
                        attempt = attempt,
                        elapsed_ms = elapsed_ms,
                        body = body.as_str();
                        "response"
                    ),
                    None => log::debug!(
                        method = method.as_str(),
                        url = url.as_str(),
                        status = response.status().as_u16(),
                        content_length = length,
                        attempt = attempt,
                        elapsed_ms = elapsed_ms;
                        "response"
                    ),
                }
            }
            Ok(response) => {
                let body = self.body_excerpt(response, true).unwrap_or_default();
                let message = if response.status().as_u16() == 429 {
                    "throttled response"
                } else {
                    "non-success response"
                };
                log::info!(
                    method = method.as_str(),
                    url = url.as_str(),
                    status = response.status().as_u16(),
                    content_length = response.content_length().unwrap_or(0),
                    attempt = attempt,
                    elapsed_ms = elapsed_ms,
                    retry_after = response.header_str("retry-after").unwrap_or(""),
                    request_id = response.header_str("request-id").unwrap_or(""),
                    body = body.as_str();
                    "{}", message
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::testing::{get, ok, status_with_body, ScriptedTransport};
    use reqwest::StatusCode;
    use std::sync::Arc;
    use steadyline_resilience::CancellationToken;

    #[test]
    fn test_excerpt_is_truncated() {
        let interceptor = LoggingInterceptor::new(false, 4);
        let response = Response::buffered(StatusCode::BAD_REQUEST, "abcdefgh");
        assert_eq!(interceptor.body_excerpt(&response, true).unwrap(), "abcd...");
    }

    #[test]
    fn test_success_body_needs_opt_in() {
        let response = Response::buffered(StatusCode::OK, "payload");
        assert!(LoggingInterceptor::new(false, 64)
            .body_excerpt(&response, false)
            .is_none());
        assert_eq!(
            LoggingInterceptor::new(true, 64)
                .body_excerpt(&response, false)
                .unwrap(),
            "payload"
        );
    }

    #[tokio::test]
    async fn test_passes_responses_through() {
        let _ = env_logger::builder().is_test(true).try_init();
        let transport = Arc::new(ScriptedTransport::new(vec![
            status_with_body(404, r#"{"error":{"code":"itemNotFound"}}"#),
            ok(),
        ]));
        let pipeline = Pipeline::new(transport).with(LoggingInterceptor::new(false, 1024));
        let cancel = CancellationToken::new();

        assert_eq!(pipeline.send(get(), &cancel).await.unwrap().status(), 404);
        assert_eq!(pipeline.send(get(), &cancel).await.unwrap().status(), 200);
    }
}
