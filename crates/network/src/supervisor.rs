// crates/network/src/supervisor.rs
//! Connection-level supervision for structured calls
//!
//! The pipeline below retries individual sends. This layer retries the whole
//! call, credentials included, and is the boundary below which no failure,
//! panics included, may escape as anything other than a [`ClassifiedError`].

use crate::credentials::CredentialProvider;
use crate::redact::redact_url;
use crate::request::{Request, Response};
use crate::transport::Transport;
use futures::FutureExt;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use steadyline_core::{
    is_empty_not_found, is_invalid_request, ClassifiedError, ErrorClassifier, ErrorKind,
    ResponseError, VIRUS_INFECTED_HEADER,
};
use steadyline_resilience::{sleep_or_cancel, CancellationToken, RetryPolicy};

/// Correlation id sent with every supervised call
pub const CLIENT_REQUEST_ID_HEADER: &str = "client-request-id";

/// Provider request id read back from responses
pub const REQUEST_ID_HEADER: &str = "request-id";

/// Retries whole calls on connection and credential failures
#[derive(Clone)]
pub struct SupervisedSender {
    inner: Arc<dyn Transport>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    policy: RetryPolicy,
    classifier: ErrorClassifier,
}

impl SupervisedSender {
    pub fn new(inner: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            credentials: None,
            policy,
            classifier: ErrorClassifier::new(),
        }
    }

    /// Authorizes every attempt with `credentials`
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends the request; any status >= 400 comes back as an error
    pub async fn send(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, ClassifiedError> {
        let mut request = request;
        if !request.headers().contains_key(CLIENT_REQUEST_ID_HEADER) {
            let id = uuid::Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                request
                    .headers_mut()
                    .insert(HeaderName::from_static(CLIENT_REQUEST_ID_HEADER), value);
            }
        }

        let method = request.method().clone();
        let url = redact_url(request.url());
        let backoff = self.policy.connection_backoff();
        let mut retried: Vec<String> = Vec::new();
        let mut auth_retried = false;

        loop {
            let replay = request.try_clone();
            let outcome = AssertUnwindSafe(self.attempt(request, cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_error(panic)));

            let err = match outcome {
                Ok(response) => {
                    if !retried.is_empty() {
                        log::debug!(
                            method = method.as_str(),
                            url = url.as_str(),
                            attempts = retried.len() + 1;
                            "call recovered"
                        );
                    }
                    return Ok(response);
                }
                Err(err) => err,
            };

            let attempt = retried.len() as u32;
            let retry = attempt < self.policy.max_connection_retries()
                && !cancel.is_cancelled()
                && self.is_retryable(&err, &method, &mut auth_retried);

            let next = match replay {
                Some(next) if retry => next,
                _ => return Err(self.give_up(err, &method, &url, retried)),
            };

            log::debug!(
                method = method.as_str(),
                url = url.as_str(),
                attempt = attempt + 1,
                kind = err.kind().as_str(),
                error = err.to_string().as_str();
                "retrying call"
            );
            retried.push(err.to_string());

            if let Err(cancelled) = sleep_or_cancel(backoff.delay(attempt + 1), cancel).await {
                let err = ClassifiedError::new(cancelled).with_label(ErrorKind::Unclassified);
                return Err(self.give_up(err, &method, &url, retried));
            }
            request = next;
        }
    }

    /// Sends the request and decodes a JSON body
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<T, ClassifiedError> {
        let response = self.send(request, cancel).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| self.classifier.classify(e))?;
        serde_json::from_slice(&body).map_err(|e| self.classifier.classify(e))
    }

    async fn attempt(
        &self,
        mut request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, ClassifiedError> {
        if let Some(credentials) = &self.credentials {
            let url = request.url().clone();
            credentials
                .authorize(&url, request.headers_mut())
                .await
                .map_err(|e| ClassifiedError::new(e).with_label(ErrorKind::AuthExpired))?;
        }

        let response = self
            .inner
            .send(request, cancel)
            .await
            .map_err(|e| self.classifier.classify(e))?;

        let status = response.status().as_u16();
        if status < 400 {
            return Ok(response);
        }

        let request_id = response.header_str(REQUEST_ID_HEADER).map(str::to_string);
        let malware = response
            .header_str(VIRUS_INFECTED_HEADER)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        let body = response
            .bytes()
            .await
            .map_err(|e| self.classifier.classify(e))?;

        let mut error = ResponseError::new(status, &body).with_malware_flag(malware);
        if let Some(request_id) = request_id {
            error = error.with_request_id(request_id);
        }
        Err(self.classifier.classify(error))
    }

    fn is_retryable(&self, err: &ClassifiedError, method: &Method, auth_retried: &mut bool) -> bool {
        if err.has_label(ErrorKind::ConnectionTransient) {
            return true;
        }
        if err.has_label(ErrorKind::AuthExpired) {
            let first = !*auth_retried;
            *auth_retried = true;
            return first;
        }
        *method == Method::GET && (is_empty_not_found(err) || is_invalid_request(err))
    }

    fn give_up(
        &self,
        mut err: ClassifiedError,
        method: &Method,
        url: &str,
        retried: Vec<String>,
    ) -> ClassifiedError {
        err.insert_context("method", method.as_str());
        err.insert_context("url", url);
        err.insert_context("attempts", retried.len() + 1);
        if !retried.is_empty() {
            err.insert_context("retried_errors", retried.join("; "));
        }

        log::warn!(
            method = method.as_str(),
            url = url,
            kind = err.kind().as_str(),
            status = err.status().unwrap_or(0),
            attempts = retried.len() + 1,
            error = err.to_string().as_str();
            "call failed"
        );
        err
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> ClassifiedError {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic during call: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic during call: {}", s)
    } else {
        "panic during call".to_string()
    };
    ClassifiedError::of_kind(ErrorKind::Unclassified, message).with_context("panic", true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fail, get, ok, status, status_with_body, ScriptedTransport, Step};
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use reqwest::Url;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use steadyline_core::{BoxError, Label, TransportErrorKind};

    fn sender(transport: Arc<ScriptedTransport>) -> SupervisedSender {
        SupervisedSender::new(
            transport,
            RetryPolicy::new(3)
                .with_min_delay(Duration::from_millis(100))
                .with_max_connection_retries(2),
        )
    }

    fn script(steps: Vec<Step>) -> Arc<ScriptedTransport> {
        Arc::new(ScriptedTransport::new(steps))
    }

    struct CountingToken(AtomicU32);

    #[async_trait]
    impl CredentialProvider for CountingToken {
        async fn authorize(&self, _url: &Url, headers: &mut HeaderMap) -> Result<(), BoxError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            headers.insert(
                reqwest::header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer token-{}", n)).unwrap(),
            );
            Ok(())
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl CredentialProvider for BrokenProvider {
        async fn authorize(&self, _url: &Url, _headers: &mut HeaderMap) -> Result<(), BoxError> {
            Err("token endpoint unreachable".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let transport = script(vec![fail(TransportErrorKind::ConnectionReset), ok()]);
        let response = sender(transport.clone())
            .send(get(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(transport.sends(), 2);

        let times = transport.times();
        assert_eq!(times[1] - times[0], Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded_and_recorded() {
        let transport = script(vec![
            fail(TransportErrorKind::StreamSevered),
            fail(TransportErrorKind::StreamSevered),
            fail(TransportErrorKind::StreamSevered),
            ok(),
        ]);
        let err = sender(transport.clone())
            .send(get(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(transport.sends(), 3);
        assert_eq!(err.kind(), ErrorKind::ConnectionTransient);
        assert_eq!(err.context_value("attempts"), Some("3"));
        assert!(err
            .context_value("retried_errors")
            .unwrap()
            .contains("stream severed"));
        assert_eq!(err.context_value("method"), Some("GET"));
        assert!(err.context_value("url").unwrap().contains("/users/***/"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_correlation_id_is_stable_across_retries() {
        let transport = script(vec![fail(TransportErrorKind::Timeout), ok()]);
        sender(transport.clone())
            .send(get(), &CancellationToken::new())
            .await
            .unwrap();

        let seen = transport.requests();
        let first = seen[0].get(CLIENT_REQUEST_ID_HEADER).unwrap();
        assert_eq!(first.len(), 36);
        assert_eq!(seen[1].get(CLIENT_REQUEST_ID_HEADER).unwrap(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_expired_is_retried_once_with_fresh_credentials() {
        let transport = script(vec![
            status_with_body(401, r#"{"error":{"code":"InvalidAuthenticationToken"}}"#),
            status(401),
            ok(),
        ]);
        let provider = Arc::new(CountingToken(AtomicU32::new(0)));
        let err = sender(transport.clone())
            .with_credentials(provider.clone())
            .send(get(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthExpired);
        assert_eq!(transport.sends(), 2);
        assert_eq!(provider.0.load(Ordering::SeqCst), 2);

        let seen = transport.requests();
        assert_eq!(seen[0].get("authorization").unwrap(), "Bearer token-0");
        assert_eq!(seen[1].get("authorization").unwrap(), "Bearer token-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_failure_is_auth_expired() {
        let transport = script(vec![]);
        let err = sender(transport.clone())
            .with_credentials(Arc::new(BrokenProvider))
            .send(get(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuthExpired);
        assert_eq!(transport.sends(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_becomes_unclassified_error() {
        let transport = script(vec![Step::Panic]);
        let err = sender(transport)
            .send(get(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unclassified);
        assert_eq!(err.context_value("panic"), Some("true"));
        assert!(err.to_string().contains("scripted panic"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_is_returned_without_retry() {
        let transport = script(vec![
            status_with_body(429, r#"{"error":{"code":"applicationThrottled"}}"#)
                .header("request-id", "req-1"),
        ]);
        let err = sender(transport.clone())
            .send(get(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Throttled);
        assert!(err.has_label(Label::Status(429)));
        assert_eq!(err.context_value("request_id"), Some("req-1"));
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_not_found_get_is_retried() {
        let transport = script(vec![status(404), ok()]);
        sender(transport.clone())
            .send(get(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(transport.sends(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_with_body_is_final() {
        let transport = script(vec![
            status_with_body(404, r#"{"error":{"code":"itemNotFound"}}"#),
            ok(),
        ]);
        let err = sender(transport.clone())
            .send(get(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_get_is_retried_but_post_is_not() {
        let body = r#"{"error":{"code":"invalidRequest","message":"Invalid request"}}"#;

        let transport = script(vec![status_with_body(400, body), ok()]);
        sender(transport.clone())
            .send(get(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(transport.sends(), 2);

        let transport = script(vec![status_with_body(400, body), ok()]);
        let post = Request::new(Method::POST, crate::testing::url()).with_body(b"{}".to_vec());
        assert!(sender(transport.clone())
            .send(post, &CancellationToken::new())
            .await
            .is_err());
        assert_eq!(transport.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malware_header_is_labelled() {
        let transport = script(vec![status(403).header("x-virus-infected", "true")]);
        let err = sender(transport)
            .send(get(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.has_label(Label::Malware));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_json_decodes_and_classifies() {
        #[derive(Debug, serde::Deserialize)]
        struct Drive {
            id: String,
        }

        let transport = script(vec![
            crate::testing::status_with_body(200, r#"{"id":"drive-1"}"#),
            crate::testing::status_with_body(200, "not json"),
        ]);
        let sender = sender(transport);
        let cancel = CancellationToken::new();

        let drive: Drive = sender.send_json(get(), &cancel).await.unwrap();
        assert_eq!(drive.id, "drive-1");

        let err = sender.send_json::<Drive>(get(), &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let transport = script(vec![fail(TransportErrorKind::ConnectionReset), ok()]);
        let sender = SupervisedSender::new(
            transport.clone(),
            RetryPolicy::new(3).with_min_delay(Duration::from_secs(5)),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = sender.send(get(), &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unclassified);
        assert_eq!(transport.sends(), 1);
    }
}
