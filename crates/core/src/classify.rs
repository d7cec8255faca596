//! Error classification
//!
//! [`ErrorClassifier`] turns an arbitrary error into a [`ClassifiedError`]. It
//! looks for structured carriers in the error chain by downcasting
//! ([`ResponseError`], [`TransportError`], [`std::io::Error`],
//! [`serde_json::Error`], or an already classified error) and applies the
//! code table below to whatever envelope it finds.
//!
//! Codes are compared case-insensitively against both the envelope code and
//! its inner code. Matching on the message text is the lowest-confidence
//! rule and only applies where the provider reports a condition without a
//! distinguishing code (unsupported delta queries, lapsed tenants).

use crate::envelope::ErrorEnvelope;
use crate::error::{
    chain, contains_ignore_case, BoxError, ClassifiedError, ErrorKind, Label, ResponseError,
    TransportError,
};
use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::io;

/// Provider error codes
pub mod codes {
    pub const APPLICATION_THROTTLED: &str = "applicationThrottled";
    pub const AUTHENTICATION_ERROR: &str = "authenticationError";
    pub const INVALID_AUTHENTICATION_TOKEN: &str = "InvalidAuthenticationToken";
    pub const ITEM_NOT_FOUND: &str = "itemNotFound";
    pub const ERROR_ITEM_NOT_FOUND: &str = "ErrorItemNotFound";
    pub const RESOURCE_NOT_FOUND: &str = "resourceNotFound";
    pub const REQUEST_RESOURCE_NOT_FOUND: &str = "Request_ResourceNotFound";
    pub const SYNC_FOLDER_NOT_FOUND: &str = "ErrorSyncFolderNotFound";
    pub const NOT_FOUND: &str = "NotFound";
    pub const INVALID_USER: &str = "ErrorInvalidUser";
    pub const RESOURCE_LOCKED: &str = "resourceLocked";
    pub const NOT_ALLOWED: &str = "notAllowed";
    pub const SYNC_STATE_NOT_FOUND: &str = "syncStateNotFound";
    pub const SYNC_STATE_INVALID: &str = "syncStateInvalid";
    pub const RESYNC_REQUIRED: &str = "resyncRequired";
    pub const QUOTA_EXCEEDED: &str = "quotaExceeded";
    pub const ERROR_QUOTA_EXCEEDED: &str = "ErrorQuotaExceeded";
    pub const MALWARE_DETECTED: &str = "malwareDetected";
    pub const INVALID_REQUEST: &str = "invalidRequest";
}

/// Body marker the provider emits when it lost the request payload mid-read
pub const TRANSIENT_IO_MARKER: &str = "IO error during request payload read";

/// Header the provider sets on infected content
pub const VIRUS_INFECTED_HEADER: &str = "x-virus-infected";

const CONNECTION_ENDED_PHRASES: [&str; 3] = [
    "connection reset by peer",
    "client connection force closed",
    "read: connection timed out",
];

const DELTA_NOT_SUPPORTED_PHRASE: &str = "Parameter 'DeltaToken' not supported for this request";

const LOCKED_TENANT_PHRASES: [&str; 3] = [
    "the service principal for resource",
    "this indicate that a subscription within the tenant has lapsed",
    "preventing tokens from being issued for it",
];

const THROTTLED_CODES: &[&str] = &[codes::APPLICATION_THROTTLED];
const AUTH_CODES: &[&str] = &[codes::AUTHENTICATION_ERROR, codes::INVALID_AUTHENTICATION_TOKEN];
const NOT_FOUND_CODES: &[&str] = &[
    codes::ITEM_NOT_FOUND,
    codes::ERROR_ITEM_NOT_FOUND,
    codes::RESOURCE_NOT_FOUND,
    codes::REQUEST_RESOURCE_NOT_FOUND,
    codes::SYNC_FOLDER_NOT_FOUND,
    codes::NOT_FOUND,
    codes::INVALID_USER,
];
const LOCKED_CODES: &[&str] = &[codes::RESOURCE_LOCKED, codes::NOT_ALLOWED];
const CONTINUATION_CODES: &[&str] = &[
    codes::SYNC_STATE_NOT_FOUND,
    codes::RESYNC_REQUIRED,
    codes::SYNC_STATE_INVALID,
];
const QUOTA_CODES: &[&str] = &[codes::QUOTA_EXCEEDED, codes::ERROR_QUOTA_EXCEEDED];

/// Stateless classifier, safe to share between workers
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Creates a classifier
    pub fn new() -> Self {
        Self
    }

    /// Classifies an error
    ///
    /// An already classified error keeps every label it had; new labels are
    /// only ever added. Errors with no recognisable carrier come back with
    /// the `unclassified` label and otherwise untouched.
    pub fn classify(&self, err: impl Into<BoxError>) -> ClassifiedError {
        let boxed: BoxError = err.into();
        let mut classified = match boxed.downcast::<ClassifiedError>() {
            Ok(existing) => *existing,
            Err(other) => ClassifiedError::new(other),
        };

        let labels = self.labels_for(classified.cause());
        classified.add_labels(labels);

        if classified.envelope().is_none() {
            if let Some(envelope) = find_envelope(classified.cause()).cloned() {
                classified.set_envelope(envelope);
            }
        }

        if let Some(response) = find::<ResponseError>(classified.cause()) {
            let status = response.status();
            let request_id = response.request_id().map(str::to_owned);
            classified.insert_context("status", status);
            if let Some(request_id) = request_id {
                classified.insert_context("request_id", request_id);
            }
        }

        let has_kind = classified
            .labels()
            .iter()
            .any(|l| matches!(l, Label::Kind(_)));
        if !has_kind {
            classified.add_labels([ErrorKind::Unclassified]);
        }

        classified
    }

    /// Computes the labels for an error chain without wrapping it
    pub fn labels_for(&self, err: &(dyn StdError + 'static)) -> BTreeSet<Label> {
        let mut labels = BTreeSet::new();

        for link in chain(err) {
            if let Some(classified) = link.downcast_ref::<ClassifiedError>() {
                labels.extend(classified.labels().iter().copied());
            }
            if let Some(response) = link.downcast_ref::<ResponseError>() {
                labels.insert(Label::Status(response.status()));
                if response.is_malware() {
                    labels.insert(Label::Malware);
                }
                if let Some(envelope) = response.envelope() {
                    labels.extend(envelope_labels(envelope));
                }
                if let Some(kind) = status_fallback(response.status()) {
                    labels.insert(kind.into());
                }
                if response.body_contains(TRANSIENT_IO_MARKER) {
                    labels.insert(ErrorKind::ConnectionTransient.into());
                }
            }
            if link.downcast_ref::<serde_json::Error>().is_some() {
                labels.insert(ErrorKind::MalformedResponse.into());
            }
        }

        if is_connection_transient(err) {
            labels.insert(ErrorKind::ConnectionTransient.into());
        }

        labels
    }
}

/// Labels implied by an envelope's code, inner code and message
pub fn envelope_labels(envelope: &ErrorEnvelope) -> BTreeSet<Label> {
    let mut labels = BTreeSet::new();

    if envelope.has_code(THROTTLED_CODES) {
        labels.insert(ErrorKind::Throttled.into());
    }
    if envelope.has_code(AUTH_CODES) {
        labels.insert(ErrorKind::AuthExpired.into());
    }
    if envelope.has_code(NOT_FOUND_CODES) {
        labels.insert(ErrorKind::NotFound.into());
    }
    if envelope.has_code(LOCKED_CODES) || envelope.message_contains_all(&LOCKED_TENANT_PHRASES) {
        labels.insert(ErrorKind::ResourceLocked.into());
    }
    if envelope.has_code(CONTINUATION_CODES) {
        labels.insert(ErrorKind::InvalidContinuationToken.into());
    }
    if envelope.message_contains(DELTA_NOT_SUPPORTED_PHRASE) {
        labels.insert(ErrorKind::ContinuationNotSupported.into());
    }
    if envelope.has_code(QUOTA_CODES) {
        labels.insert(ErrorKind::QuotaExceeded.into());
    }
    if envelope.has_code(&[codes::MALWARE_DETECTED]) {
        labels.insert(Label::Malware);
    }

    labels
}

fn status_fallback(status: u16) -> Option<ErrorKind> {
    match status {
        401 => Some(ErrorKind::AuthExpired),
        404 => Some(ErrorKind::NotFound),
        429 => Some(ErrorKind::Throttled),
        _ => None,
    }
}

/// Finds the first error of type `T` in the chain
pub fn find<'a, T: StdError + 'static>(err: &'a (dyn StdError + 'static)) -> Option<&'a T> {
    chain(err).find_map(|e| e.downcast_ref::<T>())
}

/// Finds the first provider envelope carried anywhere in the chain
pub fn find_envelope<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a ErrorEnvelope> {
    chain(err).find_map(|e| {
        e.downcast_ref::<ClassifiedError>()
            .and_then(ClassifiedError::envelope)
            .or_else(|| e.downcast_ref::<ResponseError>().and_then(ResponseError::envelope))
    })
}

/// Returns true if the error belongs to the reset / timeout / severed-stream class
pub fn is_connection_transient(err: &(dyn StdError + 'static)) -> bool {
    chain(err).any(|link| {
        if let Some(classified) = link.downcast_ref::<ClassifiedError>() {
            if classified.has_label(ErrorKind::ConnectionTransient) {
                return true;
            }
        }
        if let Some(transport) = link.downcast_ref::<TransportError>() {
            if transport.is_transient() {
                return true;
            }
        }
        if let Some(io_err) = link.downcast_ref::<io::Error>() {
            if is_transient_io_kind(io_err.kind()) {
                return true;
            }
        }
        if let Some(response) = link.downcast_ref::<ResponseError>() {
            if response.body_contains(TRANSIENT_IO_MARKER) {
                return true;
            }
        }

        let message = link.to_string();
        CONNECTION_ENDED_PHRASES
            .iter()
            .any(|phrase| contains_ignore_case(&message, phrase))
            || contains_ignore_case(&message, TRANSIENT_IO_MARKER)
    })
}

/// I/O error kinds that indicate a connection that may work on a retry
pub fn is_transient_io_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
    )
}

/// Returns true if the chain carries the given kind, classifying on the fly
pub fn has_kind(err: &(dyn StdError + 'static), kind: ErrorKind) -> bool {
    ErrorClassifier::new()
        .labels_for(err)
        .contains(&Label::Kind(kind))
}

/// Returns true if the chain carries the malware label
pub fn is_malware(err: &(dyn StdError + 'static)) -> bool {
    ErrorClassifier::new().labels_for(err).contains(&Label::Malware)
}

/// Returns true if the error is a provider 400 with the `invalidRequest` code
pub fn is_invalid_request(err: &(dyn StdError + 'static)) -> bool {
    find::<ResponseError>(err).is_some_and(|response| {
        response.status() == 400
            && response
                .envelope()
                .is_some_and(|e| e.has_code(&[codes::INVALID_REQUEST]))
    })
}

/// Returns true if the error is a 404 that came back without a body
pub fn is_empty_not_found(err: &(dyn StdError + 'static)) -> bool {
    find::<ResponseError>(err).is_some_and(|r| r.status() == 404 && r.is_empty_body())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;

    fn envelope_body(code: &str, inner: Option<&str>, message: &str) -> Vec<u8> {
        let inner = inner
            .map(|c| format!(r#","innerError":{{"code":"{}","request-id":"r-1"}}"#, c))
            .unwrap_or_default();
        format!(
            r#"{{"error":{{"code":"{}","message":"{}"{}}}}}"#,
            code, message, inner
        )
        .into_bytes()
    }

    fn classify_response(status: u16, body: &[u8]) -> ClassifiedError {
        ErrorClassifier::new().classify(ResponseError::new(status, body))
    }

    #[test]
    fn test_throttled_code() {
        let err = classify_response(400, &envelope_body("ApplicationThrottled", None, "slow down"));
        assert!(err.has_label(ErrorKind::Throttled));
        assert!(err.has_label(Label::Status(400)));
        assert_eq!(err.kind(), ErrorKind::Throttled);
    }

    #[test]
    fn test_throttled_status_fallback() {
        let err = classify_response(429, b"");
        assert_eq!(err.kind(), ErrorKind::Throttled);
    }

    #[test]
    fn test_auth_expired_by_inner_code() {
        let body = envelope_body("unauthenticated", Some("InvalidAuthenticationToken"), "");
        let err = classify_response(403, &body);
        assert_eq!(err.kind(), ErrorKind::AuthExpired);
    }

    #[test]
    fn test_not_found_codes() {
        for code in ["itemNotFound", "ErrorItemNotFound", "Request_ResourceNotFound", "ErrorInvalidUser"] {
            let err = classify_response(400, &envelope_body(code, None, ""));
            assert_eq!(err.kind(), ErrorKind::NotFound, "code {}", code);
        }
    }

    #[test]
    fn test_resource_locked_by_code_and_by_message() {
        let err = classify_response(423, &envelope_body("accessDenied", Some("resourceLocked"), ""));
        assert_eq!(err.kind(), ErrorKind::ResourceLocked);

        let message = "The service principal for resource x is disabled. \
                       This indicate that a subscription within the tenant has lapsed, \
                       preventing tokens from being issued for it.";
        let err = classify_response(400, &envelope_body("whatever", None, message));
        assert_eq!(err.kind(), ErrorKind::ResourceLocked);

        let err = classify_response(400, &envelope_body("whatever", None, "the service principal for resource"));
        assert!(!err.has_label(ErrorKind::ResourceLocked));
    }

    #[test]
    fn test_continuation_codes() {
        for code in ["syncStateNotFound", "resyncRequired", "SYNCSTATEINVALID"] {
            let err = classify_response(410, &envelope_body(code, None, ""));
            assert_eq!(err.kind(), ErrorKind::InvalidContinuationToken, "code {}", code);
            assert!(!err.kind().is_retryable());
        }
    }

    #[test]
    fn test_continuation_not_supported_message() {
        let body = envelope_body(
            "badRequest",
            None,
            "Parameter 'DeltaToken' not supported for this request",
        );
        let err = classify_response(400, &body);
        assert_eq!(err.kind(), ErrorKind::ContinuationNotSupported);
    }

    #[test]
    fn test_quota_exceeded() {
        let err = classify_response(507, &envelope_body("quotaExceeded", None, ""));
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert!(!err.kind().is_retryable());
    }

    #[test]
    fn test_malware_by_code_and_header() {
        let err = classify_response(403, &envelope_body("malwareDetected", None, ""));
        assert!(err.has_label(Label::Malware));

        let err = ErrorClassifier::new()
            .classify(ResponseError::new(403, b"").with_malware_flag(true));
        assert!(err.has_label(Label::Malware));
    }

    #[test]
    fn test_envelope_fields_become_context() {
        let body = envelope_body("itemNotFound", Some("inner"), "The item was not found");
        let err = classify_response(404, &body);

        assert_eq!(err.to_string(), "request failed with status 404");
        assert_eq!(err.context_value("error_code"), Some("itemNotFound"));
        assert_eq!(err.context_value("error_inner_code"), Some("inner"));
        assert_eq!(err.context_value("request_id"), Some("r-1"));
        assert_eq!(err.context_value("status"), Some("404"));
    }

    #[test]
    fn test_transport_and_io_errors_are_transient() {
        let err = ErrorClassifier::new()
            .classify(TransportError::new(TransportErrorKind::Timeout, "deadline"));
        assert_eq!(err.kind(), ErrorKind::ConnectionTransient);

        let err = ErrorClassifier::new().classify(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert_eq!(err.kind(), ErrorKind::ConnectionTransient);

        let err = ErrorClassifier::new().classify("read tcp: connection reset by peer");
        assert_eq!(err.kind(), ErrorKind::ConnectionTransient);
    }

    #[test]
    fn test_transient_marker_body() {
        let err = classify_response(500, b"IO error during request payload read");
        assert!(err.has_label(ErrorKind::ConnectionTransient));
    }

    #[test]
    fn test_malformed_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = ErrorClassifier::new().classify(parse_err);
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_unknown_error_is_unclassified() {
        let err = ErrorClassifier::new().classify("something odd");
        assert_eq!(err.kind(), ErrorKind::Unclassified);
        assert_eq!(err.to_string(), "something odd");
    }

    #[test]
    fn test_reclassification_keeps_labels() {
        let classifier = ErrorClassifier::new();
        let first = classifier
            .classify(ResponseError::new(404, b""))
            .with_label(ErrorKind::NoProgress);
        let before: Vec<Label> = first.labels().iter().copied().collect();

        let second = classifier.classify(first);
        for label in before {
            assert!(second.has_label(label), "lost {}", label);
        }
    }

    #[test]
    fn test_labels_found_through_io_wrapper() {
        let classified = classify_response(429, b"");
        let wrapped = io::Error::other(classified);
        assert!(has_kind(&wrapped, ErrorKind::Throttled));
    }

    #[test]
    fn test_supervision_predicates() {
        let body = envelope_body("invalidRequest", None, "");
        assert!(is_invalid_request(&ResponseError::new(400, &body)));
        assert!(!is_invalid_request(&ResponseError::new(500, &body)));

        assert!(is_empty_not_found(&ResponseError::new(404, b"")));
        assert!(!is_empty_not_found(&ResponseError::new(404, b"{}")));
    }
}
