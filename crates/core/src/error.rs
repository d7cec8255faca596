//! Error taxonomy and recovery strategies for the transport
//!
//! Failures are described by a small, stable set of kinds instead of by the
//! concrete type that produced them:
//! - **Retried locally**: connection-transient failures, throttling, expired credentials
//! - **Returned to the caller**: not-found, locked, quota, continuation problems
//! - **Hard failures**: malformed responses, stalled downloads, anything unclassified
//!
//! A [`ClassifiedError`] carries any number of [`Label`]s. Labels are additive:
//! once attached they are never removed, so re-classifying an error can only
//! make it more specific.

use crate::envelope::ErrorEnvelope;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Boxed error used at every type-erased boundary
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Recovery actions that can be taken when an error occurs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Retry with backoff (e.g., a severed connection)
    RetryWithBackoff,
    /// Back off for longer than the server asked before trying again
    Cooldown,
    /// Obtain a fresh credential and retry once
    Reauthenticate,
    /// Drop the continuation token and enumerate everything again
    FullResync,
    /// Stop using incremental enumeration for this resource
    DisableIncremental,
    /// Nothing to do automatically; the caller decides
    CallerDecides,
    /// Give up on the operation
    Abort,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryWithBackoff => write!(f, "Retrying with backoff"),
            Self::Cooldown => write!(f, "Cooling down before retrying"),
            Self::Reauthenticate => write!(f, "Reauthenticating"),
            Self::FullResync => write!(f, "Running a full resync"),
            Self::DisableIncremental => write!(f, "Disabling incremental enumeration"),
            Self::CallerDecides => write!(f, "Returned to caller"),
            Self::Abort => write!(f, "Aborting"),
        }
    }
}

/// Categorical failure kinds the rest of the system branches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// The provider is throttling this client
    Throttled,
    /// The bearer credential is expired or invalid
    AuthExpired,
    /// The addressed resource does not exist
    NotFound,
    /// The resource exists but cannot be accessed right now
    ResourceLocked,
    /// The continuation token can no longer be used
    InvalidContinuationToken,
    /// The endpoint does not support continuation tokens at all
    ContinuationNotSupported,
    /// The tenant or resource ran out of quota
    QuotaExceeded,
    /// Connection reset, timeout or a severed stream
    ConnectionTransient,
    /// The response could not be decoded
    MalformedResponse,
    /// Retries were exhausted without a single byte of progress
    NoProgress,
    /// None of the above
    Unclassified,
}

impl ErrorKind {
    /// Order in which [`ClassifiedError::kind`] picks among attached labels
    pub const PRECEDENCE: [ErrorKind; 11] = [
        ErrorKind::NoProgress,
        ErrorKind::AuthExpired,
        ErrorKind::Throttled,
        ErrorKind::QuotaExceeded,
        ErrorKind::InvalidContinuationToken,
        ErrorKind::ContinuationNotSupported,
        ErrorKind::ResourceLocked,
        ErrorKind::NotFound,
        ErrorKind::MalformedResponse,
        ErrorKind::ConnectionTransient,
        ErrorKind::Unclassified,
    ];

    /// Stable identifier used in labels and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Throttled => "throttled",
            Self::AuthExpired => "auth-expired",
            Self::NotFound => "not-found",
            Self::ResourceLocked => "resource-locked",
            Self::InvalidContinuationToken => "invalid-continuation-token",
            Self::ContinuationNotSupported => "continuation-not-supported",
            Self::QuotaExceeded => "quota-exceeded",
            Self::ConnectionTransient => "connection-transient",
            Self::MalformedResponse => "malformed-response",
            Self::NoProgress => "no-progress",
            Self::Unclassified => "unclassified",
        }
    }

    /// Returns the recommended recovery action for this kind
    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            Self::ConnectionTransient => RecoveryAction::RetryWithBackoff,
            Self::Throttled => RecoveryAction::Cooldown,
            Self::AuthExpired => RecoveryAction::Reauthenticate,
            Self::InvalidContinuationToken => RecoveryAction::FullResync,
            Self::ContinuationNotSupported => RecoveryAction::DisableIncremental,
            Self::NotFound | Self::ResourceLocked | Self::QuotaExceeded | Self::Unclassified => {
                RecoveryAction::CallerDecides
            }
            Self::MalformedResponse | Self::NoProgress => RecoveryAction::Abort,
        }
    }

    /// Returns true if this layer is allowed to retry the failure on its own
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.recovery_action(),
            RecoveryAction::RetryWithBackoff | RecoveryAction::Cooldown | RecoveryAction::Reauthenticate
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tag attached to a [`ClassifiedError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    /// One of the categorical kinds
    Kind(ErrorKind),
    /// The provider flagged the content as infected
    Malware,
    /// HTTP status of the response that produced the error
    Status(u16),
}

impl From<ErrorKind> for Label {
    fn from(kind: ErrorKind) -> Self {
        Label::Kind(kind)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Kind(kind) => f.write_str(kind.as_str()),
            Label::Malware => f.write_str("malware"),
            Label::Status(code) => write!(f, "status:{}", code),
        }
    }
}

/// An error enriched with labels and structured context
///
/// The display message is the message of the original cause. Provider
/// envelope fields, request ids and URLs live in [`ClassifiedError::context`]
/// so the message stays stable no matter what the payload contained.
#[derive(Debug)]
pub struct ClassifiedError {
    cause: BoxError,
    labels: BTreeSet<Label>,
    context: BTreeMap<String, String>,
    envelope: Option<ErrorEnvelope>,
}

impl ClassifiedError {
    /// Wraps a cause without attaching any label yet
    pub fn new(cause: impl Into<BoxError>) -> Self {
        Self {
            cause: cause.into(),
            labels: BTreeSet::new(),
            context: BTreeMap::new(),
            envelope: None,
        }
    }

    /// Creates an error of the given kind from a plain message
    pub fn of_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(message.into()).with_label(kind)
    }

    /// Attaches a label
    pub fn with_label(mut self, label: impl Into<Label>) -> Self {
        self.labels.insert(label.into());
        self
    }

    /// Attaches every label in `labels`
    pub fn add_labels<I, L>(&mut self, labels: I)
    where
        I: IntoIterator<Item = L>,
        L: Into<Label>,
    {
        self.labels.extend(labels.into_iter().map(Into::into));
    }

    /// Attaches a context annotation, replacing an older value for the key
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Attaches a context annotation in place
    pub fn insert_context(&mut self, key: impl Into<String>, value: impl ToString) {
        self.context.insert(key.into(), value.to_string());
    }

    /// Records the provider envelope and mirrors its fields into the context
    pub fn set_envelope(&mut self, envelope: ErrorEnvelope) {
        self.context.insert("error_code".into(), envelope.code.clone());
        if !envelope.message.is_empty() {
            self.context
                .insert("error_message".into(), envelope.message.clone());
        }
        if let Some(target) = &envelope.target {
            self.context.insert("error_target".into(), target.clone());
        }
        if let Some(inner) = &envelope.inner_code {
            self.context.insert("error_inner_code".into(), inner.clone());
        }
        if let Some(request_id) = &envelope.request_id {
            self.context
                .entry("request_id".into())
                .or_insert_with(|| request_id.clone());
        }
        self.envelope = Some(envelope);
    }

    /// All attached labels
    pub fn labels(&self) -> &BTreeSet<Label> {
        &self.labels
    }

    /// Returns true if the label is attached
    pub fn has_label(&self, label: impl Into<Label>) -> bool {
        self.labels.contains(&label.into())
    }

    /// The most significant kind among the attached labels
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::PRECEDENCE
            .iter()
            .copied()
            .find(|kind| self.labels.contains(&Label::Kind(*kind)))
            .unwrap_or(ErrorKind::Unclassified)
    }

    /// HTTP status recorded through a [`Label::Status`], if any
    pub fn status(&self) -> Option<u16> {
        self.labels.iter().find_map(|label| match label {
            Label::Status(code) => Some(*code),
            _ => None,
        })
    }

    /// Structured annotations
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Looks up one annotation
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// The parsed provider envelope, if the failure carried one
    pub fn envelope(&self) -> Option<&ErrorEnvelope> {
        self.envelope.as_ref()
    }

    /// The original cause
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.cause.as_ref()
    }

    /// Unwraps the original cause
    pub fn into_cause(self) -> BoxError {
        self.cause
    }

    /// Returns the recommended recovery action for the dominant kind
    pub fn recovery_action(&self) -> RecoveryAction {
        self.kind().recovery_action()
    }

    /// Finds the first classified error in a source chain
    pub fn find<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a ClassifiedError> {
        chain(err).find_map(|e| e.downcast_ref::<ClassifiedError>())
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cause, f)
    }
}

impl StdError for ClassifiedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// Physical failure classes reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The call exceeded its deadline
    Timeout,
    /// The peer reset or aborted the connection
    ConnectionReset,
    /// The body stream ended before the response was complete
    StreamSevered,
    /// No connection could be established
    Connect,
    /// The request itself could not be built or sent
    Request,
    /// The caller cancelled the call
    Cancelled,
}

impl TransportErrorKind {
    /// Returns true for the timeout / reset / severed-stream class
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionReset | Self::StreamSevered
        )
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::ConnectionReset => "connection reset",
            Self::StreamSevered => "stream severed",
            Self::Connect => "connect failed",
            Self::Request => "request failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A failure below the HTTP layer
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    /// Creates a transport error without an underlying cause
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transport error that wraps a lower-level cause
    pub fn with_source(
        kind: TransportErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The failure class
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Returns true for the timeout / reset / severed-stream class
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Bodies larger than this are not kept on a [`ResponseError`]
const MAX_KEPT_BODY: usize = 16 * 1024;

/// A non-success HTTP response turned into an error
#[derive(Debug, Clone, Error)]
#[error("request failed with status {status}")]
pub struct ResponseError {
    status: u16,
    envelope: Option<ErrorEnvelope>,
    request_id: Option<String>,
    body: String,
    body_len: usize,
    malware: bool,
}

impl ResponseError {
    /// Builds the error from the status and the (buffered) response body
    pub fn new(status: u16, body: &[u8]) -> Self {
        let kept = &body[..body.len().min(MAX_KEPT_BODY)];
        Self {
            status,
            envelope: ErrorEnvelope::parse(body),
            request_id: None,
            body: String::from_utf8_lossy(kept).into_owned(),
            body_len: body.len(),
            malware: false,
        }
    }

    /// Records the provider request id header
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Records the provider's infected-content header
    pub fn with_malware_flag(mut self, malware: bool) -> Self {
        self.malware = malware;
        self
    }

    /// HTTP status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Parsed provider envelope
    pub fn envelope(&self) -> Option<&ErrorEnvelope> {
        self.envelope.as_ref()
    }

    /// Provider request id
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Returns true if the provider sent no content at all
    pub fn is_empty_body(&self) -> bool {
        self.body_len == 0
    }

    /// Returns true if the provider flagged the content as infected
    pub fn is_malware(&self) -> bool {
        self.malware
    }

    /// Case-insensitive check against the retained body text
    pub fn body_contains(&self, needle: &str) -> bool {
        contains_ignore_case(&self.body, needle)
    }
}

/// Iterator over an error and its causes
///
/// Unlike a plain `source()` walk this also steps into the payload of a
/// custom [`std::io::Error`], which does not report it as its source.
pub struct Chain<'a> {
    next: Option<&'a (dyn StdError + 'static)>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a (dyn StdError + 'static);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = match current.downcast_ref::<std::io::Error>() {
            Some(io) => io
                .get_ref()
                .map(|inner| inner as &(dyn StdError + 'static)),
            None => current.source(),
        };
        Some(current)
    }
}

/// Walks `err` and everything it wraps
pub fn chain<'a>(err: &'a (dyn StdError + 'static)) -> Chain<'a> {
    Chain { next: Some(err) }
}

pub(crate) fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_recovery_action_display() {
        assert_eq!(
            RecoveryAction::RetryWithBackoff.to_string(),
            "Retrying with backoff"
        );
        assert_eq!(RecoveryAction::FullResync.to_string(), "Running a full resync");
        assert_eq!(RecoveryAction::Abort.to_string(), "Aborting");
    }

    #[test]
    fn test_kind_recovery_actions() {
        assert_eq!(
            ErrorKind::ConnectionTransient.recovery_action(),
            RecoveryAction::RetryWithBackoff
        );
        assert_eq!(
            ErrorKind::InvalidContinuationToken.recovery_action(),
            RecoveryAction::FullResync
        );
        assert!(ErrorKind::Throttled.is_retryable());
        assert!(!ErrorKind::QuotaExceeded.is_retryable());
        assert!(!ErrorKind::NoProgress.is_retryable());
        assert!(!ErrorKind::ContinuationNotSupported.is_retryable());
    }

    #[test]
    fn test_label_display() {
        assert_eq!(Label::from(ErrorKind::AuthExpired).to_string(), "auth-expired");
        assert_eq!(Label::Status(429).to_string(), "status:429");
        assert_eq!(Label::Malware.to_string(), "malware");
    }

    #[test]
    fn test_kind_uses_precedence() {
        let err = ClassifiedError::new("boom")
            .with_label(ErrorKind::ConnectionTransient)
            .with_label(ErrorKind::Throttled)
            .with_label(Label::Status(429));

        assert_eq!(err.kind(), ErrorKind::Throttled);
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn test_unlabelled_is_unclassified() {
        let err = ClassifiedError::new("boom");
        assert_eq!(err.kind(), ErrorKind::Unclassified);
        assert_eq!(err.recovery_action(), RecoveryAction::CallerDecides);
    }

    #[test]
    fn test_message_is_cause_message() {
        let mut err = ClassifiedError::new(ResponseError::new(404, b""));
        err.insert_context("url", "https://example.com/***");

        assert_eq!(err.to_string(), "request failed with status 404");
        assert_eq!(err.context_value("url"), Some("https://example.com/***"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_chain_steps_into_io_error_payload() {
        let classified = ClassifiedError::of_kind(ErrorKind::NoProgress, "stalled");
        let io_err = io::Error::other(classified);

        let found = ClassifiedError::find(&io_err).expect("classified error in chain");
        assert_eq!(found.kind(), ErrorKind::NoProgress);
    }

    #[test]
    fn test_transport_error_display_and_class() {
        let err = TransportError::with_source(
            TransportErrorKind::ConnectionReset,
            "reading body",
            io::Error::from(io::ErrorKind::ConnectionReset),
        );
        assert!(err.is_transient());
        assert!(err.to_string().contains("connection reset"));
        assert!(err.source().is_some());

        let err = TransportError::new(TransportErrorKind::Connect, "dns");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_response_error_empty_body() {
        let err = ResponseError::new(503, b"");
        assert!(err.is_empty_body());
        assert!(err.envelope().is_none());

        let err = ResponseError::new(500, b"IO error during request payload read");
        assert!(!err.is_empty_body());
        assert!(err.body_contains("io error during request payload read"));
    }
}
