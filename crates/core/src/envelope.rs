//! Provider error envelope
//!
//! The provider reports failures as
//! `{"error": {"code", "message", "target", "innerError": {...}, "details": [...]}}`.
//! Parsing is lenient: anything that does not carry at least an error code is
//! treated as "no envelope".

use crate::error::contains_ignore_case;
use serde::Deserialize;

/// One entry of the envelope's `details` array
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub target: Option<String>,
}

/// Parsed provider error envelope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub target: Option<String>,
    pub inner_code: Option<String>,
    pub request_id: Option<String>,
    pub client_request_id: Option<String>,
    pub date: Option<String>,
    pub details: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct WireBody {
    error: WireError,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default, rename = "innerError", alias = "innererror")]
    inner: Option<WireInner>,
    #[serde(default)]
    details: Vec<WireDetail>,
}

#[derive(Deserialize)]
struct WireInner {
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "request-id")]
    request_id: Option<String>,
    #[serde(default, rename = "client-request-id")]
    client_request_id: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Deserialize)]
struct WireDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    target: Option<String>,
}

impl ErrorEnvelope {
    /// Parses a response body; returns `None` unless an error code is present
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.is_empty() {
            return None;
        }

        let wire: WireBody = serde_json::from_slice(body).ok()?;
        let code = wire.error.code.filter(|c| !c.is_empty())?;
        let inner = wire.error.inner;

        Some(Self {
            code,
            message: wire.error.message.unwrap_or_default(),
            target: wire.error.target,
            inner_code: inner.as_ref().and_then(|i| i.code.clone()),
            request_id: inner.as_ref().and_then(|i| i.request_id.clone()),
            client_request_id: inner.as_ref().and_then(|i| i.client_request_id.clone()),
            date: inner.and_then(|i| i.date),
            details: wire
                .error
                .details
                .into_iter()
                .map(|d| ErrorDetail {
                    code: d.code.unwrap_or_default(),
                    message: d.message.unwrap_or_default(),
                    target: d.target,
                })
                .collect(),
        })
    }

    /// Returns true if the code or inner code matches any of `codes`, ignoring case
    pub fn has_code(&self, codes: &[&str]) -> bool {
        codes.iter().any(|wanted| {
            self.code.eq_ignore_ascii_case(wanted)
                || self
                    .inner_code
                    .as_deref()
                    .is_some_and(|inner| inner.eq_ignore_ascii_case(wanted))
        })
    }

    /// Case-insensitive substring match against the message
    ///
    /// Only for failures the provider reports without a distinguishing code.
    pub fn message_contains(&self, phrase: &str) -> bool {
        contains_ignore_case(&self.message, phrase)
    }

    /// Returns true only if the message contains every phrase
    pub fn message_contains_all(&self, phrases: &[&str]) -> bool {
        !phrases.is_empty() && phrases.iter().all(|p| self.message_contains(p))
    }
}
