//! HTTP transport configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};

/// Transport timeouts and logging
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Absolute timeout for a single call, in seconds
    pub timeout_secs: u64,

    /// Extended timeout for large payload downloads, in seconds
    pub no_timeout_secs: u64,

    /// User agent sent with every request
    pub user_agent: String,

    /// Log request and response bodies
    pub log_bodies: bool,

    /// Bodies longer than this are truncated in logs (bytes)
    pub body_log_limit: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3600,
            no_timeout_secs: 48 * 3600,
            user_agent: format!("steadyline/{}", env!("CARGO_PKG_VERSION")),
            log_bodies: false,
            body_log_limit: 4096,
        }
    }
}

impl ConfigSection for HttpConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        Validator::collect_errors(vec![
            Validator::in_range(self.timeout_secs, 1, 48 * 3600, "http.timeout_secs"),
            Validator::in_range(
                self.no_timeout_secs,
                self.timeout_secs.max(1),
                7 * 24 * 3600,
                "http.no_timeout_secs",
            ),
            Validator::not_empty(&self.user_agent, "http.user_agent"),
            Validator::in_range(self.body_log_limit, 0, 1024 * 1024, "http.body_log_limit"),
        ])
    }

    fn merge(&mut self, other: Self) {
        self.timeout_secs = other.timeout_secs;
        self.no_timeout_secs = other.no_timeout_secs;
        self.user_agent = other.user_agent;
        self.log_bodies = other.log_bodies;
        self.body_log_limit = other.body_log_limit;
    }

    fn section_name(&self) -> &'static str {
        "http"
    }
}
