//! Retry configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};

/// Request and connection retry limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Request-level retries after the first attempt (0-5)
    pub max_retries: u32,

    /// Backoff seed in milliseconds (100-5000)
    pub min_delay_ms: u64,

    /// Whole-call retries on severed connections and stale credentials (0-5)
    pub max_connection_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay_ms: 3000,
            max_connection_retries: 5,
        }
    }
}

impl ConfigSection for RetryConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        Validator::collect_errors(vec![
            Validator::in_range(self.max_retries, 0, 5, "retry.max_retries"),
            Validator::in_range(self.min_delay_ms, 100, 5000, "retry.min_delay_ms"),
            Validator::in_range(
                self.max_connection_retries,
                0,
                5,
                "retry.max_connection_retries",
            ),
        ])
    }

    fn merge(&mut self, other: Self) {
        self.max_retries = other.max_retries;
        self.min_delay_ms = other.min_delay_ms;
        self.max_connection_retries = other.max_connection_retries;
    }

    fn section_name(&self) -> &'static str {
        "retry"
    }
}
