//! Throttle fence configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};

/// Shared pause raised after the provider throttles a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Raise the fence on 429 responses
    pub enabled: bool,

    /// Fence length when the response has no Retry-After hint (ms)
    pub default_fence_ms: u64,

    /// Longest fence a single response may raise (ms)
    pub max_fence_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_fence_ms: 10_000,
            max_fence_ms: 180_000,
        }
    }
}

impl ConfigSection for ThrottleConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        Validator::collect_errors(vec![
            Validator::in_range(self.max_fence_ms, 1, 3_600_000, "throttle.max_fence_ms"),
            Validator::in_range(
                self.default_fence_ms,
                0,
                self.max_fence_ms,
                "throttle.default_fence_ms",
            ),
        ])
    }

    fn merge(&mut self, other: Self) {
        self.enabled = other.enabled;
        self.default_fence_ms = other.default_fence_ms;
        self.max_fence_ms = other.max_fence_ms;
    }

    fn section_name(&self) -> &'static str {
        "throttle"
    }
}
