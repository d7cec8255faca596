//! Rate limit configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};

/// Which admission strategy to build
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Continuous refill at a fixed rate
    #[default]
    TokenBucket,
    /// Capacity per window, released per sub-interval
    SlidingWindow,
}

/// Admission control budget
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Strategy to use
    pub strategy: RateLimitStrategy,

    /// Token bucket refill rate
    pub rate_per_second: f64,

    /// Token bucket size
    pub burst: u32,

    /// Sliding window length in milliseconds
    pub window_ms: u64,

    /// Sliding window sub-interval in milliseconds
    pub sub_interval_ms: u64,

    /// Admissions per sliding window
    pub capacity: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            strategy: RateLimitStrategy::TokenBucket,
            rate_per_second: 16.0,
            burst: 200,
            window_ms: 60_000,
            sub_interval_ms: 1_000,
            capacity: 1_200,
        }
    }
}

impl ConfigSection for RateLimitConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        match self.strategy {
            RateLimitStrategy::TokenBucket => Validator::collect_errors(vec![
                Validator::positive(self.rate_per_second, "rate_limit.rate_per_second"),
                Validator::positive(self.burst, "rate_limit.burst"),
            ]),
            RateLimitStrategy::SlidingWindow => Validator::collect_errors(vec![
                Validator::positive(self.capacity, "rate_limit.capacity"),
                Validator::positive(self.sub_interval_ms, "rate_limit.sub_interval_ms"),
                Validator::multiple_of(
                    self.window_ms,
                    self.sub_interval_ms,
                    "rate_limit.window_ms",
                ),
            ]),
        }
    }

    fn merge(&mut self, other: Self) {
        self.strategy = other.strategy;
        self.rate_per_second = other.rate_per_second;
        self.burst = other.burst;
        self.window_ms = other.window_ms;
        self.sub_interval_ms = other.sub_interval_ms;
        self.capacity = other.capacity;
    }

    fn section_name(&self) -> &'static str {
        "rate_limit"
    }
}
