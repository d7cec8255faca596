//! Steadyline configuration
//!
//! TOML-backed settings for the resilient transport: timeouts, retry bounds,
//! the admission budget and the throttle fence. Each `[section]` implements
//! [`ConfigSection`]; a file may leave out any section or field.
//!
//! Precedence is defaults, then the file, then environment variables
//! ([`ENV_LOG_HTTP_BODIES`], [`ENV_MAX_RETRIES`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use steadyline_config::ConfigPersistence;
//!
//! # fn main() -> steadyline_config::ConfigResult<()> {
//! let config = ConfigPersistence::new("steadyline.toml").load_effective()?;
//! println!("retrying up to {} times", config.retry.max_retries);
//! # Ok(())
//! # }
//! ```

mod error;
mod persistence;
mod validation;

// Config sections
mod http_config;
mod rate_limit_config;
mod retry_config;
mod throttle_config;

pub use error::{ConfigError, ConfigResult};
pub use persistence::ConfigPersistence;
pub use validation::{ConfigSection, ValidationError, Validator};

// Re-export config sections
pub use http_config::HttpConfig;
pub use rate_limit_config::{RateLimitConfig, RateLimitStrategy};
pub use retry_config::RetryConfig;
pub use throttle_config::ThrottleConfig;

use serde::{Deserialize, Serialize};

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Enables body logging when set to any non-empty value
pub const ENV_LOG_HTTP_BODIES: &str = "STEADYLINE_LOG_HTTP_BODIES";

/// Overrides `retry.max_retries`
pub const ENV_MAX_RETRIES: &str = "STEADYLINE_MAX_RETRIES";

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Config file format version
    pub version: u32,

    /// Transport timeouts and logging
    pub http: HttpConfig,

    /// Retry limits
    pub retry: RetryConfig,

    /// Admission budget
    pub rate_limit: RateLimitConfig,

    /// Throttle fence
    pub throttle: ThrottleConfig,
}

impl Config {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the entire configuration
    ///
    /// Returns all validation errors found across all sections.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(mut e) = self.http.validate() {
            errors.append(&mut e);
        }

        if let Err(mut e) = self.retry.validate() {
            errors.append(&mut e);
        }

        if let Err(mut e) = self.rate_limit.validate() {
            errors.append(&mut e);
        }

        if let Err(mut e) = self.throttle.validate() {
            errors.append(&mut e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Merges this config with another, preferring values from `other`
    ///
    /// This is used for override chains: defaults < file < env vars
    pub fn merge(&mut self, other: Config) {
        self.http.merge(other.http);
        self.retry.merge(other.retry);
        self.rate_limit.merge(other.rate_limit);
        self.throttle.merge(other.throttle);
    }

    /// Applies overrides from the process environment
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_LOG_HTTP_BODIES) {
            if !value.trim().is_empty() {
                log::debug!(var = ENV_LOG_HTTP_BODIES; "HTTP body logging enabled from environment");
                self.http.log_bodies = true;
            }
        }

        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            let parsed = value
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::Env {
                    var: ENV_MAX_RETRIES,
                    value: value.clone(),
                })?;
            log::debug!(var = ENV_MAX_RETRIES, value = parsed; "retry override from environment");
            self.retry.max_retries = parsed;
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            http: HttpConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}
