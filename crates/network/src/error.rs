// crates/network/src/error.rs
//! Error types for building and configuring clients
//!
//! Failures of individual calls are [`steadyline_core::ClassifiedError`]s;
//! this type only covers setting things up.

use thiserror::Error;

/// Result type for client setup
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Errors that can occur while building a client
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The underlying HTTP client could not be built
    #[error("HTTP client setup failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A header value contained characters HTTP does not allow
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    /// The configuration could not be loaded or failed validation
    #[error("Invalid client configuration: {0}")]
    Config(#[from] steadyline_config::ConfigError),

    /// Resilience error
    #[error("Resilience error: {0}")]
    Resilience(#[from] steadyline_resilience::ResilienceError),
}

/// Parses a URL, reporting failures as [`NetworkError::InvalidUrl`]
pub fn parse_url(input: &str) -> NetworkResult<reqwest::Url> {
    reqwest::Url::parse(input).map_err(|e| NetworkError::InvalidUrl(format!("{}: {}", input, e)))
}
