//! Error types for loading and saving configuration

use crate::validation::ValidationError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading, overriding or saving a config
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An existing but blank file; never silently treated as defaults
    #[error("config {path:?} is empty")]
    Empty { path: PathBuf },

    #[error("cannot parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("cannot write config {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// One entry per offending field
    #[error("invalid config: {}", summarize(.0))]
    Invalid(Vec<ValidationError>),

    /// An environment override that does not parse
    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
}

impl ConfigError {
    /// Field errors carried by [`ConfigError::Invalid`]
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            Self::Invalid(errors) => errors,
            _ => &[],
        }
    }
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
