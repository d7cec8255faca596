// crates/network/src/credentials.rs
//! Per-request authorization

use crate::error::{NetworkError, NetworkResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use steadyline_core::BoxError;

/// Supplies auth headers for each attempt
///
/// Called before every physical attempt made by the supervised sender, so a
/// provider that refreshes tokens lazily gets the chance to do so after an
/// expired-credential failure.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn authorize(&self, url: &Url, headers: &mut HeaderMap) -> Result<(), BoxError>;
}

/// A fixed bearer token
#[derive(Clone)]
pub struct StaticToken {
    value: HeaderValue,
}

impl StaticToken {
    pub fn new(token: &str) -> NetworkResult<Self> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| NetworkError::InvalidHeader(e.to_string()))?;
        value.set_sensitive(true);
        Ok(Self { value })
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn authorize(&self, _url: &Url, headers: &mut HeaderMap) -> Result<(), BoxError> {
        headers.insert(AUTHORIZATION, self.value.clone());
        Ok(())
    }
}
