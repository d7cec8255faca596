// crates/resilience/src/error.rs
//! Error types for resilience operations

use thiserror::Error;

/// Result type for resilience operations
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Errors that can occur in resilience operations
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// A limiter budget or request does not make sense
    #[error("Invalid rate budget: {0}")]
    InvalidBudget(String),

    /// The limiter was shut down while callers were still waiting
    #[error("Rate limiter has been shut down")]
    LimiterShutdown,

    /// Operation was cancelled
    #[error("Operation was cancelled")]
    Cancelled,
}

impl ResilienceError {
    /// Returns true if the error came from caller cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_budget_error() {
        let err = ResilienceError::InvalidBudget("capacity must be greater than 0".to_string());
        assert!(err.to_string().contains("capacity"));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_error() {
        assert!(ResilienceError::Cancelled.is_cancelled());
        assert!(ResilienceError::LimiterShutdown.to_string().contains("shut down"));
    }
}
