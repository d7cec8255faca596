//! Shared building blocks for the steadyline transport
//!
//! - [`ErrorClassifier`] and the [`ErrorKind`] taxonomy
//! - [`ErrorEnvelope`] parsing for provider error payloads
//! - [`CountBus`] counters used by the metrics interceptor
//! - the versioned [`serialization`] envelope used by storage
//!
//! # Example
//!
//! ```rust
//! use steadyline_core::{ErrorClassifier, ErrorKind, ResponseError};
//!
//! let body = br#"{"error":{"code":"syncStateNotFound","message":"gone"}}"#;
//! let err = ErrorClassifier::new().classify(ResponseError::new(410, body));
//!
//! assert_eq!(err.kind(), ErrorKind::InvalidContinuationToken);
//! assert!(!err.kind().is_retryable());
//! ```

pub mod classify;
pub mod count;
pub mod envelope;
pub mod error;
pub mod serialization;

pub use classify::{
    codes, has_kind, is_connection_transient, is_empty_not_found, is_invalid_request,
    is_malware, is_transient_io_kind, ErrorClassifier, TRANSIENT_IO_MARKER,
    VIRUS_INFECTED_HEADER,
};
pub use count::CountBus;
pub use envelope::{ErrorDetail, ErrorEnvelope};
pub use error::{
    chain, BoxError, ClassifiedError, ErrorKind, Label, RecoveryAction, ResponseError,
    TransportError, TransportErrorKind,
};
pub use serialization::{
    SerializationError, SerializationFormat, SerializationResult, VersionedBackupReader,
    VersionedRestoreReader,
};
