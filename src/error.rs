//! Error types for linkrelay
//!
//! Defines the crate-wide error enum. Each layer keeps its own narrow error
//! (codec, scan, dispatch, transport) and converts into `RelayError` with `#[from]`.

use crate::communicator::retry::{RetryDecision, RetryableError};
use crate::connection::CodecError;
use crate::dispatch::{DispatchError, TransportError};
use crate::storage::ScanError;
use thiserror::Error;

/// Result type alias for linkrelay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Comprehensive error type for linkrelay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage errors that are not plain I/O (e.g. a poisoned writer)
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors opening, reading or appending a log
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted record could not be decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A log scan stopped on a fatal error
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    /// A connection failed validation before any delivery attempt
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// The delivery collaborator failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The same connection is already being delivered
    #[error("Delivery already in progress: {0}")]
    InFlight(String),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl RetryableError for RelayError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            RelayError::Transport(e) => e.retry_decision(),
            // Validation, storage and parse failures never succeed on a retry
            RelayError::Config(_)
            | RelayError::Storage(_)
            | RelayError::Io(_)
            | RelayError::Codec(_)
            | RelayError::Scan(_)
            | RelayError::Dispatch(_)
            | RelayError::InFlight(_)
            | RelayError::Yaml(_)
            | RelayError::Json(_)
            | RelayError::Other(_) => RetryDecision::NoRetry,
        }
    }
}
