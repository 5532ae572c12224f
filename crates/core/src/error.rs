//! Error types for mdbc
//!
//! Every fallible operation in the ownership, checkpoint and replay paths
//! returns `MdbcResult`. `MdbcError` variants say which caller is expected to
//! react: a retrying caller, a caller that may force a reclaim, or nobody.
//!
//! # Taxonomy
//!
//! - `Service`: transient local-store or ledger failure. Checkpoint and warm-up
//!   abort the current cycle and the caller retries the whole operation.
//! - `OwnershipTimeout`: an apply cycle ran past the configured bound. Expected,
//!   not a bug; the caller decides whether to force-reclaim the range.
//! - `InvalidClock`: a timeout was queried for an operation that never started
//!   its clock. Programming error.
//! - Everything else is input or configuration validation.

use crate::types::{ConnectionId, OperationId};
use std::io;
use thiserror::Error;

/// Result type alias for mdbc operations
pub type MdbcResult<T> = std::result::Result<T, MdbcError>;

/// Error types for mdbc
#[derive(Debug, Error)]
pub enum MdbcError {
    /// Local store or ledger service failure
    #[error("Service error: {message}")]
    Service {
        /// Human-readable description
        message: String,
        /// Underlying cause, when one is available
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Ownership operation exceeded the configured timeout
    #[error("Ownership timeout for operation {operation_id}")]
    OwnershipTimeout {
        /// Operation whose clock expired
        operation_id: OperationId,
    },

    /// Timeout queried for an operation with no running clock
    #[error("No ownership clock for operation {operation_id}")]
    InvalidClock {
        /// Operation that was queried
        operation_id: OperationId,
    },

    /// Malformed range or table name
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// No usable local-store connection for a client connection
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(ConnectionId),

    /// Digest encoding or decoding failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// I/O error (configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl MdbcError {
    /// Service error without an underlying cause
    pub fn service(message: impl Into<String>) -> Self {
        MdbcError::Service {
            message: message.into(),
            source: None,
        }
    }

    /// Service error wrapping an underlying cause
    pub fn service_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        MdbcError::Service {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True if this is an ownership timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, MdbcError::OwnershipTimeout { .. })
    }

    /// True if retrying the whole operation may succeed
    ///
    /// Service errors are transient. A timeout is retryable too, usually after
    /// the caller forces reclamation of the range.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MdbcError::Service { .. }
                | MdbcError::OwnershipTimeout { .. }
                | MdbcError::ConnectionUnavailable(_)
        )
    }
}

impl From<rmp_serde::encode::Error> for MdbcError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        MdbcError::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for MdbcError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        MdbcError::Codec(e.to_string())
    }
}
