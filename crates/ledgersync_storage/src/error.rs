//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writing the value would exceed the backend's capacity.
    #[error("storage quota exceeded: requested {requested} bytes, limit {limit} bytes")]
    QuotaExceeded {
        /// Total bytes the backend would hold after the write.
        requested: usize,
        /// Configured capacity in bytes.
        limit: usize,
    },

    /// A namespace contains the key separator.
    #[error("invalid namespace {0:?}: must not contain ':'")]
    InvalidNamespace(String),

    /// The persisted data could not be understood.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}
