//! Error types for the sync engine.

use crate::operation::{EntityKind, Verb};
use ledgersync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Backend handlers report failures with these tags directly; the engine
/// never inspects error text to decide what happened.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The backend could not be reached.
    #[error("backend unreachable: {message}")]
    Connectivity {
        /// Error message.
        message: String,
    },

    /// The backend was reached and refused the request.
    #[error("rejected by backend: {message}")]
    Rejected {
        /// Error message.
        message: String,
        /// Status code reported by the backend, if any.
        status: Option<u16>,
    },

    /// No backend call exists for this entity kind and verb.
    #[error("unsupported operation: {verb} {kind}")]
    Unsupported {
        /// Entity kind of the operation.
        kind: EntityKind,
        /// Verb of the operation.
        verb: Verb,
    },

    /// The payload cannot be turned into a backend call.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The backend call did not finish within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The background worker is no longer running.
    #[error("sync worker stopped")]
    WorkerStopped,
}

impl SyncError {
    /// Creates a connectivity error.
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
        }
    }

    /// Creates a rejection without a status code.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            status: None,
        }
    }

    /// Creates a rejection carrying the backend's status code.
    pub fn rejected_with_status(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Returns true if this error means the backend is unreachable.
    ///
    /// A connectivity failure halts the current pass and flips the engine
    /// offline.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SyncError::Connectivity { .. } | SyncError::Timeout)
    }

    /// Returns true if retrying the same operation can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SyncError::Unsupported { .. } | SyncError::InvalidPayload(_)
        )
    }

    /// Returns true if the operation should stay queued for a later pass.
    pub fn is_retryable(&self) -> bool {
        !self.is_permanent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SyncError::connectivity("dns failure").is_connectivity());
        assert!(SyncError::Timeout.is_connectivity());
        assert!(!SyncError::rejected("validation failed").is_connectivity());
        assert!(!SyncError::rejected_with_status(503, "unavailable").is_connectivity());

        assert!(SyncError::Unsupported {
            kind: EntityKind::Settings,
            verb: Verb::Create,
        }
        .is_permanent());
        assert!(SyncError::InvalidPayload("missing id".into()).is_permanent());
        assert!(SyncError::rejected("conflict").is_retryable());
        assert!(SyncError::connectivity("offline").is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::Unsupported {
            kind: EntityKind::Sale,
            verb: Verb::Delete,
        };
        assert_eq!(err.to_string(), "unsupported operation: delete sale");

        let err = SyncError::rejected_with_status(422, "price must be positive");
        assert!(err.to_string().contains("price must be positive"));
        assert!(matches!(
            err,
            SyncError::Rejected {
                status: Some(422),
                ..
            }
        ));
    }
}
