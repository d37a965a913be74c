//! Error types for sync, resolution and scheduling.

use settledb_core::{CoreError, ProductKey};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while syncing.
///
/// Conflicts are not errors; they are reported as data in a
/// [`SyncReport`](crate::SyncReport).
#[derive(Error, Debug)]
pub enum SyncError {
    /// Database error on either side.
    #[error("database error: {0}")]
    Database(CoreError),

    /// A remote database could not be opened.
    #[error("peer unreachable at {}: {reason}", path.display())]
    PeerUnreachable {
        /// Path that was tried.
        path: PathBuf,
        /// Why it failed.
        reason: String,
    },

    /// One of the databases is already held by another sync pass.
    #[error("database is busy with another sync pass")]
    Busy,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidState {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// A product could not be synced and nothing will retry it.
    #[error("product {product} failed to sync: {message}")]
    ProductFailed {
        /// Product that failed.
        product: ProductKey,
        /// Error text from the pass.
        message: String,
    },

    /// A collaborator (locator, monitor) failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// The operation was cancelled by shutdown.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a peer-unreachable error.
    pub fn peer_unreachable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::PeerUnreachable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid-state error.
    pub fn invalid_state(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidState {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::Database(CoreError::invalid_argument(message))
    }

    /// Creates a not-found error.
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::Database(CoreError::not_found(what, name))
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::PeerUnreachable { .. } | SyncError::Busy => true,
            SyncError::Database(err) => err.is_recoverable(),
            _ => false,
        }
    }

    /// Returns true if the error is a missing product, value or remote.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Database(CoreError::NotFound { .. }))
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Busy => SyncError::Busy,
            CoreError::PeerUnreachable { path, reason } => SyncError::PeerUnreachable { path, reason },
            other => SyncError::Database(other),
        }
    }
}
