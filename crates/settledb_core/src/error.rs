//! Error types for SettleDB core.

use crate::value::ValueType;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SettleDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] settledb_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] crate::codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A product, value, remote or peer record does not exist.
    #[error("{what} not found: {name}")]
    NotFound {
        /// Kind of object that was looked up.
        what: &'static str,
        /// Name it was looked up by.
        name: String,
    },

    /// A typed accessor was used on a value of another type.
    #[error("type mismatch for '{name}': expected {expected}, found {actual}")]
    TypeMismatch {
        /// Value name.
        name: String,
        /// Type requested by the caller.
        expected: ValueType,
        /// Type actually stored.
        actual: ValueType,
    },

    /// The caller passed an argument the operation cannot accept.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// A sync or conflict resolution is in progress on this database.
    #[error("database busy: a sync is in progress")]
    Busy,

    /// A remote database could not be opened or read.
    #[error("peer unreachable at {}: {reason}", path.display())]
    PeerUnreachable {
        /// Location of the remote.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// Persisted data failed validation.
    #[error("database corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Database is already open or locked.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// A database already exists where one was to be created.
    #[error("database already exists at {}", path.display())]
    AlreadyExists {
        /// Location of the existing database.
        path: PathBuf,
    },

    /// Invalid database format or version.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates a not-found error.
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a peer unreachable error.
    pub fn peer_unreachable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::PeerUnreachable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for a missing product, value, remote or store.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if retrying the same call later may succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Busy | Self::PeerUnreachable { .. } | Self::DatabaseLocked
        )
    }

    /// Returns true if the database must not be used after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Corrupted { .. } | Self::InvalidFormat { .. } | Self::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = CoreError::TypeMismatch {
            name: "Theme".into(),
            expected: ValueType::Dword,
            actual: ValueType::String,
        };
        let text = err.to_string();
        assert!(text.contains("Theme"));
        assert!(text.contains("dword"));
        assert!(text.contains("string"));
    }

    #[test]
    fn classification() {
        assert!(CoreError::Busy.is_recoverable());
        assert!(CoreError::peer_unreachable("/x", "gone").is_recoverable());
        assert!(!CoreError::Busy.is_fatal());
        assert!(CoreError::corrupted("bad crc").is_fatal());
        assert!(!CoreError::not_found("value", "x").is_recoverable());
    }
}
