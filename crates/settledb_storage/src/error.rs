//! Errors raised by journal backends.

use std::io;
use thiserror::Error;

/// Result alias for backend calls.
pub type StorageResult<T> = Result<T, StorageError>;

/// A backend failure.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying file or device failed.
    #[error("journal I/O failed: {0}")]
    Io(#[from] io::Error),

    /// A read reached past the last byte written.
    #[error("journal read of {len} bytes at {offset} passes the end ({size} bytes)")]
    ReadPastEnd {
        /// Start of the read.
        offset: u64,
        /// Bytes requested.
        len: usize,
        /// Bytes stored.
        size: u64,
    },

    /// Truncation target lies past the current end.
    #[error("cannot truncate journal to {requested} bytes, it holds only {size}")]
    TruncatePastEnd {
        /// Length asked for.
        requested: u64,
        /// Bytes stored.
        size: u64,
    },

    /// Stored bytes cannot be used.
    #[error("journal storage corrupted: {0}")]
    Corrupted(String),
}
