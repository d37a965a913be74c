//! Storage backend trait definition.

use crate::error::StorageResult;

/// A byte store holding one replica's journal.
///
/// Backends are **opaque**: they never parse what they hold. The journal
/// above them relies on these guarantees:
///
/// - `append` returns the offset the bytes landed at
/// - `read_at` returns exactly what was appended at that offset
/// - after `sync` returns, appended bytes survive a crash
/// - `replace` is all-or-nothing: a crash leaves either the old or the new
///   content, never a mix
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not fully
    /// inside the stored bytes, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes, which is where the next append goes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Makes all appended data and metadata durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the storage down to `new_size` bytes.
    ///
    /// Journal recovery uses this to drop a torn trailing record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncatePastEnd`] if `new_size` is
    /// larger than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically swaps the whole content for `data`.
    ///
    /// Used by journal compaction to install a snapshot image.
    ///
    /// # Errors
    ///
    /// Returns an error if the new content could not be made durable; the
    /// old content is then still in place.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Reads everything currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            crate::StorageError::Corrupted(format!("storage of {size} bytes does not fit memory"))
        })?;
        self.read_at(0, len)
    }
}
