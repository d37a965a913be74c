//! Store directory management.
//!
//! ```text
//! <store>/
//! ├─ LOCK               # Advisory lock for single-writer
//! └─ settings.journal   # Journal records
//! ```
//!
//! The LOCK file ensures only one handle, in any process, writes to the
//! store at a time.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "settings.journal";

/// A locked store directory.
#[derive(Debug)]
pub(crate) struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the directory is missing and `create_if_missing` is false
    /// - `DatabaseLocked` if another handle holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::not_found(
                    "database",
                    path.display().to_string(),
                ));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_argument(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// True if a journal with content already exists.
    pub fn has_journal(&self) -> bool {
        fs::metadata(self.journal_path()).map_or(false, |m| m.len() > 0)
    }
}
