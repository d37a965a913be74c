//! Remembered remotes and open remote handles.
//!
//! The registry table itself lives in the local database (see
//! [`Database::remotes`]); this module wraps it with the operations the
//! public API exposes and keeps track of which remotes are currently open.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use settledb_core::{Config, Database, DatabaseKind, RemoteEntry};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Snapshot of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseList {
    /// Number of entries.
    pub count: usize,
    /// Entries in insertion order.
    pub entries: Vec<RemoteEntry>,
}

/// Result of remembering a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RememberOutcome {
    /// A new entry was added.
    Added,
    /// An entry with the same name was replaced.
    Updated,
}

/// Registry operations on a local database.
#[derive(Debug, Clone, Copy)]
pub struct RemoteRegistry<'a> {
    local: &'a Database,
}

impl<'a> RemoteRegistry<'a> {
    /// Wraps `local`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` unless `local` is a local store.
    pub fn new(local: &'a Database) -> SyncResult<Self> {
        if local.kind() != DatabaseKind::Local {
            return Err(SyncError::invalid_argument(format!(
                "the remote registry only exists in a local store, this one is {}",
                local.kind()
            )));
        }
        Ok(Self { local })
    }

    /// Adds or replaces the entry called `name`.
    pub fn remember(
        &self,
        remote: &Database,
        name: &str,
        sync_by_default: bool,
    ) -> SyncResult<RememberOutcome> {
        if remote.replica_id() == self.local.replica_id() {
            return Err(SyncError::invalid_argument(
                "a store cannot remember itself",
            ));
        }
        let path = remote.path().ok_or_else(|| {
            SyncError::invalid_argument("an in-memory database cannot be remembered")
        })?;
        let entry = RemoteEntry {
            friendly_name: name.to_string(),
            path: path.to_path_buf(),
            sync_by_default,
            replica: remote.replica_id(),
        };
        let added = self.local.remember_remote(entry)?;
        info!(remote = name, path = %path.display(), sync_by_default, added, "remembered remote");
        Ok(if added {
            RememberOutcome::Added
        } else {
            RememberOutcome::Updated
        })
    }

    /// Removes the entry called `name`. Sync state with that replica is kept.
    ///
    /// # Errors
    ///
    /// `NotFound` if no such entry exists.
    pub fn forget(&self, name: &str) -> SyncResult<RemoteEntry> {
        let removed = self
            .local
            .forget_remote(name)?
            .ok_or_else(|| SyncError::not_found("remote", name))?;
        info!(remote = name, "forgot remote");
        Ok(removed)
    }

    /// Looks up one entry.
    pub fn get(&self, name: &str) -> SyncResult<RemoteEntry> {
        Ok(self.local.remote(name)?)
    }

    /// Lists every entry.
    pub fn enumerate(&self) -> SyncResult<DatabaseList> {
        let entries = self.local.remotes()?;
        Ok(DatabaseList {
            count: entries.len(),
            entries,
        })
    }
}

/// Shares open remote databases between callers and the scheduler.
///
/// A store directory can only be opened once per process, so every opener
/// goes through here. Handles are held weakly; the last `Arc` dropped closes
/// the remote.
#[derive(Debug)]
pub struct RemoteHandles {
    config: Config,
    open: Mutex<HashMap<PathBuf, Weak<Database>>>,
}

impl RemoteHandles {
    /// Creates an empty cache. `config` is the template for opening and
    /// creating remotes.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the open handle for `path`, opening the store if needed.
    ///
    /// # Errors
    ///
    /// `PeerUnreachable` if the store cannot be opened for any reason.
    pub fn open(&self, path: &Path) -> SyncResult<Arc<Database>> {
        let key = cache_key(path);
        let mut open = self.open.lock();
        if let Some(db) = open.get(&key).and_then(Weak::upgrade) {
            return Ok(db);
        }
        let config = self
            .config
            .clone()
            .create_if_missing(false)
            .error_if_exists(false);
        let db = Database::open_with_config(path, config)
            .map_err(|err| SyncError::peer_unreachable(path, err.to_string()))?;
        debug!(path = %path.display(), replica = %db.replica_id(), "opened remote");
        let db = Arc::new(db);
        open.insert(key, Arc::downgrade(&db));
        Ok(db)
    }

    /// Creates a new remote store at `path` and returns its handle.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if a store is already there.
    pub fn create(&self, path: &Path) -> SyncResult<Arc<Database>> {
        let config = self.config.clone().kind(DatabaseKind::Remote);
        let db = Arc::new(Database::create_with_config(path, config)?);
        info!(path = %path.display(), replica = %db.replica_id(), "created remote store");
        self.open.lock().insert(cache_key(path), Arc::downgrade(&db));
        Ok(db)
    }

    /// Forgets the cached handle for `path`. Returns true if one was cached.
    pub fn release(&self, path: &Path) -> bool {
        self.open.lock().remove(&cache_key(path)).is_some()
    }

    /// Number of remotes currently open.
    pub fn open_count(&self) -> usize {
        let mut open = self.open.lock();
        open.retain(|_, db| db.strong_count() > 0);
        open.len()
    }
}

fn cache_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
