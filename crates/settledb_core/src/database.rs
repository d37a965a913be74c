//! Database facade and recovery.

use crate::cell::ValueCell;
use crate::change_feed::{ChangeEvent, ChangeFeed, ChangeSource};
use crate::config::Config;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::journal::{JournalManager, JournalRecord, StoreHeader};
use crate::mutation::Mutation;
use crate::product::{ProductKey, ProductNamespace, Registration};
use crate::remote::RemoteEntry;
use crate::retention::RetentionPolicy;
use crate::scope::ProductScope;
use crate::state::{PeerSyncState, StoreState};
use crate::types::{ChangeSeq, DatabaseKind, EntryId, ReplicaId, Timestamp};
use crate::value::{TypeFilter, ValueData, ValueEntry, ValueType};
use parking_lot::{Mutex, RwLock};
use settledb_storage::StorageBackend;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use tracing::{debug, info, warn};

/// Summary of one registered or known product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
    /// Product identity.
    pub key: ProductKey,
    /// User registration flag.
    pub user_registered: bool,
    /// Admin registration flag.
    pub admin_registered: bool,
    /// Number of live values.
    pub value_count: usize,
}

/// A value together with the name it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedValue {
    /// Name as first written.
    pub name: String,
    /// Current entry.
    pub entry: ValueEntry,
}

/// Outcome of rewriting the journal as a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Journal size before compaction.
    pub bytes_before: u64,
    /// Journal size after compaction.
    pub bytes_after: u64,
}

/// One replica of the settings store.
///
/// A `Database` owns its products, value cells, sync-state table and, for the
/// local store, the remote registry. Every write is a batch of mutations
/// that is applied in memory and appended to the journal under one lock, so
/// readers never observe half a batch.
///
/// # Opening a Database
///
/// ```rust,no_run
/// use settledb_core::{Config, Database};
/// use std::path::Path;
///
/// let db = Database::create(Path::new("settings/local")).unwrap();
/// drop(db);
/// let db = Database::open(Path::new("settings/local")).unwrap();
/// ```
///
/// # Sync exclusion
///
/// While a sync engine holds an [`EngineGuard`], every public mutator returns
/// [`CoreError::Busy`] instead of blocking. Reads are always allowed.
pub struct Database {
    config: Config,
    /// Store directory (holds the lock). None for in-memory databases.
    dir: Option<StoreDir>,
    header: StoreHeader,
    journal: JournalManager,
    state: Mutex<StoreState>,
    feed: ChangeFeed,
    author: String,
    engine_active: AtomicBool,
    last_compacted: AtomicU64,
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens an existing database.
    ///
    /// # Errors
    ///
    /// - `NotFound` if there is no store at `path`
    /// - `DatabaseLocked` if another handle has it open
    /// - `Corrupted` / `InvalidFormat` if the journal cannot be replayed
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Creates a new database, failing if one already exists at `path`.
    pub fn create(path: &Path) -> CoreResult<Self> {
        Self::create_with_config(path, Config::default())
    }

    /// Creates a new database with custom configuration.
    pub fn create_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        Self::open_with_config(path, config.create_if_missing(true).error_if_exists(true))
    }

    /// Opens a database honouring `create_if_missing` and `error_if_exists`.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        use settledb_storage::FileBackend;

        let dir = StoreDir::open(path, config.create_if_missing)?;
        let exists = dir.has_journal();

        if !exists && !config.create_if_missing {
            return Err(CoreError::not_found("database", path.display().to_string()));
        }
        if exists && config.error_if_exists {
            return Err(CoreError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }

        let backend = FileBackend::open_with_create_dirs(&dir.journal_path())?;
        Self::from_journal(config, Some(dir), Box::new(backend))
    }

    /// Opens a database on an arbitrary backend.
    pub fn open_with_backend(config: Config, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        Self::from_journal(config, None, backend)
    }

    /// Opens a fresh in-memory local database.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(Config::default())
    }

    /// Opens a fresh in-memory database with custom configuration.
    pub fn open_in_memory_with_config(config: Config) -> CoreResult<Self> {
        use settledb_storage::InMemoryBackend;
        Self::open_with_backend(config, Box::new(InMemoryBackend::new()))
    }

    fn from_journal(
        config: Config,
        dir: Option<StoreDir>,
        backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let journal = JournalManager::new(backend, config.sync_on_commit);
        let recovery = journal.recover()?;
        if recovery.torn_bytes > 0 {
            warn!(
                torn_bytes = recovery.torn_bytes,
                valid_len = recovery.valid_len,
                "discarding torn journal tail"
            );
            journal.truncate(recovery.valid_len)?;
        }

        let mut records = recovery.records.into_iter();
        let (header, state) = match records.next() {
            None => {
                let header = StoreHeader {
                    replica: ReplicaId::generate(),
                    kind: config.kind,
                    format_version: config.format_version,
                    created_at: config.clock.now(),
                };
                journal.append(&JournalRecord::Header(header.clone()))?;
                info!(replica = %header.replica, kind = %header.kind, "created settings store");
                let state = StoreState::new(header.replica, header.kind);
                (header, state)
            }
            Some(JournalRecord::Header(header)) => {
                if header.format_version.0 != config.format_version.0 {
                    return Err(CoreError::invalid_format(format!(
                        "incompatible format version: store is v{}.{}, expected v{}.{}",
                        header.format_version.0,
                        header.format_version.1,
                        config.format_version.0,
                        config.format_version.1
                    )));
                }
                let mut state = StoreState::new(header.replica, header.kind);
                let mut batches = 0usize;
                for record in records {
                    match record {
                        JournalRecord::Batch(batch) => {
                            state.apply_batch(&batch).map_err(|e| {
                                CoreError::corrupted(format!("journal batch does not replay: {e}"))
                            })?;
                            batches += 1;
                        }
                        JournalRecord::Snapshot(snapshot) => state.restore_snapshot(snapshot),
                        JournalRecord::Header(_) => {
                            return Err(CoreError::corrupted("duplicate journal header"));
                        }
                    }
                }
                debug!(replica = %header.replica, batches, "replayed settings journal");
                (header, state)
            }
            Some(_) => {
                return Err(CoreError::invalid_format(
                    "journal does not start with a header",
                ));
            }
        };

        let author = config.resolved_author();
        let last_compacted = journal.size()?;
        Ok(Self {
            config,
            dir,
            header,
            journal,
            state: Mutex::new(state),
            feed: ChangeFeed::new(),
            author,
            engine_active: AtomicBool::new(false),
            last_compacted: AtomicU64::new(last_compacted),
            is_open: RwLock::new(true),
        })
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// This replica's id.
    #[must_use]
    pub fn replica_id(&self) -> ReplicaId {
        self.header.replica
    }

    /// Role recorded at creation.
    #[must_use]
    pub fn kind(&self) -> DatabaseKind {
        self.header.kind
    }

    /// Store directory, or None when in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// Author label stamped on local writes.
    #[must_use]
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current change sequence.
    #[must_use]
    pub fn change_seq(&self) -> ChangeSeq {
        self.state.lock().change_seq
    }

    // ========================================================================
    // Products
    // ========================================================================

    /// Sets a registration flag. Registering twice is a no-op.
    pub fn register_product(&self, product: &ProductKey, scope: Registration) -> CoreResult<()> {
        let changed = self.write(ChangeSource::Local, |state| {
            let already = state
                .product(product)
                .map_or(false, |ns| ns.is_registered(scope));
            if already {
                return Ok((Vec::new(), false));
            }
            let batch = vec![Mutation::Register {
                product: product.clone(),
                scope,
                registered: true,
            }];
            Ok((batch, true))
        })?;
        if changed {
            info!(%product, ?scope, "registered product");
        }
        Ok(())
    }

    /// Clears a registration flag. Values are kept.
    ///
    /// # Errors
    ///
    /// `NotFound` if the product was never seen by this replica.
    pub fn unregister_product(&self, product: &ProductKey, scope: Registration) -> CoreResult<()> {
        let changed = self.write(ChangeSource::Local, |state| {
            let ns = state
                .product(product)
                .ok_or_else(|| CoreError::not_found("product", product.to_string()))?;
            if !ns.is_registered(scope) {
                return Ok((Vec::new(), false));
            }
            let batch = vec![Mutation::Register {
                product: product.clone(),
                scope,
                registered: false,
            }];
            Ok((batch, true))
        })?;
        if changed {
            info!(%product, ?scope, "unregistered product");
        }
        Ok(())
    }

    /// Returns true if `scope` is set for `product`.
    #[must_use]
    pub fn is_registered(&self, product: &ProductKey, scope: Registration) -> bool {
        self.state
            .lock()
            .product(product)
            .map_or(false, |ns| ns.is_registered(scope))
    }

    /// Summary of one known product.
    pub fn product_info(&self, product: &ProductKey) -> CoreResult<ProductInfo> {
        self.read(|state| {
            state
                .product(product)
                .map(info_of)
                .ok_or_else(|| CoreError::not_found("product", product.to_string()))
        })
    }

    /// Products with at least one registration flag set.
    pub fn registered_products(&self) -> CoreResult<Vec<ProductKey>> {
        self.read(|state| {
            Ok(state
                .products
                .values()
                .filter(|ns| ns.is_current())
                .map(|ns| ns.key().clone())
                .collect())
        })
    }

    /// Every product this replica holds values or flags for.
    pub fn known_products(&self) -> CoreResult<Vec<ProductInfo>> {
        self.read(|state| Ok(state.products.values().map(info_of).collect()))
    }

    /// Binds `product` for repeated access.
    pub fn select_product(&self, product: &ProductKey) -> CoreResult<ProductScope<'_>> {
        self.read(|state| {
            state
                .product(product)
                .map(|ns| ns.key().clone())
                .ok_or_else(|| CoreError::not_found("product", product.to_string()))
        })
        .map(|key| ProductScope::new(self, key))
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Appends a new current entry for `name`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the product is not registered, the name is
    ///   empty, or `data` is a tombstone
    /// - `Busy` while a sync holds this database
    pub fn set_value(
        &self,
        product: &ProductKey,
        name: &str,
        data: ValueData,
    ) -> CoreResult<EntryId> {
        if data.is_deleted() {
            return Err(CoreError::invalid_argument(format!(
                "use delete_value to delete '{name}'"
            )));
        }
        validate_name(name)?;
        self.write(ChangeSource::Local, |state| {
            let ns = current_namespace(state, product)?;
            let entry = self.next_entry(ns.cell(name), data);
            let id = entry.id();
            let batch = vec![Mutation::Append {
                product: product.clone(),
                name: name.to_string(),
                entry,
            }];
            Ok((batch, id))
        })
    }

    /// Sets a string value.
    pub fn set_string(
        &self,
        product: &ProductKey,
        name: &str,
        value: impl Into<String>,
    ) -> CoreResult<EntryId> {
        self.set_value(product, name, ValueData::String(value.into()))
    }

    /// Sets a 32-bit value.
    pub fn set_dword(&self, product: &ProductKey, name: &str, value: u32) -> CoreResult<EntryId> {
        self.set_value(product, name, ValueData::Dword(value))
    }

    /// Sets a 64-bit value.
    pub fn set_qword(&self, product: &ProductKey, name: &str, value: u64) -> CoreResult<EntryId> {
        self.set_value(product, name, ValueData::Qword(value))
    }

    /// Sets a boolean value.
    pub fn set_bool(&self, product: &ProductKey, name: &str, value: bool) -> CoreResult<EntryId> {
        self.set_value(product, name, ValueData::Bool(value))
    }

    /// Sets a blob value.
    pub fn set_blob(
        &self,
        product: &ProductKey,
        name: &str,
        value: impl Into<Vec<u8>>,
    ) -> CoreResult<EntryId> {
        self.set_value(product, name, ValueData::Blob(value.into()))
    }

    /// Sets a value that is present but carries no payload.
    pub fn set_none(&self, product: &ProductKey, name: &str) -> CoreResult<EntryId> {
        self.set_value(product, name, ValueData::None)
    }

    /// Returns the current entry of a live value.
    ///
    /// # Errors
    ///
    /// `NotFound` if the product is unknown or the value is absent or deleted.
    pub fn get_value(&self, product: &ProductKey, name: &str) -> CoreResult<ValueEntry> {
        self.read(|state| {
            let ns = state
                .product(product)
                .ok_or_else(|| CoreError::not_found("product", product.to_string()))?;
            ns.cell(name)
                .and_then(ValueCell::current_live)
                .cloned()
                .ok_or_else(|| CoreError::not_found("value", name))
        })
    }

    /// Reads a string value.
    pub fn get_string(&self, product: &ProductKey, name: &str) -> CoreResult<String> {
        self.get_typed(product, name, ValueType::String, |data| match data {
            ValueData::String(s) => Some(s),
            _ => None,
        })
    }

    /// Reads a 32-bit value.
    pub fn get_dword(&self, product: &ProductKey, name: &str) -> CoreResult<u32> {
        self.get_typed(product, name, ValueType::Dword, |data| match data {
            ValueData::Dword(v) => Some(v),
            _ => None,
        })
    }

    /// Reads a 64-bit value.
    pub fn get_qword(&self, product: &ProductKey, name: &str) -> CoreResult<u64> {
        self.get_typed(product, name, ValueType::Qword, |data| match data {
            ValueData::Qword(v) => Some(v),
            _ => None,
        })
    }

    /// Reads a boolean value.
    pub fn get_bool(&self, product: &ProductKey, name: &str) -> CoreResult<bool> {
        self.get_typed(product, name, ValueType::Bool, |data| match data {
            ValueData::Bool(v) => Some(v),
            _ => None,
        })
    }

    /// Reads a blob value.
    pub fn get_blob(&self, product: &ProductKey, name: &str) -> CoreResult<Vec<u8>> {
        self.get_typed(product, name, ValueType::Blob, |data| match data {
            ValueData::Blob(b) => Some(b),
            _ => None,
        })
    }

    fn get_typed<T>(
        &self,
        product: &ProductKey,
        name: &str,
        expected: ValueType,
        extract: impl FnOnce(ValueData) -> Option<T>,
    ) -> CoreResult<T> {
        let entry = self.get_value(product, name)?;
        let actual = entry.value_type();
        extract(entry.data).ok_or_else(|| CoreError::TypeMismatch {
            name: name.to_string(),
            expected,
            actual,
        })
    }

    /// Appends a tombstone. Returns false if there was nothing to delete.
    pub fn delete_value(&self, product: &ProductKey, name: &str) -> CoreResult<bool> {
        validate_name(name)?;
        self.write(ChangeSource::Local, |state| {
            let ns = current_namespace(state, product)?;
            let cell = ns.cell(name);
            if cell.and_then(ValueCell::current_live).is_none() {
                return Ok((Vec::new(), false));
            }
            let entry = self.next_entry(cell, ValueData::Deleted);
            let batch = vec![Mutation::Append {
                product: product.clone(),
                name: name.to_string(),
                entry,
            }];
            Ok((batch, true))
        })
    }

    /// Live values of a product, ordered by case-folded name.
    pub fn enumerate_values(
        &self,
        product: &ProductKey,
        filter: TypeFilter,
    ) -> CoreResult<Vec<NamedValue>> {
        self.read(|state| {
            let ns = state
                .product(product)
                .ok_or_else(|| CoreError::not_found("product", product.to_string()))?;
            Ok(ns
                .cells()
                .filter_map(|cell| {
                    let entry = cell.current_live()?;
                    filter.accepts(entry.value_type()).then(|| NamedValue {
                        name: cell.name().to_string(),
                        entry: entry.clone(),
                    })
                })
                .collect())
        })
    }

    /// Visible history of a value, oldest first, tombstones included.
    pub fn enumerate_past_values(
        &self,
        product: &ProductKey,
        name: &str,
    ) -> CoreResult<Vec<ValueEntry>> {
        self.with_cell(product, name, |cell| cell.visible_history().cloned().collect())
    }

    /// Raw history of a value, matched entries included.
    pub fn cell_history(&self, product: &ProductKey, name: &str) -> CoreResult<Vec<ValueEntry>> {
        self.with_cell(product, name, |cell| cell.raw_history().to_vec())
    }

    /// Last entry of `name` known to be common with `peer`.
    pub fn peer_marker(
        &self,
        product: &ProductKey,
        name: &str,
        peer: ReplicaId,
    ) -> CoreResult<Option<EntryId>> {
        self.with_cell(product, name, |cell| cell.peer_marker(peer))
    }

    fn with_cell<T>(
        &self,
        product: &ProductKey,
        name: &str,
        f: impl FnOnce(&ValueCell) -> T,
    ) -> CoreResult<T> {
        self.read(|state| {
            state
                .cell(product, name)
                .map(f)
                .ok_or_else(|| CoreError::not_found("value", name))
        })
    }

    fn next_entry(&self, cell: Option<&ValueCell>, data: ValueData) -> ValueEntry {
        let now = self.config.clock.now();
        let timestamp = match cell.and_then(ValueCell::current) {
            Some(last) if last.timestamp >= now => last.timestamp.next(),
            _ => now,
        };
        ValueEntry::new(data, timestamp, self.replica_id(), self.author.as_str())
    }

    // ========================================================================
    // Sync state and remote registry
    // ========================================================================

    /// Sync bookkeeping for `(peer, product)`.
    #[must_use]
    pub fn peer_state(&self, peer: ReplicaId, product: &ProductKey) -> Option<PeerSyncState> {
        self.state.lock().peer_state(peer, product).cloned()
    }

    /// Remembered remotes in insertion order.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` unless this is a local store.
    pub fn remotes(&self) -> CoreResult<Vec<RemoteEntry>> {
        self.require_local()?;
        self.read(|state| Ok(state.remotes.entries().to_vec()))
    }

    /// Looks up a remembered remote by friendly name.
    pub fn remote(&self, friendly_name: &str) -> CoreResult<RemoteEntry> {
        self.require_local()?;
        self.read(|state| {
            state
                .remotes
                .get(friendly_name)
                .cloned()
                .ok_or_else(|| CoreError::not_found("remote", friendly_name))
        })
    }

    /// Adds or replaces a registry entry. Returns true if it was new.
    pub fn remember_remote(&self, entry: RemoteEntry) -> CoreResult<bool> {
        self.require_local()?;
        if entry.friendly_name.trim().is_empty() {
            return Err(CoreError::invalid_argument("remote name must not be empty"));
        }
        self.write(ChangeSource::Local, |state| {
            let is_new = state.remotes.get(&entry.friendly_name).is_none();
            Ok((vec![Mutation::RememberRemote(entry)], is_new))
        })
    }

    /// Removes a registry entry. Markers and sync state are kept.
    pub fn forget_remote(&self, friendly_name: &str) -> CoreResult<Option<RemoteEntry>> {
        self.require_local()?;
        self.write(ChangeSource::Local, |state| {
            let Some(existing) = state.remotes.get(friendly_name).cloned() else {
                return Ok((Vec::new(), None));
            };
            let batch = vec![Mutation::ForgetRemote {
                friendly_name: friendly_name.to_string(),
            }];
            Ok((batch, Some(existing)))
        })
    }

    fn require_local(&self) -> CoreResult<()> {
        if self.kind() == DatabaseKind::Local {
            Ok(())
        } else {
            Err(CoreError::invalid_argument(format!(
                "the remote registry only exists in a local store, this one is {}",
                self.kind()
            )))
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Purges the history entries `policy` selects. Returns how many went.
    pub fn apply_retention(&self, policy: &dyn RetentionPolicy) -> CoreResult<usize> {
        let purged = self.write(ChangeSource::Local, |state| {
            let mut batch = Vec::new();
            let mut purged = 0;
            for ns in state.products.values() {
                for cell in ns.cells() {
                    let ids = policy.select(cell);
                    if ids.is_empty() {
                        continue;
                    }
                    purged += ids.len();
                    batch.push(Mutation::Purge {
                        product: ns.key().clone(),
                        name: cell.name().to_string(),
                        ids,
                    });
                }
            }
            Ok((batch, purged))
        })?;
        if purged > 0 {
            info!(purged, ?policy, "applied retention policy");
        }
        Ok(purged)
    }

    /// Rewrites the journal as a single snapshot.
    pub fn compact(&self) -> CoreResult<CompactionStats> {
        self.ensure_open()?;
        let state = self.state.lock();
        self.compact_locked(&state)
    }

    /// Current journal size in bytes.
    pub fn journal_size(&self) -> CoreResult<u64> {
        self.journal.size()
    }

    fn compact_locked(&self, state: &StoreState) -> CoreResult<CompactionStats> {
        let bytes_before = self.journal.size()?;
        let bytes_after = self.journal.rewrite(&[
            JournalRecord::Header(self.header.clone()),
            JournalRecord::Snapshot(state.to_snapshot()),
        ])?;
        self.last_compacted.store(bytes_after, Ordering::Relaxed);
        info!(bytes_before, bytes_after, "compacted settings journal");
        Ok(CompactionStats {
            bytes_before,
            bytes_after,
        })
    }

    fn maybe_compact(&self, state: &StoreState) {
        let Some(limit) = self.config.compact_after_bytes else {
            return;
        };
        // Never compact again before the journal has doubled.
        let threshold = limit.max(self.last_compacted.load(Ordering::Relaxed) * 2);
        match self.journal.size() {
            Ok(size) if size > threshold => {
                if let Err(err) = self.compact_locked(state) {
                    warn!(error = %err, "automatic compaction failed");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "cannot read journal size"),
        }
    }

    /// Subscribes to appended entries.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// The change feed.
    #[must_use]
    pub fn change_feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Closes the database. Later calls fail with `DatabaseClosed`.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        self.journal.sync()?;
        *is_open = false;
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    // ========================================================================
    // Write path
    // ========================================================================

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> CoreResult<T>) -> CoreResult<T> {
        self.ensure_open()?;
        let state = self.state.lock();
        f(&state)
    }

    /// Builds a batch from the current state and commits it.
    ///
    /// The busy check happens under the state lock, so a write either
    /// finishes before an engine pass snapshots the store or is refused.
    fn write<T>(
        &self,
        source: ChangeSource,
        build: impl FnOnce(&StoreState) -> CoreResult<(Vec<Mutation>, T)>,
    ) -> CoreResult<T> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if self.engine_active.load(Ordering::Acquire) {
            return Err(CoreError::Busy);
        }
        let (batch, out) = build(&state)?;
        self.commit_locked(&mut state, batch, source)?;
        Ok(out)
    }

    fn commit_locked(
        &self,
        state: &mut StoreState,
        batch: Vec<Mutation>,
        source: ChangeSource,
    ) -> CoreResult<ChangeSeq> {
        if batch.is_empty() {
            return Ok(state.change_seq);
        }

        let mut seq = state.change_seq;
        let events: Vec<_> = batch
            .iter()
            .filter_map(Mutation::appended)
            .map(|(product, name, entry)| {
                seq = seq.next();
                ChangeEvent {
                    seq,
                    product: product.clone(),
                    name: name.to_string(),
                    entry: entry.id(),
                    value_type: entry.value_type(),
                    source,
                }
            })
            .collect();

        let undo = state.apply_batch(&batch)?;
        if let Err(err) = self.journal.append(&JournalRecord::Batch(batch)) {
            state.rollback(undo);
            return Err(err);
        }

        self.maybe_compact(state);
        self.feed.emit_batch(events);
        Ok(state.change_seq)
    }

    // ========================================================================
    // Engine access
    // ========================================================================

    /// Takes exclusive sync access to this database.
    ///
    /// # Errors
    ///
    /// `Busy` if another engine pass already holds it.
    pub fn begin_engine(&self) -> CoreResult<EngineGuard<'_>> {
        self.ensure_open()?;
        // Taken under the state lock to order against in-flight writes.
        let _state = self.state.lock();
        self.engine_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CoreError::Busy)?;
        Ok(EngineGuard { db: self })
    }

    /// True while an engine pass holds this database.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.engine_active.load(Ordering::Acquire)
    }
}

fn validate_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        Err(CoreError::invalid_argument("value name must not be empty"))
    } else {
        Ok(())
    }
}

fn current_namespace<'s>(
    state: &'s StoreState,
    product: &ProductKey,
) -> CoreResult<&'s ProductNamespace> {
    state
        .product(product)
        .filter(|ns| ns.is_current())
        .ok_or_else(|| {
            CoreError::invalid_argument(format!("product {product} is not registered"))
        })
}

fn info_of(ns: &ProductNamespace) -> ProductInfo {
    ProductInfo {
        key: ns.key().clone(),
        user_registered: ns.is_registered(Registration::User),
        admin_registered: ns.is_registered(Registration::Admin),
        value_count: ns.live_count(),
    }
}

/// Exclusive sync access to one database.
///
/// Obtained from [`Database::begin_engine`]. While it lives, public mutators
/// on the database return `Busy`; the guard's own [`commit`](Self::commit)
/// is the only write path. Dropping it releases the database.
pub struct EngineGuard<'a> {
    db: &'a Database,
}

impl<'a> EngineGuard<'a> {
    /// The guarded database.
    #[must_use]
    pub fn database(&self) -> &'a Database {
        self.db
    }

    /// The guarded database's replica id.
    #[must_use]
    pub fn replica_id(&self) -> ReplicaId {
        self.db.replica_id()
    }

    /// Every product key the replica knows.
    #[must_use]
    pub fn product_keys(&self) -> Vec<ProductKey> {
        self.db.state.lock().products.keys().cloned().collect()
    }

    /// A copy of one product namespace.
    #[must_use]
    pub fn product(&self, product: &ProductKey) -> Option<ProductNamespace> {
        self.db.state.lock().product(product).cloned()
    }

    /// Sync bookkeeping for `(peer, product)`.
    #[must_use]
    pub fn peer_state(&self, peer: ReplicaId, product: &ProductKey) -> Option<PeerSyncState> {
        self.db.peer_state(peer, product)
    }

    /// Current change sequence.
    #[must_use]
    pub fn change_seq(&self) -> ChangeSeq {
        self.db.change_seq()
    }

    /// Current time from the database's clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.db.config.clock.now()
    }

    /// Applies and journals a batch. Returns the change sequence after it.
    pub fn commit(&self, batch: Vec<Mutation>) -> CoreResult<ChangeSeq> {
        self.db.ensure_open()?;
        let mut state = self.db.state.lock();
        self.db.commit_locked(&mut state, batch, ChangeSource::Sync)
    }
}

impl Drop for EngineGuard<'_> {
    fn drop(&mut self) {
        self.db.engine_active.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for EngineGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineGuard")
            .field("replica", &self.db.replica_id())
            .finish()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("replica", &self.replica_id())
            .field("kind", &self.kind())
            .field("path", &self.path())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::retention::{KeepLast, PurgeMatched};
    use std::sync::Arc;

    fn product() -> ProductKey {
        ProductKey::new("Editor", "1.0", "abc")
    }

    fn create_db() -> (Database, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let config = Config::default().author("tester").clock(clock.clone());
        let db = Database::open_in_memory_with_config(config).unwrap();
        db.register_product(&product(), Registration::User).unwrap();
        (db, clock)
    }

    #[test]
    fn open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.is_open());
        assert_eq!(db.kind(), DatabaseKind::Local);
        assert!(db.path().is_none());
    }

    #[test]
    fn typed_round_trip() {
        let (db, _) = create_db();
        let p = product();
        db.set_string(&p, "Theme", "dark").unwrap();
        db.set_dword(&p, "Width", 800).unwrap();
        db.set_qword(&p, "Big", u64::MAX).unwrap();
        db.set_bool(&p, "Wrap", true).unwrap();
        db.set_blob(&p, "Layout", vec![1, 2, 3]).unwrap();
        db.set_none(&p, "Marker").unwrap();

        assert_eq!(db.get_string(&p, "theme").unwrap(), "dark");
        assert_eq!(db.get_dword(&p, "WIDTH").unwrap(), 800);
        assert_eq!(db.get_qword(&p, "Big").unwrap(), u64::MAX);
        assert!(db.get_bool(&p, "Wrap").unwrap());
        assert_eq!(db.get_blob(&p, "Layout").unwrap(), vec![1, 2, 3]);
        assert_eq!(db.get_value(&p, "Marker").unwrap().value_type(), ValueType::None);
    }

    #[test]
    fn type_mismatch() {
        let (db, _) = create_db();
        db.set_string(&product(), "Theme", "dark").unwrap();
        let err = db.get_dword(&product(), "Theme").unwrap_err();
        assert!(matches!(
            err,
            CoreError::TypeMismatch {
                expected: ValueType::Dword,
                actual: ValueType::String,
                ..
            }
        ));
    }

    #[test]
    fn set_requires_registered_product() {
        let db = Database::open_in_memory().unwrap();
        let err = db.set_dword(&product(), "x", 1).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn timestamps_strictly_increase_even_if_clock_stalls() {
        let (db, clock) = create_db();
        let p = product();
        let a = db.set_dword(&p, "n", 1).unwrap();
        let b = db.set_dword(&p, "n", 2).unwrap();
        clock.set(10);
        let c = db.set_dword(&p, "n", 3).unwrap();
        assert!(a.timestamp < b.timestamp);
        assert!(b.timestamp < c.timestamp);
    }

    #[test]
    fn delete_is_idempotent() {
        let (db, clock) = create_db();
        let p = product();
        assert!(!db.delete_value(&p, "missing").unwrap());

        db.set_string(&p, "Theme", "dark").unwrap();
        clock.advance(1);
        assert!(db.delete_value(&p, "Theme").unwrap());
        assert!(!db.delete_value(&p, "Theme").unwrap());

        assert!(matches!(
            db.get_value(&p, "Theme").unwrap_err(),
            CoreError::NotFound { .. }
        ));
        assert_eq!(db.cell_history(&p, "Theme").unwrap().len(), 2);
    }

    #[test]
    fn enumerate_filters_and_orders() {
        let (db, _) = create_db();
        let p = product();
        db.set_dword(&p, "b", 1).unwrap();
        db.set_string(&p, "A", "x").unwrap();
        db.set_dword(&p, "c", 2).unwrap();
        db.set_bool(&p, "gone", true).unwrap();
        db.delete_value(&p, "gone").unwrap();

        let all: Vec<_> = db
            .enumerate_values(&p, TypeFilter::Any)
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(all, ["A", "b", "c"]);

        let dwords = db
            .enumerate_values(&p, TypeFilter::Only(ValueType::Dword))
            .unwrap();
        assert_eq!(dwords.len(), 2);
        let others = db
            .enumerate_values(&p, TypeFilter::AnyBut(ValueType::Dword))
            .unwrap();
        assert_eq!(others.len(), 1);
    }

    #[test]
    fn name_keeps_first_spelling() {
        let (db, _) = create_db();
        let p = product();
        db.set_dword(&p, "FontSize", 10).unwrap();
        db.set_dword(&p, "FONTSIZE", 12).unwrap();
        let values = db.enumerate_values(&p, TypeFilter::Any).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].name, "FontSize");
        assert_eq!(values[0].entry.data, ValueData::Dword(12));
    }

    #[test]
    fn unregistered_products_keep_values() {
        let (db, _) = create_db();
        let p = product();
        db.set_dword(&p, "n", 1).unwrap();
        db.unregister_product(&p, Registration::User).unwrap();

        assert!(db.registered_products().unwrap().is_empty());
        assert_eq!(db.known_products().unwrap().len(), 1);
        assert_eq!(db.get_dword(&p, "n").unwrap(), 1);
        assert!(db.set_dword(&p, "n", 2).is_err());
    }

    #[test]
    fn engine_guard_makes_mutators_busy() {
        let (db, _) = create_db();
        let p = product();
        let guard = db.begin_engine().unwrap();
        assert!(matches!(db.set_dword(&p, "n", 1), Err(CoreError::Busy)));
        assert!(matches!(db.begin_engine(), Err(CoreError::Busy)));
        // Reads still work.
        assert!(db.registered_products().is_ok());
        drop(guard);
        assert!(db.set_dword(&p, "n", 1).is_ok());
    }

    #[test]
    fn change_feed_reports_local_writes() {
        let (db, _) = create_db();
        let rx = db.subscribe();
        db.set_dword(&product(), "n", 1).unwrap();
        db.delete_value(&product(), "n").unwrap();
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.source, ChangeSource::Local);
        assert_eq!(second.value_type, ValueType::Deleted);
        assert!(second.seq > first.seq);
    }

    #[test]
    fn registry_is_local_only() {
        let config = Config::default().kind(DatabaseKind::Remote);
        let remote = Database::open_in_memory_with_config(config).unwrap();
        assert!(matches!(
            remote.remotes(),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn retention_purges_and_keeps_current() {
        let (db, clock) = create_db();
        let p = product();
        for i in 0..5 {
            clock.advance(1);
            db.set_dword(&p, "n", i).unwrap();
        }
        assert_eq!(db.apply_retention(&PurgeMatched).unwrap(), 0);
        assert_eq!(db.apply_retention(&KeepLast(2)).unwrap(), 3);
        let history = db.enumerate_past_values(&p, "n").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(db.get_dword(&p, "n").unwrap(), 4);
    }

    #[test]
    fn closed_database_rejects_calls() {
        let (db, _) = create_db();
        db.close().unwrap();
        assert!(matches!(
            db.get_value(&product(), "n"),
            Err(CoreError::DatabaseClosed)
        ));
    }
}
