//! The public entry point.

use crate::collaborators::{ChangeMonitor, LegacyLocator};
use crate::config::SchedulerConfig;
use crate::conflict::{ConflictProduct, Resolutions};
use crate::engine::{SyncEngine, SyncOptions, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::registry::{DatabaseList, RememberOutcome, RemoteHandles, RemoteRegistry};
use crate::resolver::ResolveReport;
use crate::scheduler::{AutoSync, BlockedProducts, SchedulerContext};
use crate::status::{StatusSink, TracingSink};
use parking_lot::Mutex;
use settledb_core::{
    Config, Database, DatabaseKind, EntryId, NamedValue, PathResolver, ProductKey, ProductScope,
    Registration, RemoteEntry, TypeFilter, ValueData, ValueEntry,
};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Options for [`Settings::initialize`].
#[derive(Clone)]
pub struct SettingsOptions {
    /// Template for every store opened: clock, author, durability.
    pub config: Config,
    /// Start autosync with this configuration; `None` leaves it off.
    pub autosync: Option<SchedulerConfig>,
    /// Legacy product locator.
    pub locator: Option<Arc<dyn LegacyLocator>>,
    /// Change monitor.
    pub monitor: Option<Arc<dyn ChangeMonitor>>,
    /// Receives status events.
    pub sink: Arc<dyn StatusSink>,
}

impl SettingsOptions {
    /// Creates default options: no autosync, events go to `tracing`.
    pub fn new() -> Self {
        Self {
            config: Config::new(),
            autosync: None,
            locator: None,
            monitor: None,
            sink: Arc::new(TracingSink),
        }
    }

    /// Sets the store configuration template.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Turns autosync on.
    #[must_use]
    pub fn with_autosync(mut self, config: SchedulerConfig) -> Self {
        self.autosync = Some(config);
        self
    }

    /// Sets the legacy locator.
    #[must_use]
    pub fn with_locator(mut self, locator: Arc<dyn LegacyLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Sets the change monitor.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<dyn ChangeMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Sets the status sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }
}

impl Default for SettingsOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SettingsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsOptions")
            .field("config", &self.config)
            .field("autosync", &self.autosync)
            .field("locator", &self.locator.is_some())
            .field("monitor", &self.monitor.is_some())
            .finish()
    }
}

/// A user's settings: the local store, the optional admin store, remembered
/// remotes and the autosync worker.
///
/// ```rust,no_run
/// use settledb_core::{ProductKey, StandardPaths};
/// use settledb_sync::{Settings, SettingsOptions};
/// use std::sync::Arc;
///
/// let settings = Settings::initialize(
///     Arc::new(StandardPaths::new("/tmp/settledb-demo")),
///     SettingsOptions::new(),
/// )
/// .unwrap();
/// let product = ProductKey::new("Editor", "1", "ab12");
/// settings.register_product(&product).unwrap();
///
/// let editor = settings.select_product(&product).unwrap();
/// editor.set_string("Theme", "dark").unwrap();
///
/// let share = settings.create_remote_database("share/editor".as_ref()).unwrap();
/// settings.remember_database(&share, "Share", true).unwrap();
/// settings.uninitialize().unwrap();
/// ```
pub struct Settings {
    paths: Arc<dyn PathResolver>,
    local: Arc<Database>,
    admin: Option<Arc<Database>>,
    handles: Arc<RemoteHandles>,
    engine: Arc<SyncEngine>,
    blocked: Arc<BlockedProducts>,
    sink: Arc<dyn StatusSink>,
    autosync: Mutex<Option<AutoSync>>,
}

impl Settings {
    /// Opens (creating if needed) the local and admin stores and starts
    /// autosync if asked to.
    ///
    /// An admin store that cannot be opened is logged and skipped. A store of
    /// the wrong kind at either path is an error.
    pub fn initialize(paths: Arc<dyn PathResolver>, options: SettingsOptions) -> SyncResult<Self> {
        let config = options.config.clone().create_if_missing(true);
        let local = Arc::new(Database::open_with_config(
            &paths.local_store(),
            config.clone().kind(DatabaseKind::Local),
        )?);
        if local.kind() != DatabaseKind::Local {
            return Err(SyncError::invalid_argument(format!(
                "store at {} is a {} store, not a local one",
                paths.local_store().display(),
                local.kind()
            )));
        }

        let admin = match paths.admin_store() {
            None => None,
            Some(path) => {
                match Database::open_with_config(&path, config.clone().kind(DatabaseKind::Admin)) {
                    Ok(db) if db.kind() != DatabaseKind::Admin => {
                        return Err(SyncError::invalid_argument(format!(
                            "store at {} is a {} store, not an admin one",
                            path.display(),
                            db.kind()
                        )));
                    }
                    Ok(db) => Some(Arc::new(db)),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "admin store unavailable");
                        None
                    }
                }
            }
        };

        let settings = Self {
            paths,
            local,
            admin,
            handles: Arc::new(RemoteHandles::new(options.config.clone())),
            engine: Arc::new(SyncEngine::new()),
            blocked: Arc::new(BlockedProducts::new()),
            sink: options.sink.clone(),
            autosync: Mutex::new(None),
        };

        if let Some(scheduler) = options.autosync {
            let worker = AutoSync::start(SchedulerContext {
                local: settings.local.clone(),
                admin: settings.admin.clone(),
                paths: settings.paths.clone(),
                handles: settings.handles.clone(),
                engine: settings.engine.clone(),
                blocked: settings.blocked.clone(),
                locator: options.locator,
                monitor: options.monitor,
                sink: options.sink,
                config: scheduler,
            })?;
            *settings.autosync.lock() = Some(worker);
        }

        info!(
            replica = %settings.local.replica_id(),
            admin = settings.admin.is_some(),
            autosync = settings.is_autosync_running(),
            "settings initialized"
        );
        Ok(settings)
    }

    /// Stops autosync and closes the stores.
    pub fn uninitialize(self) -> SyncResult<()> {
        if let Some(worker) = self.autosync.lock().take() {
            worker.stop();
        }
        self.local.close()?;
        if let Some(admin) = &self.admin {
            admin.close()?;
        }
        info!("settings uninitialized");
        Ok(())
    }

    /// The local store.
    pub fn local(&self) -> &Arc<Database> {
        &self.local
    }

    /// The admin store, if one is open.
    pub fn admin(&self) -> Option<&Arc<Database>> {
        self.admin.as_ref()
    }

    /// The engine used for manual and automatic passes.
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    // ========================================================================
    // Products and values
    // ========================================================================

    /// Scopes value operations to one registered product.
    pub fn select_product(&self, product: &ProductKey) -> SyncResult<ProductScope<'_>> {
        Ok(self.local.select_product(product)?)
    }

    /// Registers a product for this user.
    pub fn register_product(&self, product: &ProductKey) -> SyncResult<()> {
        Ok(self.local.register_product(product, Registration::User)?)
    }

    /// Removes this user's registration.
    pub fn unregister_product(&self, product: &ProductKey) -> SyncResult<()> {
        Ok(self.local.unregister_product(product, Registration::User)?)
    }

    /// Registers a product machine-wide.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if there is no admin store.
    pub fn register_product_admin(&self, product: &ProductKey) -> SyncResult<()> {
        let admin = self.require_admin()?;
        admin.register_product(product, Registration::Admin)?;
        self.local.register_product(product, Registration::Admin)?;
        Ok(())
    }

    /// Removes the machine-wide registration.
    pub fn unregister_product_admin(&self, product: &ProductKey) -> SyncResult<()> {
        let admin = self.require_admin()?;
        admin.unregister_product(product, Registration::Admin)?;
        if self.local.is_registered(product, Registration::Admin) {
            self.local.unregister_product(product, Registration::Admin)?;
        }
        Ok(())
    }

    /// Writes a value.
    pub fn set_value(&self, product: &ProductKey, name: &str, data: ValueData) -> SyncResult<EntryId> {
        Ok(self.local.set_value(product, name, data)?)
    }

    /// Reads the current entry of a value.
    pub fn get_value(&self, product: &ProductKey, name: &str) -> SyncResult<ValueEntry> {
        Ok(self.local.get_value(product, name)?)
    }

    /// Deletes a value. Returns false if it was already absent.
    pub fn delete_value(&self, product: &ProductKey, name: &str) -> SyncResult<bool> {
        Ok(self.local.delete_value(product, name)?)
    }

    /// Lists live values of a product.
    pub fn enumerate_values(&self, product: &ProductKey, filter: TypeFilter) -> SyncResult<Vec<NamedValue>> {
        Ok(self.local.enumerate_values(product, filter)?)
    }

    /// Lists the visible history of one value, oldest first.
    pub fn enumerate_past_values(&self, product: &ProductKey, name: &str) -> SyncResult<Vec<ValueEntry>> {
        Ok(self.local.enumerate_past_values(product, name)?)
    }

    // ========================================================================
    // Remotes
    // ========================================================================

    /// Creates a new remote store. Relative paths resolve through the
    /// path resolver.
    pub fn create_remote_database(&self, path: &Path) -> SyncResult<Arc<Database>> {
        self.handles.create(&self.paths.resolve_remote(path))
    }

    /// Opens an existing remote store.
    ///
    /// # Errors
    ///
    /// `PeerUnreachable` if it cannot be opened.
    pub fn open_remote_database(&self, path: &Path) -> SyncResult<Arc<Database>> {
        self.handles.open(&self.paths.resolve_remote(path))
    }

    /// Remembers `remote` as `name`.
    ///
    /// A new entry with `sync_by_default` is synced right away. If that pass
    /// fails or leaves a product behind, autosync is woken to retry it.
    ///
    /// # Errors
    ///
    /// The pass error (or `ProductFailed`) when the pass did not complete and
    /// autosync is not running to pick it up. The remote stays remembered.
    pub fn remember_database(
        &self,
        remote: &Database,
        name: &str,
        sync_by_default: bool,
    ) -> SyncResult<RememberOutcome> {
        let outcome = self.registry()?.remember(remote, name, sync_by_default)?;
        if outcome == RememberOutcome::Added && sync_by_default {
            let failure = match self.sync(remote) {
                Ok(report) => report.product_errors.into_iter().next().map(|failed| {
                    SyncError::ProductFailed {
                        product: failed.product,
                        message: failed.message,
                    }
                }),
                Err(err) => Some(err),
            };
            if let Some(err) = failure {
                warn!(remote = name, error = %err, "initial sync failed");
                if !self.sync_now() {
                    return Err(err);
                }
            }
        }
        Ok(outcome)
    }

    /// Forgets a remembered remote. Sync state with it is kept.
    pub fn forget_database(&self, name: &str) -> SyncResult<RemoteEntry> {
        self.registry()?.forget(name)
    }

    /// Opens a remembered remote by name.
    pub fn open_known_remote_database(&self, name: &str) -> SyncResult<Arc<Database>> {
        let entry = self.registry()?.get(name)?;
        self.handles.open(&self.paths.resolve_remote(&entry.path))
    }

    /// Releases a remote handle. The store closes once no one else holds it.
    pub fn disconnect(&self, remote: Arc<Database>) {
        if Arc::strong_count(&remote) == 1 {
            if let Some(path) = remote.path() {
                self.handles.release(path);
            }
        }
    }

    /// Lists remembered remotes.
    pub fn enumerate_database_list(&self) -> SyncResult<DatabaseList> {
        self.registry()?.enumerate()
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Runs one pass between the local store and `remote`.
    pub fn sync(&self, remote: &Database) -> SyncResult<SyncReport> {
        let options = SyncOptions::new().with_sink(self.sink.clone());
        self.engine.sync(&self.local, remote, &options)
    }

    /// Applies conflict choices against `remote` and unblocks every product
    /// that has nothing left pending.
    pub fn resolve(
        &self,
        remote: &Database,
        conflicts: &[ConflictProduct],
        resolutions: &Resolutions,
    ) -> SyncResult<ResolveReport> {
        let report = self
            .engine
            .resolve(&self.local, remote, conflicts, resolutions)?;
        let mut unblocked = false;
        for group in conflicts {
            let pending = report.pending.iter().any(|p| p.product == group.product);
            if !pending {
                unblocked |= self.blocked.unblock(remote.replica_id(), &group.product);
            }
        }
        if unblocked {
            self.sync_now();
        }
        Ok(report)
    }

    /// Products autosync holds back from `remote` until resolved.
    pub fn blocked_products(&self, remote: &Database) -> BTreeSet<ProductKey> {
        self.blocked.blocked_for(remote.replica_id())
    }

    /// Asks autosync for a pass now. Returns false if autosync is off.
    pub fn sync_now(&self) -> bool {
        self.autosync
            .lock()
            .as_ref()
            .is_some_and(AutoSync::wake)
    }

    /// True while the autosync worker runs.
    pub fn is_autosync_running(&self) -> bool {
        self.autosync
            .lock()
            .as_ref()
            .is_some_and(AutoSync::is_running)
    }

    fn registry(&self) -> SyncResult<RemoteRegistry<'_>> {
        RemoteRegistry::new(&self.local)
    }

    fn require_admin(&self) -> SyncResult<&Arc<Database>> {
        self.admin
            .as_ref()
            .ok_or_else(|| SyncError::invalid_argument("no admin store is open"))
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("local", &self.local.replica_id())
            .field("admin", &self.admin.as_ref().map(|db| db.replica_id()))
            .field("autosync", &self.is_autosync_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settledb_core::{ManualClock, StandardPaths};
    use tempfile::tempdir;

    fn product() -> ProductKey {
        ProductKey::new("Editor", "1", "ab12")
    }

    fn open(base: &Path) -> Settings {
        let clock = Arc::new(ManualClock::new(1_000));
        let options = SettingsOptions::new()
            .with_config(Config::new().clock(clock).author("alice").sync_on_commit(false));
        Settings::initialize(Arc::new(StandardPaths::new(base)), options).unwrap()
    }

    #[test]
    fn initialize_creates_both_stores() {
        let dir = tempdir().unwrap();
        let settings = open(dir.path());
        assert_eq!(settings.local().kind(), DatabaseKind::Local);
        assert_eq!(settings.admin().unwrap().kind(), DatabaseKind::Admin);
        assert!(!settings.is_autosync_running());
        let replica = settings.local().replica_id();
        settings.uninitialize().unwrap();

        let again = open(dir.path());
        assert_eq!(again.local().replica_id(), replica);
    }

    #[test]
    fn remember_pushes_existing_values() {
        let dir = tempdir().unwrap();
        let settings = open(dir.path());
        settings.register_product(&product()).unwrap();
        settings
            .set_value(&product(), "Theme", ValueData::String("dark".into()))
            .unwrap();

        let remote = settings.create_remote_database(Path::new("remote1")).unwrap();
        settings.remember_database(&remote, "Remote1", true).unwrap();
        assert_eq!(remote.get_string(&product(), "Theme").unwrap(), "dark");

        let list = settings.enumerate_database_list().unwrap();
        assert_eq!(list.count, 1);
        assert_eq!(list.entries[0].friendly_name, "Remote1");
    }

    #[test]
    fn known_remote_opens_by_name() {
        let dir = tempdir().unwrap();
        let settings = open(dir.path());
        let remote = settings.create_remote_database(Path::new("r")).unwrap();
        settings.remember_database(&remote, "R", false).unwrap();
        let id = remote.replica_id();
        settings.disconnect(remote);

        let reopened = settings.open_known_remote_database("r").unwrap();
        assert_eq!(reopened.replica_id(), id);
        assert!(settings
            .open_known_remote_database("missing")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn admin_registration_sets_both_flags() {
        let dir = tempdir().unwrap();
        let settings = open(dir.path());
        settings.register_product_admin(&product()).unwrap();
        assert!(settings.local().is_registered(&product(), Registration::Admin));
        assert!(settings
            .admin()
            .unwrap()
            .is_registered(&product(), Registration::Admin));

        settings.unregister_product_admin(&product()).unwrap();
        assert!(!settings.local().is_registered(&product(), Registration::Admin));
    }

    #[test]
    fn admin_registration_needs_admin_store() {
        let dir = tempdir().unwrap();
        let settings = Settings::initialize(
            Arc::new(StandardPaths::new(dir.path()).without_admin()),
            SettingsOptions::new(),
        )
        .unwrap();
        assert!(settings.admin().is_none());
        assert!(settings.register_product_admin(&product()).is_err());
        assert!(!settings.sync_now());
    }

    #[test]
    fn failed_first_sync_is_reported_without_autosync() {
        let dir = tempdir().unwrap();
        let settings = open(dir.path());
        let remote = settings.create_remote_database(Path::new("held")).unwrap();

        let held = remote.begin_engine().unwrap();
        let err = settings.remember_database(&remote, "Held", true).unwrap_err();
        assert!(matches!(err, SyncError::Busy));
        drop(held);

        let list = settings.enumerate_database_list().unwrap();
        assert_eq!(list.count, 1);
        assert!(settings.sync(&remote).unwrap().is_clean());
    }

    #[test]
    fn local_store_at_admin_path_is_rejected() {
        let dir = tempdir().unwrap();
        let paths = StandardPaths::new(dir.path());
        let admin_path = paths.admin_store().unwrap();
        drop(Database::create_with_config(&admin_path, Config::new().kind(DatabaseKind::Local)).unwrap());

        let err = Settings::initialize(Arc::new(paths), SettingsOptions::new()).unwrap_err();
        assert!(err.to_string().contains("not an admin one"));
    }
}
