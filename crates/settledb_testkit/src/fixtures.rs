//! Test fixtures and database helpers.
//!
//! Every replica created here runs on a [`ManualClock`], so timestamps are
//! predictable and a test decides who wrote last.

use settledb_core::{
    Config, CoreResult, Database, DatabaseKind, ManualClock, ProductKey, Registration,
    StandardPaths,
};
use settledb_storage::InMemoryBackend;
use settledb_sync::{Settings, SettingsOptions, SyncResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Clock start for fixtures, in milliseconds.
pub const START_MILLIS: u64 = 1_700_000_000_000;

/// The product most tests write to.
pub fn test_product() -> ProductKey {
    ProductKey::new("TestApp", "1.0", "0badc0de")
}

/// A replica with automatic cleanup.
pub struct TestReplica {
    /// The database instance.
    pub db: Database,
    /// Clock the database reads.
    pub clock: Arc<ManualClock>,
    path: Option<PathBuf>,
    // Kept alive to prevent cleanup.
    _temp_dir: Option<TempDir>,
}

impl TestReplica {
    /// Creates an in-memory local replica on its own clock.
    pub fn memory() -> Self {
        Self::memory_with_clock(Arc::new(ManualClock::new(START_MILLIS)))
    }

    /// Creates an in-memory local replica on a shared clock.
    pub fn memory_with_clock(clock: Arc<ManualClock>) -> Self {
        let db = Database::open_in_memory_with_config(config(&clock, DatabaseKind::Local))
            .expect("Failed to open in-memory database");
        Self {
            db,
            clock,
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates an on-disk replica of the given kind in a fresh temp dir.
    pub fn file(kind: DatabaseKind) -> Self {
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("store");
        let db = Database::create_with_config(&path, config(&clock, kind))
            .expect("Failed to create file database");
        Self {
            db,
            clock,
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Store directory if file-based, `None` if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes and reopens a file-based replica, keeping its clock.
    pub fn reopen(self) -> Self {
        let Self {
            db,
            clock,
            path,
            _temp_dir,
        } = self;
        let path = path.expect("Only file replicas can be reopened");
        drop(db);
        let db = Database::open_with_config(&path, config(&clock, DatabaseKind::Local))
            .expect("Failed to reopen database");
        Self {
            db,
            clock,
            path: Some(path),
            _temp_dir,
        }
    }

    /// Registers [`test_product`] for the user and returns it.
    pub fn with_test_product(self) -> Self {
        self.db
            .register_product(&test_product(), Registration::User)
            .expect("Failed to register test product");
        self
    }

    /// Moves this replica's clock forward.
    pub fn tick(&self, millis: u64) {
        self.clock.advance(millis);
    }
}

impl std::ops::Deref for TestReplica {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

fn config(clock: &Arc<ManualClock>, kind: DatabaseKind) -> Config {
    Config::new()
        .clock(clock.clone())
        .author("testkit")
        .kind(kind)
        .sync_on_commit(false)
}

/// Opens a local replica over a copy of raw journal bytes.
pub fn open_journal_bytes(bytes: Vec<u8>) -> CoreResult<Database> {
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    Database::open_with_backend(
        config(&clock, DatabaseKind::Local),
        Box::new(InMemoryBackend::with_data(bytes)),
    )
}

/// Journal file of a store directory.
pub fn journal_path(store: &Path) -> PathBuf {
    store.join("settings.journal")
}

/// `n` in-memory replicas sharing one clock, each with [`test_product`]
/// registered.
pub fn replica_set(n: usize) -> (Arc<ManualClock>, Vec<TestReplica>) {
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let replicas = (0..n)
        .map(|_| TestReplica::memory_with_clock(clock.clone()).with_test_product())
        .collect();
    (clock, replicas)
}

/// Runs a test with a temporary in-memory replica.
pub fn with_replica<F, R>(f: F) -> R
where
    F: FnOnce(&TestReplica) -> R,
{
    let replica = TestReplica::memory().with_test_product();
    f(&replica)
}

/// A `Settings` instance rooted in a temp dir.
pub struct TestSettings {
    /// The settings facade.
    pub settings: Settings,
    /// Clock every store reads.
    pub clock: Arc<ManualClock>,
    temp_dir: TempDir,
}

impl TestSettings {
    /// Opens settings without autosync.
    pub fn new() -> Self {
        Self::with_options(|options| options)
    }

    /// Opens settings after letting the caller adjust the options.
    pub fn with_options(adjust: impl FnOnce(SettingsOptions) -> SettingsOptions) -> Self {
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let options = SettingsOptions::new().with_config(
            Config::new()
                .clock(clock.clone())
                .author("testkit")
                .sync_on_commit(false),
        );
        let settings = Settings::initialize(
            Arc::new(StandardPaths::new(temp_dir.path())),
            adjust(options),
        )
        .expect("Failed to initialize settings");
        Self {
            settings,
            clock,
            temp_dir,
        }
    }

    /// The base directory.
    pub fn base(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Stops autosync and closes every store before the directory goes.
    pub fn uninitialize(self) -> SyncResult<()> {
        let Self {
            settings, temp_dir, ..
        } = self;
        let result = settings.uninitialize();
        drop(temp_dir);
        result
    }
}

impl Default for TestSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestSettings {
    type Target = Settings;

    fn deref(&self) -> &Self::Target {
        &self.settings
    }
}
