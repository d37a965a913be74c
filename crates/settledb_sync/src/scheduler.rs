//! Background autosync.
//!
//! One worker thread per local database. It blocks on a command channel with
//! a timeout of `SchedulerConfig::interval`, so the timer, change-monitor
//! wake-ups and local writes all arrive the same way. Each pass redetects
//! legacy products, syncs every `sync_by_default` remote and reconciles with
//! the admin store. A second thread forwards local change-feed events into
//! the channel.

use crate::collaborators::{apply_detection, ChangeMonitor, LegacyLocator, WatchId, WatchRequest};
use crate::config::SchedulerConfig;
use crate::engine::{SyncEngine, SyncOptions, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::registry::RemoteHandles;
use crate::status::{StatusEvent, StatusSink};
use parking_lot::Mutex;
use settledb_core::{ChangeSource, CoreError, Database, PathResolver, ProductKey, ReplicaId};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Friendly name used in status events for the admin store.
pub const ADMIN_REMOTE: &str = "admin";

const FORWARD_POLL: Duration = Duration::from_millis(100);

/// Why the worker woke up early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// A watched location changed.
    Monitor,
    /// A value was written locally.
    LocalChange,
    /// Someone asked for a pass.
    Manual,
}

pub(crate) enum SchedulerCommand {
    Wake(WakeReason),
    Shutdown,
}

#[derive(Clone)]
enum WakeTarget {
    Channel(Sender<SchedulerCommand>),
    Callback(Arc<dyn Fn(WakeReason) + Send + Sync>),
}

/// Handle that triggers an early scheduler pass.
#[derive(Clone)]
pub struct Waker {
    target: WakeTarget,
    reason: WakeReason,
}

impl Waker {
    pub(crate) fn channel(tx: Sender<SchedulerCommand>, reason: WakeReason) -> Self {
        Self {
            target: WakeTarget::Channel(tx),
            reason,
        }
    }

    /// A waker that calls `f` instead of a scheduler.
    pub fn from_fn(reason: WakeReason, f: impl Fn(WakeReason) + Send + Sync + 'static) -> Self {
        Self {
            target: WakeTarget::Callback(Arc::new(f)),
            reason,
        }
    }

    /// Requests a pass. Returns false once the scheduler has stopped.
    pub fn wake(&self) -> bool {
        match &self.target {
            WakeTarget::Channel(tx) => tx.send(SchedulerCommand::Wake(self.reason)).is_ok(),
            WakeTarget::Callback(f) => {
                f(self.reason);
                true
            }
        }
    }

    /// The reason this waker reports.
    pub fn reason(&self) -> WakeReason {
        self.reason
    }
}

impl fmt::Debug for Waker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waker").field("reason", &self.reason).finish()
    }
}

/// Products held back from sync per peer until their conflicts are resolved.
#[derive(Debug, Default)]
pub struct BlockedProducts {
    inner: Mutex<HashMap<ReplicaId, BTreeSet<ProductKey>>>,
}

impl BlockedProducts {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks `products` for `peer`.
    pub fn block(&self, peer: ReplicaId, products: impl IntoIterator<Item = ProductKey>) {
        self.inner.lock().entry(peer).or_default().extend(products);
    }

    /// Unblocks one product. Returns true if it was blocked.
    pub fn unblock(&self, peer: ReplicaId, product: &ProductKey) -> bool {
        let mut inner = self.inner.lock();
        let Some(set) = inner.get_mut(&peer) else {
            return false;
        };
        let removed = set.remove(product);
        if set.is_empty() {
            inner.remove(&peer);
        }
        removed
    }

    /// Products blocked for `peer`.
    pub fn blocked_for(&self, peer: ReplicaId) -> BTreeSet<ProductKey> {
        self.inner.lock().get(&peer).cloned().unwrap_or_default()
    }

    /// True if `product` is blocked for `peer`.
    pub fn is_blocked(&self, peer: ReplicaId, product: &ProductKey) -> bool {
        self.inner
            .lock()
            .get(&peer)
            .is_some_and(|set| set.contains(product))
    }
}

/// Everything a worker needs.
pub(crate) struct SchedulerContext {
    pub(crate) local: Arc<Database>,
    pub(crate) admin: Option<Arc<Database>>,
    pub(crate) paths: Arc<dyn PathResolver>,
    pub(crate) handles: Arc<RemoteHandles>,
    pub(crate) engine: Arc<SyncEngine>,
    pub(crate) blocked: Arc<BlockedProducts>,
    pub(crate) locator: Option<Arc<dyn LegacyLocator>>,
    pub(crate) monitor: Option<Arc<dyn ChangeMonitor>>,
    pub(crate) sink: Arc<dyn StatusSink>,
    pub(crate) config: SchedulerConfig,
}

/// A running autosync worker.
///
/// Dropping it, or calling [`stop`](Self::stop), lets the current pass finish
/// and joins the threads.
pub struct AutoSync {
    tx: Sender<SchedulerCommand>,
    stopping: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
}

impl AutoSync {
    pub(crate) fn start(ctx: SchedulerContext) -> SyncResult<Self> {
        let (tx, rx) = mpsc::channel();
        let stopping = Arc::new(AtomicBool::new(false));

        let changes = ctx.local.subscribe();
        let forward = Waker::channel(tx.clone(), WakeReason::LocalChange);
        let forward_stop = stopping.clone();
        let forwarder = thread::Builder::new()
            .name("settledb-changes".into())
            .spawn(move || forward_local_changes(&changes, &forward, &forward_stop))
            .map_err(|err| SyncError::Database(CoreError::Io(err)))?;

        let worker = Worker {
            waker: Waker::channel(tx.clone(), WakeReason::Monitor),
            ctx,
            backoff: HashMap::new(),
            watched: HashSet::new(),
            watches: Vec::new(),
        };
        let worker = thread::Builder::new()
            .name("settledb-autosync".into())
            .spawn(move || worker.run(&rx))
            .map_err(|err| SyncError::Database(CoreError::Io(err)))?;

        Ok(Self {
            tx,
            stopping,
            worker: Some(worker),
            forwarder: Some(forwarder),
        })
    }

    /// A waker for manual passes.
    pub fn waker(&self) -> Waker {
        Waker::channel(self.tx.clone(), WakeReason::Manual)
    }

    /// Requests a pass now.
    pub fn wake(&self) -> bool {
        self.waker().wake()
    }

    /// True while the worker thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the worker after its current pass.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stopping.store(true, Ordering::Release);
        let _ = self.tx.send(SchedulerCommand::Shutdown);
        for handle in [self.worker.take(), self.forwarder.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!("autosync thread panicked");
            }
        }
    }
}

impl Drop for AutoSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for AutoSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoSync")
            .field("running", &self.is_running())
            .finish()
    }
}

fn forward_local_changes(
    changes: &Receiver<settledb_core::ChangeEvent>,
    waker: &Waker,
    stopping: &AtomicBool,
) {
    while !stopping.load(Ordering::Acquire) {
        match changes.recv_timeout(FORWARD_POLL) {
            Ok(event) if event.source == ChangeSource::Local => {
                if !waker.wake() {
                    break;
                }
            }
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

struct Backoff {
    failures: u32,
    retry_at: Instant,
}

struct Worker {
    ctx: SchedulerContext,
    waker: Waker,
    backoff: HashMap<String, Backoff>,
    watched: HashSet<PathBuf>,
    watches: Vec<WatchId>,
}

impl Worker {
    fn run(mut self, rx: &Receiver<SchedulerCommand>) {
        info!(interval = ?self.ctx.config.interval, "autosync started");
        if self.ctx.config.run_on_start {
            self.pass();
        }
        loop {
            match rx.recv_timeout(self.ctx.config.interval) {
                Ok(SchedulerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(SchedulerCommand::Wake(reason)) => {
                    debug!(?reason, "autosync woken");
                    if drain(rx) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.pass();
        }
        self.unwatch_all();
        info!("autosync stopped");
    }

    fn pass(&mut self) {
        self.emit(StatusEvent::AutoSyncRunning);
        if self.ctx.config.redetect {
            self.redetect();
        }
        self.sync_remotes();
        if self.ctx.config.sync_admin {
            self.sync_admin();
        }
    }

    fn redetect(&mut self) {
        let Some(locator) = self.ctx.locator.clone() else {
            return;
        };
        self.emit(StatusEvent::RedetectingProducts);
        let detected = match locator.detect() {
            Ok(detected) => detected,
            Err(err) => {
                warn!(error = %err, "product detection failed");
                self.emit(StatusEvent::GeneralError {
                    message: format!("product detection failed: {err}"),
                });
                return;
            }
        };

        let mut written = 0;
        for product in &detected {
            match apply_detection(&self.ctx.local, product) {
                Ok(count) => written += count,
                Err(err) => self.emit(StatusEvent::ProductError {
                    product: product.product.clone(),
                    message: err.to_string(),
                }),
            }
            for binding in &product.bindings {
                if let Some(target) = binding.location.watch_target() {
                    self.watch(target);
                }
            }
        }
        self.emit(StatusEvent::RedetectProductsFinished {
            detected: detected.len(),
            written,
        });
    }

    fn sync_remotes(&mut self) {
        let remotes = match self.ctx.local.remotes() {
            Ok(remotes) => remotes,
            Err(err) => {
                self.emit(StatusEvent::GeneralError {
                    message: format!("cannot read remote registry: {err}"),
                });
                return;
            }
        };

        for remote in remotes.into_iter().filter(|r| r.sync_by_default) {
            let name = remote.friendly_name.clone();
            let key = name.to_lowercase();
            let path = self.ctx.paths.resolve_remote(&remote.path);
            self.watch(path.clone());

            if self
                .backoff
                .get(&key)
                .is_some_and(|b| Instant::now() < b.retry_at)
            {
                debug!(remote = %name, "remote still in backoff");
                continue;
            }

            self.emit(StatusEvent::SyncingRemote {
                remote: name.clone(),
            });
            let db = match self.ctx.handles.open(&path) {
                Ok(db) => db,
                Err(err) => {
                    self.failed(&key, &name, &err);
                    continue;
                }
            };
            if db.replica_id() != remote.replica {
                warn!(remote = %name, expected = %remote.replica, found = %db.replica_id(), "remote path holds a different store");
                self.emit(StatusEvent::GeneralError {
                    message: format!(
                        "remote '{name}' at {} is a different store than the one remembered",
                        path.display()
                    ),
                });
                continue;
            }
            self.backoff.remove(&key);
            self.emit(StatusEvent::RemoteGood {
                remote: name.clone(),
            });

            let options = self.options_for(db.replica_id());
            match self.ctx.engine.sync(&self.ctx.local, &db, &options) {
                Ok(report) => self.finished(&name, db.replica_id(), &report),
                Err(err) => self.emit(StatusEvent::GeneralError {
                    message: format!("sync with '{name}' failed: {err}"),
                }),
            }
        }
    }

    fn sync_admin(&mut self) {
        let Some(admin) = self.ctx.admin.clone() else {
            return;
        };
        self.emit(StatusEvent::SyncingRemote {
            remote: ADMIN_REMOTE.into(),
        });
        let options = self.options_for(admin.replica_id());
        match self
            .ctx
            .engine
            .reconcile_admin(&self.ctx.local, &admin, &options)
        {
            Ok(report) => self.finished(ADMIN_REMOTE, admin.replica_id(), &report),
            Err(err) => self.emit(StatusEvent::GeneralError {
                message: format!("admin reconciliation failed: {err}"),
            }),
        }
    }

    fn options_for(&self, peer: ReplicaId) -> SyncOptions {
        SyncOptions {
            exclude: self.ctx.blocked.blocked_for(peer),
            sink: Some(self.ctx.sink.clone()),
        }
    }

    fn failed(&mut self, key: &str, name: &str, err: &SyncError) {
        let now = Instant::now();
        let backoff = self.backoff.entry(key.to_string()).or_insert(Backoff {
            failures: 0,
            retry_at: now,
        });
        backoff.failures = backoff.failures.saturating_add(1);
        let delay = self.ctx.config.retry.delay_for_attempt(backoff.failures);
        backoff.retry_at = now + delay;
        warn!(remote = name, failures = backoff.failures, ?delay, error = %err, "remote unreachable");
        self.emit(StatusEvent::GeneralError {
            message: format!("remote '{name}' unreachable, retrying in {delay:?}: {err}"),
        });
    }

    fn finished(&self, name: &str, peer: ReplicaId, report: &SyncReport) {
        if report.has_conflicts() {
            self.ctx
                .blocked
                .block(peer, report.conflicts.iter().map(|c| c.product.clone()));
            self.ctx.sink.on_conflicts(name, &report.conflicts);
        }
        self.emit(StatusEvent::SyncRemoteFinished {
            remote: name.to_string(),
            applied: report.applied_count,
            conflicts: report.conflict_count(),
        });
    }

    fn watch(&mut self, target: PathBuf) {
        let Some(monitor) = self.ctx.monitor.clone() else {
            return;
        };
        if !self.watched.insert(target.clone()) {
            return;
        }
        let request = WatchRequest {
            target: target.clone(),
            silence: self.ctx.config.watch_silence,
        };
        match monitor.watch(request, self.waker.clone()) {
            Ok(id) => self.watches.push(id),
            Err(err) => {
                warn!(target = %target.display(), error = %err, "cannot watch location");
                self.watched.remove(&target);
            }
        }
    }

    fn unwatch_all(&mut self) {
        let Some(monitor) = self.ctx.monitor.clone() else {
            return;
        };
        for id in self.watches.drain(..) {
            if let Err(err) = monitor.unwatch(id) {
                debug!(?id, error = %err, "unwatch failed");
            }
        }
        self.watched.clear();
    }

    fn emit(&self, event: StatusEvent) {
        self.ctx.sink.on_status(&event);
    }
}

/// Empties the channel. Returns true if a shutdown was queued.
fn drain(rx: &Receiver<SchedulerCommand>) -> bool {
    while let Ok(command) = rx.try_recv() {
        if matches!(command, SchedulerCommand::Shutdown) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn blocked_products_per_peer() {
        let blocked = BlockedProducts::new();
        let (a, b) = (ReplicaId::generate(), ReplicaId::generate());
        let key = ProductKey::new("App", "1", "k");
        blocked.block(a, [key.clone()]);

        assert!(blocked.is_blocked(a, &key));
        assert!(!blocked.is_blocked(b, &key));
        assert!(blocked.unblock(a, &key));
        assert!(!blocked.unblock(a, &key));
        assert!(blocked.blocked_for(a).is_empty());
    }

    #[test]
    fn callback_waker_counts() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let waker = Waker::from_fn(WakeReason::Monitor, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(waker.wake());
        assert!(waker.clone().wake());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn channel_waker_reports_disconnect() {
        let (tx, rx) = mpsc::channel();
        let waker = Waker::channel(tx, WakeReason::Manual);
        assert!(waker.wake());
        assert!(matches!(
            rx.try_recv(),
            Ok(SchedulerCommand::Wake(WakeReason::Manual))
        ));
        drop(rx);
        assert!(!waker.wake());
    }

    #[test]
    fn drain_spots_shutdown() {
        let (tx, rx) = mpsc::channel();
        tx.send(SchedulerCommand::Wake(WakeReason::LocalChange)).unwrap();
        tx.send(SchedulerCommand::Shutdown).unwrap();
        assert!(drain(&rx));
        tx.send(SchedulerCommand::Wake(WakeReason::Monitor)).unwrap();
        assert!(!drain(&rx));
    }
}
