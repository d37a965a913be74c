//! In-process stand-ins for the scheduler's collaborators.

use parking_lot::{Condvar, Mutex};
use settledb_sync::{
    ChangeMonitor, ConflictProduct, DetectedProduct, LegacyLocator, StatusEvent, StatusSink,
    SyncError, SyncResult, WatchId, WatchRequest, Waker,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Locator that reports whatever the test put in it.
#[derive(Debug, Default)]
pub struct StaticLocator {
    products: Mutex<Vec<DetectedProduct>>,
    failure: Mutex<Option<String>>,
    calls: Mutex<usize>,
}

impl StaticLocator {
    /// Creates a locator reporting `products`.
    pub fn new(products: Vec<DetectedProduct>) -> Self {
        Self {
            products: Mutex::new(products),
            ..Self::default()
        }
    }

    /// Replaces what the next detection reports.
    pub fn set(&self, products: Vec<DetectedProduct>) {
        *self.products.lock() = products;
    }

    /// Makes detection fail with `message` until cleared with `None`.
    pub fn fail_with(&self, message: Option<&str>) {
        *self.failure.lock() = message.map(str::to_string);
    }

    /// Number of detections so far.
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

impl LegacyLocator for StaticLocator {
    fn detect(&self) -> SyncResult<Vec<DetectedProduct>> {
        *self.calls.lock() += 1;
        if let Some(message) = self.failure.lock().clone() {
            return Err(SyncError::Collaborator(message));
        }
        Ok(self.products.lock().clone())
    }
}

/// Change monitor the test fires by hand.
#[derive(Debug, Default)]
pub struct ManualChangeMonitor {
    watches: Mutex<BTreeMap<WatchId, (WatchRequest, Waker)>>,
    next_id: Mutex<u64>,
}

impl ManualChangeMonitor {
    /// Creates a monitor with no watches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths currently watched.
    pub fn watched(&self) -> Vec<PathBuf> {
        self.watches
            .lock()
            .values()
            .map(|(request, _)| request.target.clone())
            .collect()
    }

    /// Wakes every watch on `target` or one of its ancestors. Returns how
    /// many fired.
    pub fn trigger(&self, target: &Path) -> usize {
        let wakers: Vec<Waker> = self
            .watches
            .lock()
            .values()
            .filter(|(request, _)| target.starts_with(&request.target))
            .map(|(_, waker)| waker.clone())
            .collect();
        wakers.iter().filter(|w| w.wake()).count()
    }
}

impl ChangeMonitor for ManualChangeMonitor {
    fn watch(&self, request: WatchRequest, waker: Waker) -> SyncResult<WatchId> {
        let mut next = self.next_id.lock();
        *next += 1;
        let id = WatchId(*next);
        self.watches.lock().insert(id, (request, waker));
        Ok(id)
    }

    fn unwatch(&self, id: WatchId) -> SyncResult<()> {
        self.watches.lock().remove(&id);
        Ok(())
    }
}

/// Sink that keeps everything it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
    conflicts: Mutex<Vec<(String, Vec<ConflictProduct>)>>,
    changed: Condvar,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events so far.
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }

    /// Conflict notifications so far.
    pub fn conflicts(&self) -> Vec<(String, Vec<ConflictProduct>)> {
        self.conflicts.lock().clone()
    }

    /// Number of events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&StatusEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Blocks until at least `n` events match `predicate` or `timeout`
    /// passes. Returns whether the count was reached.
    pub fn wait_for(
        &self,
        n: usize,
        timeout: Duration,
        predicate: impl Fn(&StatusEvent) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        loop {
            if events.iter().filter(|e| predicate(e)).count() >= n {
                return true;
            }
            if self.changed.wait_until(&mut events, deadline).timed_out() {
                return events.iter().filter(|e| predicate(e)).count() >= n;
            }
        }
    }

    /// Forgets everything recorded.
    pub fn clear(&self) {
        self.events.lock().clear();
        self.conflicts.lock().clear();
    }
}

impl StatusSink for RecordingSink {
    fn on_status(&self, event: &StatusEvent) {
        self.events.lock().push(event.clone());
        self.changed.notify_all();
    }

    fn on_conflicts(&self, remote: &str, conflicts: &[ConflictProduct]) {
        self.conflicts
            .lock()
            .push((remote.to_string(), conflicts.to_vec()));
    }
}
