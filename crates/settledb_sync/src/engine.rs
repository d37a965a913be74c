//! Bidirectional sync between two replicas.
//!
//! A pass takes the engine guard on both databases, walks every product that
//! is current on either side and, per product, builds one mutation batch for
//! each side. The target batch is committed before the source batch; a crash
//! in between leaves the two peer-state records disagreeing, which makes the
//! next pass rescan the product in full.

use crate::conflict::{Conflict, ConflictProduct};
use crate::error::{SyncError, SyncResult};
use crate::plan::{plan_cell, CellPlan, Side};
use crate::status::{StatusEvent, StatusSink};
use parking_lot::Mutex;
use settledb_core::{
    ChangeSeq, Database, EngineGuard, EntryId, Mutation, PeerSyncState, ProductKey,
    ProductNamespace, Registration, ReplicaId, ValueCell,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-pass options.
#[derive(Clone, Default)]
pub struct SyncOptions {
    /// Products to leave untouched; reported as skipped.
    pub exclude: BTreeSet<ProductKey>,
    /// Receives per-product status events.
    pub sink: Option<Arc<dyn StatusSink>>,
}

impl SyncOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Excludes products from the pass.
    #[must_use]
    pub fn excluding(mut self, products: impl IntoIterator<Item = ProductKey>) -> Self {
        self.exclude.extend(products);
        self
    }

    /// Sets the status sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn emit(&self, event: StatusEvent) {
        if let Some(sink) = &self.sink {
            sink.on_status(&event);
        }
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("exclude", &self.exclude)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// A product that failed during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductError {
    /// Product that failed.
    pub product: ProductKey,
    /// Error text.
    pub message: String,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Entries appended on either side.
    pub applied_count: usize,
    /// Values left in conflict, grouped by product.
    pub conflicts: Vec<ConflictProduct>,
    /// Products excluded or registered on neither side.
    pub skipped: Vec<ProductKey>,
    /// Products that failed; the pass went on without them.
    pub product_errors: Vec<ProductError>,
    /// Products that were compared.
    pub products_synced: usize,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl SyncReport {
    /// True if any value is in conflict.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Number of values in conflict across all products.
    pub fn conflict_count(&self) -> usize {
        self.conflicts.iter().map(|p| p.conflicts.len()).sum()
    }

    /// True if nothing conflicted and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.product_errors.is_empty()
    }
}

/// Statistics about sync passes run by one engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes completed.
    pub passes_completed: u64,
    /// Entries appended across all passes.
    pub entries_applied: u64,
    /// Conflicting values reported across all passes.
    pub conflicts_found: u64,
    /// Per-product failures across all passes.
    pub product_errors: u64,
    /// When the last pass completed.
    pub last_sync_time: Option<Instant>,
    /// Last pass-level error.
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct ProductOutcome {
    applied: usize,
    conflicts: Vec<Conflict>,
}

/// Syncs pairs of replicas.
///
/// The engine never retries; a remote that cannot be opened is the caller's
/// concern.
#[derive(Debug, Default)]
pub struct SyncEngine {
    stats: Mutex<SyncStats>,
}

impl SyncEngine {
    /// Creates an engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics so far.
    pub fn stats(&self) -> SyncStats {
        self.stats.lock().clone()
    }

    /// Runs one bidirectional pass between `source` and `target`.
    ///
    /// Conflicts carry `source` content as `local` and `target` content as
    /// `remote`.
    ///
    /// # Errors
    ///
    /// - `Busy` if either database is held by another pass
    /// - `InvalidArgument` if both handles are the same replica
    pub fn sync(
        &self,
        source: &Database,
        target: &Database,
        options: &SyncOptions,
    ) -> SyncResult<SyncReport> {
        let result = self.run_pass(source, target, options);
        self.record(&result);
        result
    }

    fn run_pass(
        &self,
        source: &Database,
        target: &Database,
        options: &SyncOptions,
    ) -> SyncResult<SyncReport> {
        if source.replica_id() == target.replica_id() {
            return Err(SyncError::invalid_argument(
                "cannot sync a replica with itself",
            ));
        }
        let started = Instant::now();
        let a = source.begin_engine()?;
        let b = target.begin_engine()?;
        let peer = b.replica_id();
        info!(source = %a.replica_id(), target = %peer, "sync pass started");

        let keys: BTreeSet<ProductKey> = a
            .product_keys()
            .into_iter()
            .chain(b.product_keys())
            .collect();

        let mut report = SyncReport::default();
        for key in keys {
            if options.exclude.contains(&key) {
                debug!(product = %key, "product excluded from pass");
                report.skipped.push(key);
                continue;
            }
            let pa = a.product(&key);
            let pb = b.product(&key);
            let current = |ns: &Option<ProductNamespace>| ns.as_ref().is_some_and(ProductNamespace::is_current);
            if !current(&pa) && !current(&pb) {
                report.skipped.push(key);
                continue;
            }

            options.emit(StatusEvent::SyncingProduct {
                peer,
                product: key.clone(),
            });
            match sync_product(&a, &b, &key, pa.as_ref(), pb.as_ref()) {
                Ok(outcome) => {
                    options.emit(StatusEvent::SyncProductFinished {
                        peer,
                        product: key.clone(),
                        applied: outcome.applied,
                        conflicts: outcome.conflicts.len(),
                    });
                    report.applied_count += outcome.applied;
                    report.products_synced += 1;
                    if !outcome.conflicts.is_empty() {
                        report.conflicts.push(ConflictProduct {
                            product: key,
                            conflicts: outcome.conflicts,
                        });
                    }
                }
                Err(err) => {
                    warn!(product = %key, error = %err, "product sync failed");
                    options.emit(StatusEvent::ProductError {
                        product: key.clone(),
                        message: err.to_string(),
                    });
                    report.product_errors.push(ProductError {
                        product: key,
                        message: err.to_string(),
                    });
                }
            }
        }

        report.duration = started.elapsed();
        info!(
            applied = report.applied_count,
            conflicts = report.conflict_count(),
            skipped = report.skipped.len(),
            errors = report.product_errors.len(),
            "sync pass finished"
        );
        Ok(report)
    }

    /// Copies admin registration flags from `admin` into `local`, then syncs
    /// the admin-registered products between them.
    pub fn reconcile_admin(
        &self,
        local: &Database,
        admin: &Database,
        options: &SyncOptions,
    ) -> SyncResult<SyncReport> {
        let others = {
            let l = local.begin_engine()?;
            let ad = admin.begin_engine()?;
            let keys: BTreeSet<ProductKey> = l
                .product_keys()
                .into_iter()
                .chain(ad.product_keys())
                .collect();

            let mut batch = Vec::new();
            let mut others = Vec::new();
            for key in keys {
                let wanted = ad
                    .product(&key)
                    .is_some_and(|ns| ns.is_registered(Registration::Admin));
                let present = l
                    .product(&key)
                    .is_some_and(|ns| ns.is_registered(Registration::Admin));
                if wanted != present {
                    batch.push(Mutation::Register {
                        product: key.clone(),
                        scope: Registration::Admin,
                        registered: wanted,
                    });
                }
                if !wanted {
                    others.push(key);
                }
            }
            if !batch.is_empty() {
                info!(changes = batch.len(), "admin registrations reconciled");
            }
            l.commit(batch)?;
            others
        };

        let options = options.clone().excluding(others);
        self.sync(local, admin, &options)
    }

    fn record(&self, result: &SyncResult<SyncReport>) {
        let mut stats = self.stats.lock();
        match result {
            Ok(report) => {
                stats.passes_completed += 1;
                stats.entries_applied += report.applied_count as u64;
                stats.conflicts_found += report.conflict_count() as u64;
                stats.product_errors += report.product_errors.len() as u64;
                stats.last_sync_time = Some(Instant::now());
            }
            Err(err) => stats.last_error = Some(err.to_string()),
        }
    }
}

fn sync_product(
    a: &EngineGuard<'_>,
    b: &EngineGuard<'_>,
    key: &ProductKey,
    pa: Option<&ProductNamespace>,
    pb: Option<&ProductNamespace>,
) -> SyncResult<ProductOutcome> {
    let (ida, idb) = (a.replica_id(), b.replica_id());
    let state_a = a.peer_state(idb, key);
    let state_b = b.peer_state(ida, key);
    let incremental = in_step(state_a.as_ref(), state_b.as_ref());
    let was_pending: BTreeSet<String> = state_a
        .iter()
        .chain(state_b.iter())
        .flat_map(|s| s.pending.iter().cloned())
        .collect();

    let mut to_a = Vec::new();
    let mut to_b = Vec::new();
    adopt_registration(pb, pa, key, &mut to_a);
    adopt_registration(pa, pb, key, &mut to_b);

    let mut outcome = ProductOutcome::default();
    let mut pending = BTreeSet::new();
    for (folded, name) in cell_names(pa, pb) {
        let ca = pa.and_then(|ns| ns.cell(&name));
        let cb = pb.and_then(|ns| ns.cell(&name));
        if incremental
            && !was_pending.contains(&folded)
            && unchanged(ca, state_a.as_ref())
            && unchanged(cb, state_b.as_ref())
        {
            continue;
        }

        let plan = plan_cell(ca, cb, ida, idb);
        let common = plan.common();
        match plan {
            CellPlan::Absent | CellPlan::InSync(_) => {}
            CellPlan::Push { to, entries, .. } => {
                let batch = match to {
                    Side::Source => &mut to_a,
                    Side::Target => &mut to_b,
                };
                batch.extend(entries.into_iter().map(|entry| Mutation::Receive {
                    product: key.clone(),
                    name: name.clone(),
                    entry,
                }));
            }
            CellPlan::Conflict { local, remote } => {
                debug!(product = %key, name = %name, "conflict detected");
                outcome.conflicts.push(Conflict {
                    name: name.clone(),
                    local,
                    remote,
                });
                pending.insert(folded);
            }
        }

        if let Some(common) = common {
            set_marker(ca, idb, common, key, &name, &mut to_a);
            set_marker(cb, ida, common, key, &name, &mut to_b);
        }
    }

    let applied_a = to_a.iter().filter(|m| m.is_append()).count();
    let applied_b = to_b.iter().filter(|m| m.is_append()).count();
    let next_a = ChangeSeq(a.change_seq().0 + applied_a as u64);
    let next_b = ChangeSeq(b.change_seq().0 + applied_b as u64);
    record_peer_state(state_a.as_ref(), idb, key, next_a, next_b, &pending, &mut to_a);
    record_peer_state(state_b.as_ref(), ida, key, next_b, next_a, &pending, &mut to_b);

    if applied_a + applied_b > 0 {
        debug!(product = %key, to_source = applied_a, to_target = applied_b, "entries exchanged");
    }
    b.commit(to_b)?;
    a.commit(to_a)?;

    outcome.applied = applied_a + applied_b;
    Ok(outcome)
}

/// Both records describe the same finished pass.
fn in_step(a: Option<&PeerSyncState>, b: Option<&PeerSyncState>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.local_seq == b.peer_seq && a.peer_seq == b.local_seq,
        _ => false,
    }
}

fn unchanged(cell: Option<&ValueCell>, state: Option<&PeerSyncState>) -> bool {
    match (cell, state) {
        (None, _) => true,
        (Some(cell), Some(state)) => cell.changed_at() <= state.local_seq,
        (Some(_), None) => false,
    }
}

/// Case-folded name to the first spelling seen, source side first.
fn cell_names(
    pa: Option<&ProductNamespace>,
    pb: Option<&ProductNamespace>,
) -> BTreeMap<String, String> {
    let mut names = BTreeMap::new();
    for ns in pa.into_iter().chain(pb) {
        for cell in ns.cells() {
            names
                .entry(cell.name().to_lowercase())
                .or_insert_with(|| cell.name().to_string());
        }
    }
    names
}

/// A replica that has never heard of a product picks up the user
/// registration. An explicit unregistration is left alone.
fn adopt_registration(
    from: Option<&ProductNamespace>,
    to: Option<&ProductNamespace>,
    key: &ProductKey,
    batch: &mut Vec<Mutation>,
) {
    let registered = from.is_some_and(|ns| ns.is_registered(Registration::User));
    if registered && to.is_none() {
        batch.push(Mutation::Register {
            product: key.clone(),
            scope: Registration::User,
            registered: true,
        });
    }
}

fn set_marker(
    cell: Option<&ValueCell>,
    peer: ReplicaId,
    common: EntryId,
    key: &ProductKey,
    name: &str,
    batch: &mut Vec<Mutation>,
) {
    if cell.and_then(|c| c.peer_marker(peer)) != Some(common) {
        batch.push(Mutation::Marker {
            product: key.clone(),
            name: name.to_string(),
            peer,
            id: common,
        });
    }
}

fn record_peer_state(
    previous: Option<&PeerSyncState>,
    peer: ReplicaId,
    key: &ProductKey,
    local_seq: ChangeSeq,
    peer_seq: ChangeSeq,
    pending: &BTreeSet<String>,
    batch: &mut Vec<Mutation>,
) {
    let next = PeerSyncState {
        local_seq,
        peer_seq,
        pending: pending.clone(),
    };
    if previous != Some(&next) {
        batch.push(Mutation::PeerState {
            peer,
            product: key.clone(),
            peer_seq,
            pending: pending.clone(),
        });
    }
}
