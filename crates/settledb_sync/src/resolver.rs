//! Conflict resolution.
//!
//! A resolved value gets one fresh entry, written to both replicas, whose
//! origin is [`ReplicaId::SYNC_RESOLVER`]. Both replicas then share it as
//! their current entry, so the next pass sees them in sync.

use crate::conflict::{Conflict, ConflictProduct, ResolutionChoice, Resolutions};
use crate::engine::{SyncEngine, SyncReport};
use crate::error::{SyncError, SyncResult};
use settledb_core::{Database, Mutation, ProductNamespace, ReplicaId, ValueCell, ValueEntry};
use std::fmt;
use tracing::{debug, info};

/// Outcome of applying resolutions.
#[derive(Debug, Clone, Default)]
pub struct ResolveReport {
    /// Values written to both sides.
    pub resolved: usize,
    /// Values whose cells moved on since the conflict was reported.
    pub stale: usize,
    /// Conflicts still waiting: no choice given, or stale.
    pub pending: Vec<ConflictProduct>,
}

impl ResolveReport {
    /// True if nothing is left pending.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

impl SyncEngine {
    /// Applies `resolutions` to `conflicts` reported by a pass between
    /// `source` and `target`.
    ///
    /// A conflict is resolved only if both current entries are still the
    /// ones recorded in it.
    pub fn resolve(
        &self,
        source: &Database,
        target: &Database,
        conflicts: &[ConflictProduct],
        resolutions: &Resolutions,
    ) -> SyncResult<ResolveReport> {
        let a = source.begin_engine()?;
        let b = target.begin_engine()?;
        let (ida, idb) = (a.replica_id(), b.replica_id());
        let now = a.now().max(b.now());

        let mut report = ResolveReport::default();
        for group in conflicts {
            let key = &group.product;
            let pa = a.product(key);
            let pb = b.product(key);
            let mut to_a = Vec::new();
            let mut to_b = Vec::new();
            let mut still = Vec::new();

            for conflict in &group.conflicts {
                let Some(choice) = resolutions.get(key, &conflict.name) else {
                    still.push(conflict.clone());
                    continue;
                };
                if !is_fresh(pa.as_ref(), pb.as_ref(), conflict) {
                    debug!(product = %key, name = %conflict.name, "conflict moved on, keeping it pending");
                    report.stale += 1;
                    still.push(conflict.clone());
                    continue;
                }

                let chosen = match choice {
                    ResolutionChoice::Local => &conflict.local,
                    ResolutionChoice::Remote => &conflict.remote,
                };
                let timestamp = now
                    .max(conflict.local.timestamp.next())
                    .max(conflict.remote.timestamp.next());
                let entry = ValueEntry::new(
                    chosen.data.clone(),
                    timestamp,
                    ReplicaId::SYNC_RESOLVER,
                    chosen.by.clone(),
                );
                let id = entry.id();

                for (batch, peer) in [(&mut to_a, idb), (&mut to_b, ida)] {
                    batch.push(Mutation::Receive {
                        product: key.clone(),
                        name: conflict.name.clone(),
                        entry: entry.clone(),
                    });
                    batch.push(Mutation::Marker {
                        product: key.clone(),
                        name: conflict.name.clone(),
                        peer,
                        id,
                    });
                    batch.push(Mutation::ClearPending {
                        peer,
                        product: key.clone(),
                        name: conflict.name.clone(),
                    });
                }
                report.resolved += 1;
            }

            b.commit(to_b)?;
            a.commit(to_a)?;
            if !still.is_empty() {
                report.pending.push(ConflictProduct {
                    product: key.clone(),
                    conflicts: still,
                });
            }
        }

        info!(
            resolved = report.resolved,
            stale = report.stale,
            pending = report.pending.len(),
            "conflicts resolved"
        );
        Ok(report)
    }
}

fn is_fresh(
    pa: Option<&ProductNamespace>,
    pb: Option<&ProductNamespace>,
    conflict: &Conflict,
) -> bool {
    let current = |ns: Option<&ProductNamespace>| {
        ns.and_then(|ns| ns.cell(&conflict.name))
            .and_then(ValueCell::current)
            .map(ValueEntry::id)
    };
    current(pa) == Some(conflict.local.id()) && current(pb) == Some(conflict.remote.id())
}

/// Where a conflict session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No conflicts outstanding.
    Clean,
    /// Conflicts reported and waiting for choices.
    ConflictsPending,
    /// Every conflict was resolved; call `finish`.
    Resolved,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Clean => "Clean",
            Self::ConflictsPending => "ConflictsPending",
            Self::Resolved => "Resolved",
        };
        f.write_str(name)
    }
}

/// Tracks the conflicts of one source/target pair through resolution.
///
/// ```text
/// Clean ──record(conflicts)──▶ ConflictsPending ──resolve(all)──▶ Resolved ──finish──▶ Clean
/// ```
#[derive(Debug, Clone)]
pub struct ConflictSession {
    state: SessionState,
    pending: Vec<ConflictProduct>,
    resolutions: Resolutions,
}

impl ConflictSession {
    /// Creates a clean session.
    pub fn new() -> Self {
        Self {
            state: SessionState::Clean,
            pending: Vec::new(),
            resolutions: Resolutions::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Conflicts waiting for resolution.
    pub fn pending(&self) -> &[ConflictProduct] {
        &self.pending
    }

    /// Choices recorded so far.
    pub fn resolutions(&self) -> &Resolutions {
        &self.resolutions
    }

    /// Takes the conflicts of a fresh pass. Replaces anything pending.
    pub fn record(&mut self, report: &SyncReport) {
        self.resolutions = Resolutions::new();
        self.pending = report.conflicts.clone();
        self.state = if self.pending.is_empty() {
            SessionState::Clean
        } else {
            SessionState::ConflictsPending
        };
    }

    /// Chooses a side for one pending conflict.
    pub fn choose(
        &mut self,
        product: &settledb_core::ProductKey,
        name: &str,
        choice: ResolutionChoice,
    ) -> SyncResult<()> {
        self.expect(SessionState::ConflictsPending, SessionState::ConflictsPending)?;
        let known = self
            .pending
            .iter()
            .filter(|group| &group.product == product)
            .any(|group| group.get(name).is_some());
        if !known {
            return Err(SyncError::not_found("conflict", name));
        }
        self.resolutions.choose(product, name, choice);
        Ok(())
    }

    /// Chooses the same side for every pending conflict.
    pub fn choose_all(&mut self, choice: ResolutionChoice) -> SyncResult<()> {
        self.expect(SessionState::ConflictsPending, SessionState::ConflictsPending)?;
        self.resolutions = Resolutions::choose_all(&self.pending, choice);
        Ok(())
    }

    /// Writes the chosen values to both replicas.
    ///
    /// Moves to `Resolved` once nothing is left pending.
    pub fn resolve(
        &mut self,
        engine: &SyncEngine,
        source: &Database,
        target: &Database,
    ) -> SyncResult<ResolveReport> {
        self.expect(SessionState::ConflictsPending, SessionState::Resolved)?;
        let report = engine.resolve(source, target, &self.pending, &self.resolutions)?;
        self.pending = report.pending.clone();
        if self.pending.is_empty() {
            self.state = SessionState::Resolved;
            self.resolutions = Resolutions::new();
        }
        Ok(report)
    }

    /// Returns a resolved session to `Clean`.
    pub fn finish(&mut self) -> SyncResult<()> {
        self.expect(SessionState::Resolved, SessionState::Clean)?;
        self.state = SessionState::Clean;
        Ok(())
    }

    fn expect(&self, required: SessionState, to: SessionState) -> SyncResult<()> {
        if self.state == required {
            Ok(())
        } else {
            Err(SyncError::invalid_state(self.state, to))
        }
    }
}

impl Default for ConflictSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SyncOptions;
    use settledb_core::{Config, ManualClock, ProductKey, Registration};
    use std::sync::Arc;

    fn product() -> ProductKey {
        ProductKey::new("Editor", "3", "c0ffee")
    }

    fn diverged() -> (Arc<ManualClock>, Database, Database, SyncReport) {
        let clock = Arc::new(ManualClock::new(5_000));
        let open = |author: &str| {
            let config = Config::new().clock(clock.clone()).author(author);
            let db = Database::open_in_memory_with_config(config).unwrap();
            db.register_product(&product(), Registration::User).unwrap();
            db
        };
        let local = open("alice");
        let remote = open("bob");
        local.set_string(&product(), "String1", "StringValueLocal").unwrap();
        clock.advance(3);
        remote.set_string(&product(), "String1", "StringValueRemote2").unwrap();
        let report = SyncEngine::new()
            .sync(&local, &remote, &SyncOptions::new())
            .unwrap();
        assert_eq!(report.conflict_count(), 1);
        (clock, local, remote, report)
    }

    #[test]
    fn local_choice_lands_on_both_sides() {
        let (_clock, local, remote, report) = diverged();
        let engine = SyncEngine::new();
        let choices = Resolutions::choose_all(&report.conflicts, ResolutionChoice::Local);

        let resolved = engine.resolve(&local, &remote, &report.conflicts, &choices).unwrap();
        assert_eq!(resolved.resolved, 1);
        assert!(resolved.is_complete());
        for db in [&local, &remote] {
            let entry = db.get_value(&product(), "String1").unwrap();
            assert_eq!(entry.origin, ReplicaId::SYNC_RESOLVER);
            assert_eq!(entry.by, "alice");
            assert_eq!(db.get_string(&product(), "String1").unwrap(), "StringValueLocal");
        }

        let after = engine.sync(&local, &remote, &SyncOptions::new()).unwrap();
        assert!(after.is_clean());
        assert_eq!(after.applied_count, 0);
    }

    #[test]
    fn resolved_entry_is_newer_than_both_sides() {
        let (clock, local, remote, report) = diverged();
        clock.set(1);
        let choices = Resolutions::choose_all(&report.conflicts, ResolutionChoice::Remote);
        SyncEngine::new()
            .resolve(&local, &remote, &report.conflicts, &choices)
            .unwrap();

        let entry = remote.get_value(&product(), "String1").unwrap();
        assert!(entry.timestamp > report.conflicts[0].conflicts[0].remote.timestamp);
        assert_eq!(local.get_string(&product(), "String1").unwrap(), "StringValueRemote2");
    }

    #[test]
    fn unchosen_and_stale_conflicts_stay_pending() {
        let (clock, local, remote, report) = diverged();
        let engine = SyncEngine::new();

        let none = engine
            .resolve(&local, &remote, &report.conflicts, &Resolutions::new())
            .unwrap();
        assert_eq!(none.pending.len(), 1);

        clock.advance(10);
        local.set_string(&product(), "String1", "moved on").unwrap();
        let choices = Resolutions::choose_all(&report.conflicts, ResolutionChoice::Remote);
        let stale = engine.resolve(&local, &remote, &report.conflicts, &choices).unwrap();
        assert_eq!(stale.stale, 1);
        assert_eq!(local.get_string(&product(), "String1").unwrap(), "moved on");
    }

    #[test]
    fn session_walks_its_states() {
        let (_clock, local, remote, report) = diverged();
        let engine = SyncEngine::new();
        let mut session = ConflictSession::new();
        assert!(session.finish().is_err());

        session.record(&report);
        assert_eq!(session.state(), SessionState::ConflictsPending);
        assert!(session
            .choose(&product(), "Nope", ResolutionChoice::Local)
            .unwrap_err()
            .is_not_found());
        session
            .choose(&product(), "string1", ResolutionChoice::Remote)
            .unwrap();

        let resolved = session.resolve(&engine, &local, &remote).unwrap();
        assert_eq!(resolved.resolved, 1);
        assert_eq!(session.state(), SessionState::Resolved);
        assert!(matches!(
            session.choose_all(ResolutionChoice::Local),
            Err(SyncError::InvalidState { .. })
        ));
        session.finish().unwrap();
        assert_eq!(session.state(), SessionState::Clean);
    }

    #[test]
    fn delete_against_set_resolves_to_tombstone() {
        let clock = Arc::new(ManualClock::new(100));
        let open = || {
            let db = Database::open_in_memory_with_config(Config::new().clock(clock.clone())).unwrap();
            db.register_product(&product(), Registration::User).unwrap();
            db
        };
        let (local, remote) = (open(), open());
        let engine = SyncEngine::new();
        local.set_dword(&product(), "Count", 1).unwrap();
        engine.sync(&local, &remote, &SyncOptions::new()).unwrap();

        clock.advance(5);
        local.delete_value(&product(), "Count").unwrap();
        clock.advance(5);
        remote.set_dword(&product(), "Count", 2).unwrap();
        let report = engine.sync(&local, &remote, &SyncOptions::new()).unwrap();
        assert_eq!(report.conflict_count(), 1);

        let choices = Resolutions::choose_all(&report.conflicts, ResolutionChoice::Local);
        engine.resolve(&local, &remote, &report.conflicts, &choices).unwrap();
        assert!(remote.get_dword(&product(), "Count").unwrap_err().is_not_found());
    }
}
