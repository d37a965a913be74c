//! Per-cell sync decisions.
//!
//! A cell is compared by its current entry on each side and by the last point
//! the two sides share. That point is, in order of preference, one side's
//! current entry inside the other's raw history, the per-peer marker left by
//! the previous pass, or an entry both hold whose content the behind side
//! still carries. The decision is pure; the engine turns it into mutations.

use settledb_core::{EntryId, HistoryMatcher, ReplicaId, ValueCell, ValueEntry};

/// Which replica receives entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Source,
    Target,
}

/// What to do with one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CellPlan {
    /// Neither side has the cell.
    Absent,
    /// Both sides share the same current entry.
    InSync(EntryId),
    /// Append `entries` (oldest first) to `to`; afterwards both sides share
    /// `common`.
    Push {
        to: Side,
        entries: Vec<ValueEntry>,
        common: EntryId,
    },
    /// Diverged with different content.
    Conflict {
        local: ValueEntry,
        remote: ValueEntry,
    },
}

impl CellPlan {
    /// The entry both sides agree on once the plan is applied.
    pub(crate) fn common(&self) -> Option<EntryId> {
        match self {
            Self::InSync(id) | Self::Push { common: id, .. } => Some(*id),
            Self::Absent | Self::Conflict { .. } => None,
        }
    }
}

/// Decides one cell between `source` (replica `source_id`) and `target`
/// (replica `target_id`).
pub(crate) fn plan_cell(
    source: Option<&ValueCell>,
    target: Option<&ValueCell>,
    source_id: ReplicaId,
    target_id: ReplicaId,
) -> CellPlan {
    let src = source.filter(|c| c.current().is_some());
    let dst = target.filter(|c| c.current().is_some());

    let (a, b) = match (src, dst) {
        (None, None) => return CellPlan::Absent,
        (Some(a), None) => return copy_all(a, Side::Target),
        (None, Some(b)) => return copy_all(b, Side::Source),
        (Some(a), Some(b)) => (a, b),
    };
    let (Some(x), Some(y)) = (a.current(), b.current()) else {
        return CellPlan::Absent;
    };

    if x.id() == y.id() {
        if x.content_eq(y) {
            return CellPlan::InSync(x.id());
        }
        // Same identity, different bytes: never silently pick one.
        return CellPlan::Conflict {
            local: x.clone(),
            remote: y.clone(),
        };
    }

    match (b.position(x.id()), a.position(y.id())) {
        (Some(at), None) => CellPlan::Push {
            to: Side::Source,
            entries: suffix(b, at, a),
            common: y.id(),
        },
        (None, Some(at)) => CellPlan::Push {
            to: Side::Target,
            entries: suffix(a, at, b),
            common: x.id(),
        },
        _ if x.content_eq(y) => {
            let winner = HistoryMatcher::representative(x, y);
            let to = if winner.id() == x.id() {
                Side::Target
            } else {
                Side::Source
            };
            CellPlan::Push {
                to,
                entries: vec![winner.clone()],
                common: winner.id(),
            }
        }
        _ => {
            if let Some(entries) = fast_forward(a, b, a.peer_marker(target_id)) {
                CellPlan::Push {
                    to: Side::Source,
                    entries,
                    common: y.id(),
                }
            } else if let Some(entries) = fast_forward(b, a, b.peer_marker(source_id)) {
                CellPlan::Push {
                    to: Side::Target,
                    entries,
                    common: x.id(),
                }
            } else {
                CellPlan::Conflict {
                    local: x.clone(),
                    remote: y.clone(),
                }
            }
        }
    }
}

/// Entries of `ahead` that `behind` should append, if `behind` has not moved
/// since the last point the two shared.
///
/// `marker` is what `behind` recorded for `ahead` on the previous pass. When
/// it still names the current entry, nothing happened locally even if `ahead`
/// has since purged that entry. Otherwise a shared entry whose content every
/// later local entry repeats also counts: matching may have replaced the id
/// `ahead` knows with an equal copy from a third replica.
fn fast_forward(
    behind: &ValueCell,
    ahead: &ValueCell,
    marker: Option<EntryId>,
) -> Option<Vec<ValueEntry>> {
    let mine = behind.current()?;
    let theirs = ahead.current()?;
    if theirs.id() <= mine.id() {
        return None;
    }
    if marker != Some(mine.id()) && !unchanged_since_shared(behind, ahead, mine) {
        return None;
    }
    let entries: Vec<ValueEntry> = ahead
        .raw_history()
        .iter()
        .filter(|e| !e.matched && e.id() > mine.id() && !behind.contains(e.id()))
        .cloned()
        .collect();
    (!entries.is_empty()).then_some(entries)
}

fn unchanged_since_shared(behind: &ValueCell, ahead: &ValueCell, mine: &ValueEntry) -> bool {
    let history = behind.raw_history();
    ahead.raw_history().iter().rev().any(|shared| {
        behind
            .position(shared.id())
            .is_some_and(|at| history[at..].iter().all(|e| e.content_eq(mine)))
    })
}

fn copy_all(cell: &ValueCell, to: Side) -> CellPlan {
    let entries: Vec<ValueEntry> = cell.visible_history().cloned().collect();
    match entries.last().map(ValueEntry::id) {
        Some(common) => CellPlan::Push {
            to,
            entries,
            common,
        },
        None => CellPlan::Absent,
    }
}

/// Entries of `ahead` after index `at` that `behind` lacks, skipping matched
/// ones.
fn suffix(ahead: &ValueCell, at: usize, behind: &ValueCell) -> Vec<ValueEntry> {
    ahead.raw_history()[at + 1..]
        .iter()
        .filter(|e| !e.matched && !behind.contains(e.id()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use settledb_core::{
        Config, Database, ManualClock, ProductKey, Registration, ValueData,
    };
    use proptest::prelude::*;
    use std::sync::Arc;

    fn product() -> ProductKey {
        ProductKey::new("Viewer", "1", "pk")
    }

    fn replica(start: u64) -> Database {
        let clock = Arc::new(ManualClock::new(start));
        let db = Database::open_in_memory_with_config(Config::new().clock(clock).author("t")).unwrap();
        db.register_product(&product(), Registration::User).unwrap();
        db
    }

    fn id() -> ReplicaId {
        ReplicaId::generate()
    }

    fn cell(db: &Database, name: &str) -> Option<ValueCell> {
        let guard = db.begin_engine().unwrap();
        guard.product(&product()).and_then(|ns| ns.cell(name).cloned())
    }

    #[test]
    fn absent_everywhere() {
        assert_eq!(plan_cell(None, None, id(), id()), CellPlan::Absent);
    }

    #[test]
    fn first_sync_copies_visible_history() {
        let a = replica(10);
        a.set_dword(&product(), "Width", 1).unwrap();
        a.set_dword(&product(), "Width", 2).unwrap();
        let ca = cell(&a, "Width").unwrap();

        match plan_cell(Some(&ca), None, id(), id()) {
            CellPlan::Push {
                to,
                entries,
                common,
            } => {
                assert_eq!(to, Side::Target);
                assert_eq!(entries.len(), 2);
                assert_eq!(common, ca.current().unwrap().id());
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn same_current_is_in_sync() {
        let a = replica(10);
        a.set_string(&product(), "Theme", "dark").unwrap();
        let ca = cell(&a, "Theme").unwrap();
        let plan = plan_cell(Some(&ca), Some(&ca), id(), id());
        assert_eq!(plan, CellPlan::InSync(ca.current().unwrap().id()));
    }

    #[test]
    fn different_content_conflicts() {
        let a = replica(10);
        let b = replica(20);
        a.set_string(&product(), "String1", "StringValueLocal").unwrap();
        b.set_string(&product(), "String1", "StringValueRemote2").unwrap();
        let (ca, cb) = (cell(&a, "String1").unwrap(), cell(&b, "String1").unwrap());

        match plan_cell(Some(&ca), Some(&cb), a.replica_id(), b.replica_id()) {
            CellPlan::Conflict { local, remote } => {
                assert_eq!(local.data, ValueData::String("StringValueLocal".into()));
                assert_eq!(remote.data, ValueData::String("StringValueRemote2".into()));
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn equal_content_converges_on_newest() {
        let a = replica(10);
        let b = replica(20);
        a.set_blob(&product(), "Blob", vec![1, 2, 3]).unwrap();
        b.set_blob(&product(), "Blob", vec![1, 2, 3]).unwrap();
        let (ca, cb) = (cell(&a, "Blob").unwrap(), cell(&b, "Blob").unwrap());

        let plan = plan_cell(Some(&ca), Some(&cb), a.replica_id(), b.replica_id());
        assert_eq!(plan.common(), Some(cb.current().unwrap().id()));
        match plan {
            CellPlan::Push { to, entries, .. } => {
                assert_eq!(to, Side::Source);
                assert_eq!(entries.len(), 1);
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn deleted_on_one_side_only_conflicts() {
        let a = replica(10);
        let b = replica(20);
        a.set_bool(&product(), "Flag", true).unwrap();
        a.delete_value(&product(), "Flag").unwrap();
        b.set_bool(&product(), "Flag", false).unwrap();
        let (ca, cb) = (cell(&a, "Flag").unwrap(), cell(&b, "Flag").unwrap());
        assert!(matches!(plan_cell(Some(&ca), Some(&cb), a.replica_id(), b.replica_id()), CellPlan::Conflict { .. }));
    }

    #[test]
    fn edit_and_revert_is_still_a_change() {
        let clock = Arc::new(ManualClock::new(10));
        let open = || {
            let config = Config::new().clock(clock.clone()).author("t");
            let db = Database::open_in_memory_with_config(config).unwrap();
            db.register_product(&product(), Registration::User).unwrap();
            db
        };
        let (a, b) = (open(), open());
        a.set_dword(&product(), "Width", 1).unwrap();
        let shared = cell(&a, "Width").unwrap().current().unwrap().clone();
        {
            let guard = b.begin_engine().unwrap();
            guard
                .commit(vec![settledb_core::Mutation::Receive {
                    product: product(),
                    name: "Width".into(),
                    entry: shared,
                }])
                .unwrap();
        }
        clock.advance(1);
        a.set_dword(&product(), "Width", 2).unwrap();
        clock.advance(1);
        a.set_dword(&product(), "Width", 1).unwrap();
        clock.advance(1);
        b.set_dword(&product(), "Width", 3).unwrap();

        let (ca, cb) = (cell(&a, "Width").unwrap(), cell(&b, "Width").unwrap());
        let plan = plan_cell(Some(&ca), Some(&cb), a.replica_id(), b.replica_id());
        assert!(matches!(plan, CellPlan::Conflict { .. }));
    }

    fn mirrored(plan: CellPlan) -> CellPlan {
        match plan {
            CellPlan::Push { to, entries, common } => CellPlan::Push {
                to: match to {
                    Side::Source => Side::Target,
                    Side::Target => Side::Source,
                },
                entries,
                common,
            },
            CellPlan::Conflict { local, remote } => CellPlan::Conflict {
                local: remote,
                remote: local,
            },
            other => other,
        }
    }

    proptest! {
        #[test]
        fn plan_does_not_depend_on_direction(
            steps in prop::collection::vec((any::<bool>(), 0u32..3, any::<bool>()), 1..12)
        ) {
            let clock = Arc::new(ManualClock::new(1));
            let open = || {
                let config = Config::new().clock(clock.clone()).author("t");
                let db = Database::open_in_memory_with_config(config).unwrap();
                db.register_product(&product(), Registration::User).unwrap();
                db
            };
            let (a, b) = (open(), open());
            let engine = crate::SyncEngine::new();
            for (on_a, value, then_sync) in steps {
                let db = if on_a { &a } else { &b };
                db.set_dword(&product(), "Width", value).unwrap();
                clock.advance(1);
                if then_sync {
                    engine.sync(&a, &b, &crate::SyncOptions::new()).unwrap();
                }
            }

            let (ca, cb) = (cell(&a, "Width"), cell(&b, "Width"));
            let forward = plan_cell(ca.as_ref(), cb.as_ref(), a.replica_id(), b.replica_id());
            let backward = plan_cell(cb.as_ref(), ca.as_ref(), b.replica_id(), a.replica_id());
            prop_assert_eq!(mirrored(forward), backward);
        }
    }
}
