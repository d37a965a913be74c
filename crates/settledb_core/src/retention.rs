//! History retention policies.
//!
//! Histories grow without bound. A policy picks entries a compaction pass may
//! drop. The current entry is never dropped, and per-peer markers survive a
//! purge, so a peer that has not moved since the last pass still
//! fast-forwards.

use crate::cell::ValueCell;
use crate::types::EntryId;
use crate::value::ValueEntry;
use std::fmt::Debug;

/// Chooses which history entries may be purged.
pub trait RetentionPolicy: Send + Sync + Debug {
    /// Returns ids of entries in `cell` to drop.
    fn select(&self, cell: &ValueCell) -> Vec<EntryId>;
}

/// Keeps everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAll;

impl RetentionPolicy for KeepAll {
    fn select(&self, _cell: &ValueCell) -> Vec<EntryId> {
        Vec::new()
    }
}

/// Drops matched entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct PurgeMatched;

impl RetentionPolicy for PurgeMatched {
    fn select(&self, cell: &ValueCell) -> Vec<EntryId> {
        cell.raw_history()
            .iter()
            .filter(|e| e.matched)
            .map(ValueEntry::id)
            .collect()
    }
}

/// Keeps the newest `n` visible entries and drops everything older.
#[derive(Debug, Clone, Copy)]
pub struct KeepLast(pub usize);

impl RetentionPolicy for KeepLast {
    fn select(&self, cell: &ValueCell) -> Vec<EntryId> {
        let keep = self.0.max(1);
        let visible: Vec<_> = cell.visible_history().collect();
        let Some(oldest_kept) = visible.len().checked_sub(keep).map(|i| visible[i].id()) else {
            return Vec::new();
        };
        cell.raw_history()
            .iter()
            .filter(|e| e.id() < oldest_kept)
            .map(ValueEntry::id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeSeq, ReplicaId, Timestamp};
    use crate::value::ValueData;

    fn cell_of(n: u64) -> ValueCell {
        let origin = ReplicaId::generate();
        let mut cell = ValueCell::new("n");
        for ts in 1..=n {
            cell.push(
                ValueEntry::new(ValueData::Qword(ts), Timestamp(ts), origin, "t"),
                ChangeSeq(ts),
            );
        }
        cell
    }

    #[test]
    fn keep_all_keeps_all() {
        assert!(KeepAll.select(&cell_of(5)).is_empty());
    }

    #[test]
    fn keep_last_drops_oldest() {
        let cell = cell_of(5);
        let dropped = KeepLast(2).select(&cell);
        assert_eq!(dropped.len(), 3);
        assert_eq!(dropped[0].timestamp, Timestamp(1));
        assert!(KeepLast(10).select(&cell).is_empty());
        // Zero is treated as one so the current entry survives.
        assert_eq!(KeepLast(0).select(&cell).len(), 4);
    }

    #[test]
    fn purge_matched_only_touches_matched() {
        let mut cell = cell_of(3);
        let first = cell.raw_history()[0].id();
        cell.mark_matched(&[first]);
        assert_eq!(PurgeMatched.select(&cell), vec![first]);
    }
}
