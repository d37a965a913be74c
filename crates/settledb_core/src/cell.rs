//! A named value and its history.

use crate::types::{ChangeSeq, EntryId, ReplicaId};
use crate::value::ValueEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One named value inside a product.
///
/// `history` is append-only and strictly increasing in [`EntryId`] order, so
/// the last element is always the current entry. Matched entries stay in the
/// history for containment checks but are hidden from callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueCell {
    name: String,
    history: Vec<ValueEntry>,
    /// Last entry known to be common with each peer.
    peers: BTreeMap<ReplicaId, EntryId>,
    changed_at: ChangeSeq,
}

impl ValueCell {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            history: Vec::new(),
            peers: BTreeMap::new(),
            changed_at: ChangeSeq::default(),
        }
    }

    /// Name as first written.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The latest entry, including tombstones.
    #[must_use]
    pub fn current(&self) -> Option<&ValueEntry> {
        self.history.last()
    }

    /// The latest entry unless it is a tombstone.
    #[must_use]
    pub fn current_live(&self) -> Option<&ValueEntry> {
        self.current().filter(|e| !e.is_deleted())
    }

    /// Every entry, matched ones included, oldest first.
    #[must_use]
    pub fn raw_history(&self) -> &[ValueEntry] {
        &self.history
    }

    /// Unmatched entries, oldest first.
    pub fn visible_history(&self) -> impl Iterator<Item = &ValueEntry> {
        self.history.iter().filter(|e| !e.matched)
    }

    /// Index of the entry with `id`.
    #[must_use]
    pub fn position(&self, id: EntryId) -> Option<usize> {
        // History is sorted by id.
        self.history.binary_search_by(|e| e.id().cmp(&id)).ok()
    }

    /// True if an entry with `id` is present, matched or not.
    #[must_use]
    pub fn contains(&self, id: EntryId) -> bool {
        self.position(id).is_some()
    }

    /// Last entry this replica knows to share with `peer`.
    #[must_use]
    pub fn peer_marker(&self, peer: ReplicaId) -> Option<EntryId> {
        self.peers.get(&peer).copied()
    }

    /// Change sequence of the last append.
    #[must_use]
    pub fn changed_at(&self) -> ChangeSeq {
        self.changed_at
    }

    /// Returns false when `entry` would break id ordering.
    pub(crate) fn accepts(&self, entry: &ValueEntry) -> bool {
        self.current().map_or(true, |last| entry.id() > last.id())
    }

    pub(crate) fn push(&mut self, entry: ValueEntry, seq: ChangeSeq) {
        self.history.push(entry);
        self.changed_at = seq;
    }

    /// Marks the given entries matched. Returns how many changed.
    pub(crate) fn mark_matched(&mut self, ids: &[EntryId]) -> usize {
        let mut changed = 0;
        for id in ids {
            if let Some(idx) = self.position(*id) {
                let entry = &mut self.history[idx];
                if !entry.matched {
                    entry.matched = true;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Removes the given entries, never the current one.
    pub(crate) fn purge(&mut self, ids: &[EntryId]) -> usize {
        let current = self.current().map(ValueEntry::id);
        let before = self.history.len();
        self.history
            .retain(|e| Some(e.id()) == current || !ids.contains(&e.id()));
        before - self.history.len()
    }

    pub(crate) fn set_peer_marker(&mut self, peer: ReplicaId, id: EntryId) {
        self.peers.insert(peer, id);
    }
}
