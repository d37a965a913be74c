//! Collapsing content-identical history entries.
//!
//! Two replicas that independently write the same content would otherwise
//! keep both entries visible forever. When an entry arrives whose content
//! equals older unmatched entries from other origins, those older entries
//! are marked matched: they stay in the raw history, so containment checks
//! still see them, but callers only see the newest one.

use crate::cell::ValueCell;
use crate::types::EntryId;
use crate::value::ValueEntry;

/// Stateless history matcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryMatcher;

impl HistoryMatcher {
    /// Entries of `cell` that `arrived` supersedes.
    ///
    /// Only unmatched entries older than `arrived`, from a different origin,
    /// with equal content qualify.
    #[must_use]
    pub fn superseded_by(cell: &ValueCell, arrived: &ValueEntry) -> Vec<EntryId> {
        let arrived_id = arrived.id();
        cell.raw_history()
            .iter()
            .filter(|e| {
                !e.matched
                    && e.id() < arrived_id
                    && e.origin != arrived.origin
                    && e.content_eq(arrived)
            })
            .map(ValueEntry::id)
            .collect()
    }

    /// Every entry of `cell` that a later equal entry from another origin
    /// supersedes, whether or not it is already marked.
    ///
    /// Used to check a history or rebuild match flags after a purge.
    #[must_use]
    pub fn full_scan(cell: &ValueCell) -> Vec<EntryId> {
        let history = cell.raw_history();
        history
            .iter()
            .enumerate()
            .filter(|(i, e)| {
                history[i + 1..]
                    .iter()
                    .any(|later| later.origin != e.origin && later.content_eq(e))
            })
            .map(|(_, e)| e.id())
            .collect()
    }

    /// Last-writer-wins choice between two entries.
    #[must_use]
    pub fn representative<'a>(a: &'a ValueEntry, b: &'a ValueEntry) -> &'a ValueEntry {
        if b.id() > a.id() {
            b
        } else {
            a
        }
    }
}
