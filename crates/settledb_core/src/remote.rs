//! The remote registry table kept inside a local store.

use crate::product::fold_name;
use crate::types::ReplicaId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A remembered remote database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Name the user knows the remote by. Unique, case-insensitive.
    pub friendly_name: String,
    /// Where the remote lives.
    pub path: PathBuf,
    /// Whether automatic sync includes this remote.
    pub sync_by_default: bool,
    /// Replica id of the remote, recorded when it was remembered.
    pub replica: ReplicaId,
}

/// Remembered remotes in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteTable {
    entries: Vec<RemoteEntry>,
}

impl RemoteTable {
    /// Looks up a remote by friendly name.
    #[must_use]
    pub fn get(&self, friendly_name: &str) -> Option<&RemoteEntry> {
        let key = fold_name(friendly_name);
        self.entries
            .iter()
            .find(|e| fold_name(&e.friendly_name) == key)
    }

    /// Looks up a remote by replica id.
    #[must_use]
    pub fn by_replica(&self, replica: ReplicaId) -> Option<&RemoteEntry> {
        self.entries.iter().find(|e| e.replica == replica)
    }

    /// Inserts or replaces by friendly name. Returns true if it was new.
    pub(crate) fn upsert(&mut self, entry: RemoteEntry) -> bool {
        let key = fold_name(&entry.friendly_name);
        match self
            .entries
            .iter_mut()
            .find(|e| fold_name(&e.friendly_name) == key)
        {
            Some(existing) => {
                *existing = entry;
                false
            }
            None => {
                self.entries.push(entry);
                true
            }
        }
    }

    pub(crate) fn remove(&mut self, friendly_name: &str) -> Option<RemoteEntry> {
        let key = fold_name(friendly_name);
        let idx = self
            .entries
            .iter()
            .position(|e| fold_name(&e.friendly_name) == key)?;
        Some(self.entries.remove(idx))
    }

    /// All entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[RemoteEntry] {
        &self.entries
    }

    /// Number of remembered remotes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(name: &str, path: &str) -> RemoteEntry {
        RemoteEntry {
            friendly_name: name.into(),
            path: path.into(),
            sync_by_default: true,
            replica: ReplicaId::generate(),
        }
    }

    #[test]
    fn upsert_replaces_by_folded_name() {
        let mut table = RemoteTable::default();
        assert!(table.upsert(remote("Usb", "/a")));
        assert!(table.upsert(remote("Share", "/b")));
        assert!(!table.upsert(remote("USB", "/c")));

        assert_eq!(table.len(), 2);
        assert_eq!(table.entries()[0].path, PathBuf::from("/c"));
        assert_eq!(table.get("usb").unwrap().friendly_name, "USB");
    }

    #[test]
    fn remove_keeps_order() {
        let mut table = RemoteTable::default();
        table.upsert(remote("a", "/a"));
        table.upsert(remote("b", "/b"));
        table.upsert(remote("c", "/c"));
        assert!(table.remove("B").is_some());
        assert!(table.remove("b").is_none());
        let names: Vec<_> = table
            .entries()
            .iter()
            .map(|e| e.friendly_name.as_str())
            .collect();
        assert_eq!(names, ["a", "c"]);
    }
}
