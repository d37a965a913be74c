//! Change feed for observing committed value writes.
//!
//! Every entry appended to a store, by a local write or by sync, produces one
//! [`ChangeEvent`] after its batch is durable. The autosync scheduler listens
//! here to react to local edits.
//!
//! ```rust
//! use settledb_core::{ChangeSource, Database, ProductKey, Registration};
//!
//! let db = Database::open_in_memory().unwrap();
//! let product = ProductKey::new("App", "1", "k");
//! db.register_product(&product, Registration::User).unwrap();
//!
//! let events = db.subscribe();
//! db.set_dword(&product, "Width", 800).unwrap();
//!
//! let event = events.try_recv().unwrap();
//! assert_eq!(event.name, "Width");
//! assert_eq!(event.source, ChangeSource::Local);
//! ```

use crate::product::ProductKey;
use crate::types::{ChangeSeq, EntryId};
use crate::value::ValueType;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Who caused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// A write through the database's own API.
    Local,
    /// An entry applied by sync or conflict resolution.
    Sync,
}

/// One appended entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Store change sequence after the append.
    pub seq: ChangeSeq,
    /// Product the value belongs to.
    pub product: ProductKey,
    /// Value name.
    pub name: String,
    /// Identity of the appended entry.
    pub entry: EntryId,
    /// Type of the appended entry; `Deleted` for a delete.
    pub value_type: ValueType,
    /// Who caused it.
    pub source: ChangeSource,
}

/// Distributes change events to subscribers and keeps a bounded backlog.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
    history: RwLock<Vec<ChangeEvent>>,
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a change feed with the default backlog.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates a change feed with a specific backlog limit.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Returns a receiver for all future events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends events to every live subscriber, dropping disconnected ones.
    pub fn emit_batch(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        {
            let mut history = self.history.write();
            history.extend(events.iter().cloned());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| events.iter().all(|e| tx.send(e.clone()).is_ok()));
    }

    /// Backlog events with `seq > cursor`, at most `limit` of them.
    #[must_use]
    pub fn poll(&self, cursor: ChangeSeq, limit: usize) -> Vec<ChangeEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.seq > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .field("max_history", &self.max_history)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ReplicaId, Timestamp};

    fn event(seq: u64) -> ChangeEvent {
        ChangeEvent {
            seq: ChangeSeq(seq),
            product: ProductKey::new("p", "1", "k"),
            name: format!("v{seq}"),
            entry: EntryId {
                timestamp: Timestamp(seq),
                origin: ReplicaId::generate(),
            },
            value_type: ValueType::Dword,
            source: ChangeSource::Local,
        }
    }

    #[test]
    fn subscribers_receive_in_order() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        feed.emit_batch(vec![event(1), event(2)]);
        assert_eq!(rx.recv().unwrap().seq, ChangeSeq(1));
        assert_eq!(rx.recv().unwrap().seq, ChangeSeq(2));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        let _keep = feed.subscribe();
        drop(rx);
        feed.emit_batch(vec![event(1)]);
        assert_eq!(feed.subscriber_count(), 1);
    }

    #[test]
    fn backlog_is_bounded() {
        let feed = ChangeFeed::with_max_history(2);
        feed.emit_batch((1..=5).map(event).collect());
        let backlog = feed.poll(ChangeSeq(0), 10);
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].seq, ChangeSeq(4));
        assert_eq!(feed.poll(ChangeSeq(4), 10).len(), 1);
    }
}
