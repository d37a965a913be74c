//! In-memory store state and deterministic mutation apply.

use crate::cell::ValueCell;
use crate::error::{CoreError, CoreResult};
use crate::matcher::HistoryMatcher;
use crate::mutation::Mutation;
use crate::product::{fold_name, ProductKey, ProductNamespace};
use crate::remote::RemoteTable;
use crate::types::{ChangeSeq, DatabaseKind, ReplicaId};
use crate::value::ValueEntry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What one replica remembers about its last sync with a peer, per product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSyncState {
    /// This replica's change sequence when the pass finished.
    pub local_seq: ChangeSeq,
    /// The peer's change sequence when the pass finished.
    pub peer_seq: ChangeSeq,
    /// Case-folded names still in conflict with the peer.
    pub pending: BTreeSet<String>,
}

impl PeerSyncState {
    /// True if `name` is waiting on conflict resolution.
    #[must_use]
    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.contains(&fold_name(name))
    }
}

/// Everything a store holds.
#[derive(Debug, Clone)]
pub(crate) struct StoreState {
    pub replica: ReplicaId,
    pub kind: DatabaseKind,
    pub change_seq: ChangeSeq,
    pub products: BTreeMap<ProductKey, ProductNamespace>,
    pub peers: BTreeMap<(ReplicaId, ProductKey), PeerSyncState>,
    pub remotes: RemoteTable,
}

/// Serialized form of [`StoreState`], written by compaction.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    change_seq: ChangeSeq,
    products: Vec<ProductNamespace>,
    peers: Vec<PeerRecord>,
    remotes: RemoteTable,
}

#[derive(Debug, Serialize, Deserialize)]
struct PeerRecord {
    peer: ReplicaId,
    product: ProductKey,
    state: PeerSyncState,
}

/// Pre-images of everything a batch touches.
#[derive(Debug)]
pub(crate) struct Undo {
    change_seq: ChangeSeq,
    products: Vec<(ProductKey, Option<ProductNamespace>)>,
    peers: Vec<((ReplicaId, ProductKey), Option<PeerSyncState>)>,
    remotes: Option<RemoteTable>,
}

impl StoreState {
    pub fn new(replica: ReplicaId, kind: DatabaseKind) -> Self {
        Self {
            replica,
            kind,
            change_seq: ChangeSeq::default(),
            products: BTreeMap::new(),
            peers: BTreeMap::new(),
            remotes: RemoteTable::default(),
        }
    }

    pub fn product(&self, key: &ProductKey) -> Option<&ProductNamespace> {
        self.products.get(key)
    }

    pub fn cell(&self, key: &ProductKey, name: &str) -> Option<&ValueCell> {
        self.products.get(key)?.cell(name)
    }

    pub fn peer_state(&self, peer: ReplicaId, product: &ProductKey) -> Option<&PeerSyncState> {
        self.peers.get(&(peer, product.clone()))
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            change_seq: self.change_seq,
            products: self.products.values().cloned().collect(),
            peers: self
                .peers
                .iter()
                .map(|((peer, product), state)| PeerRecord {
                    peer: *peer,
                    product: product.clone(),
                    state: state.clone(),
                })
                .collect(),
            remotes: self.remotes.clone(),
        }
    }

    pub fn restore_snapshot(&mut self, snapshot: Snapshot) {
        self.change_seq = snapshot.change_seq;
        self.products = snapshot
            .products
            .into_iter()
            .map(|ns| (ns.key().clone(), ns))
            .collect();
        self.peers = snapshot
            .peers
            .into_iter()
            .map(|r| ((r.peer, r.product), r.state))
            .collect();
        self.remotes = snapshot.remotes;
    }

    /// Applies a batch atomically: on error nothing is changed.
    ///
    /// On success the returned [`Undo`] can still roll the batch back, which
    /// the database does when the journal write fails.
    pub fn apply_batch(&mut self, batch: &[Mutation]) -> CoreResult<Undo> {
        let undo = self.capture(batch);
        for mutation in batch {
            if let Err(err) = self.apply(mutation) {
                self.rollback(undo);
                return Err(err);
            }
        }
        Ok(undo)
    }

    pub fn rollback(&mut self, undo: Undo) {
        self.change_seq = undo.change_seq;
        for (key, ns) in undo.products {
            match ns {
                Some(ns) => {
                    self.products.insert(key, ns);
                }
                None => {
                    self.products.remove(&key);
                }
            }
        }
        for (key, state) in undo.peers {
            match state {
                Some(state) => {
                    self.peers.insert(key, state);
                }
                None => {
                    self.peers.remove(&key);
                }
            }
        }
        if let Some(remotes) = undo.remotes {
            self.remotes = remotes;
        }
    }

    fn capture(&self, batch: &[Mutation]) -> Undo {
        let mut products = BTreeSet::new();
        let mut peers = BTreeSet::new();
        let mut remotes = false;
        for mutation in batch {
            if let Some(product) = mutation.product() {
                products.insert(product.clone());
            }
            match mutation {
                Mutation::PeerState { peer, product, .. }
                | Mutation::ClearPending { peer, product, .. } => {
                    peers.insert((*peer, product.clone()));
                }
                Mutation::RememberRemote(_) | Mutation::ForgetRemote { .. } => remotes = true,
                _ => {}
            }
        }
        Undo {
            change_seq: self.change_seq,
            products: products
                .into_iter()
                .map(|key| {
                    let ns = self.products.get(&key).cloned();
                    (key, ns)
                })
                .collect(),
            peers: peers
                .into_iter()
                .map(|key| {
                    let state = self.peers.get(&key).cloned();
                    (key, state)
                })
                .collect(),
            remotes: remotes.then(|| self.remotes.clone()),
        }
    }

    fn apply(&mut self, mutation: &Mutation) -> CoreResult<()> {
        match mutation {
            Mutation::Register {
                product,
                scope,
                registered,
            } => {
                self.namespace_mut(product)
                    .set_registered(*scope, *registered);
            }
            Mutation::Append {
                product,
                name,
                entry,
            } => self.append(product, name, entry, false)?,
            Mutation::Receive {
                product,
                name,
                entry,
            } => self.append(product, name, entry, true)?,
            Mutation::Purge { product, name, ids } => {
                self.existing_cell_mut(product, name)?.purge(ids);
            }
            Mutation::Marker {
                product,
                name,
                peer,
                id,
            } => {
                let cell = self.existing_cell_mut(product, name)?;
                if !cell.contains(*id) {
                    return Err(CoreError::invalid_argument(format!(
                        "marker {id} is not in the history of '{name}'"
                    )));
                }
                cell.set_peer_marker(*peer, *id);
            }
            Mutation::PeerState {
                peer,
                product,
                peer_seq,
                pending,
            } => {
                let state = PeerSyncState {
                    local_seq: self.change_seq,
                    peer_seq: *peer_seq,
                    pending: pending.clone(),
                };
                self.peers.insert((*peer, product.clone()), state);
            }
            Mutation::ClearPending {
                peer,
                product,
                name,
            } => {
                if let Some(state) = self.peers.get_mut(&(*peer, product.clone())) {
                    state.pending.remove(&fold_name(name));
                }
            }
            Mutation::RememberRemote(entry) => {
                self.remotes.upsert(entry.clone());
            }
            Mutation::ForgetRemote { friendly_name } => {
                self.remotes.remove(friendly_name);
            }
        }
        Ok(())
    }

    fn append(
        &mut self,
        product: &ProductKey,
        name: &str,
        entry: &ValueEntry,
        matching: bool,
    ) -> CoreResult<()> {
        if name.is_empty() {
            return Err(CoreError::invalid_argument("value name must not be empty"));
        }
        let seq = self.change_seq.next();
        let cell = self.namespace_mut(product).cell_mut_or_insert(name);
        if !cell.accepts(entry) {
            return Err(CoreError::invalid_argument(format!(
                "entry {} does not extend the history of '{name}'",
                entry.id()
            )));
        }
        if matching {
            let superseded = HistoryMatcher::superseded_by(cell, entry);
            cell.mark_matched(&superseded);
        }
        cell.push(entry.clone(), seq);
        self.change_seq = seq;
        Ok(())
    }

    fn namespace_mut(&mut self, key: &ProductKey) -> &mut ProductNamespace {
        self.products
            .entry(key.clone())
            .or_insert_with(|| ProductNamespace::new(key.clone()))
    }

    fn existing_cell_mut(&mut self, key: &ProductKey, name: &str) -> CoreResult<&mut ValueCell> {
        self.products
            .get_mut(key)
            .and_then(|ns| ns.cell_mut(name))
            .ok_or_else(|| CoreError::not_found("value", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::Registration;
    use crate::types::Timestamp;
    use crate::value::{ValueData, ValueEntry};

    fn key() -> ProductKey {
        ProductKey::new("App", "1", "k")
    }

    fn append(origin: ReplicaId, name: &str, ts: u64) -> Mutation {
        Mutation::Append {
            product: key(),
            name: name.into(),
            entry: ValueEntry::new(ValueData::Qword(ts), Timestamp(ts), origin, "t"),
        }
    }

    #[test]
    fn appends_bump_change_seq() {
        let me = ReplicaId::generate();
        let mut state = StoreState::new(me, DatabaseKind::Local);
        state
            .apply_batch(&[append(me, "a", 1), append(me, "b", 1), append(me, "a", 2)])
            .unwrap();
        assert_eq!(state.change_seq, ChangeSeq(3));
        assert_eq!(state.cell(&key(), "A").unwrap().changed_at(), ChangeSeq(3));
        assert_eq!(state.cell(&key(), "b").unwrap().changed_at(), ChangeSeq(2));
        // Appends alone do not register the product.
        assert!(!state.product(&key()).unwrap().is_current());
    }

    #[test]
    fn failed_batch_changes_nothing() {
        let me = ReplicaId::generate();
        let mut state = StoreState::new(me, DatabaseKind::Local);
        state.apply_batch(&[append(me, "a", 5)]).unwrap();

        let err = state
            .apply_batch(&[
                Mutation::Register {
                    product: key(),
                    scope: Registration::User,
                    registered: true,
                },
                append(me, "b", 1),
                append(me, "a", 4),
            ])
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
        assert_eq!(state.change_seq, ChangeSeq(1));
        assert!(state.cell(&key(), "b").is_none());
        assert!(!state.product(&key()).unwrap().is_current());
    }

    #[test]
    fn receive_matches_equal_entries_from_other_origins() {
        let me = ReplicaId::generate();
        let peer = ReplicaId::generate();
        let mut state = StoreState::new(me, DatabaseKind::Local);
        let blob = |ts: u64, origin| ValueEntry::new(ValueData::Blob(vec![7]), Timestamp(ts), origin, "t");
        state
            .apply_batch(&[Mutation::Append {
                product: key(),
                name: "b".into(),
                entry: blob(1, me),
            }])
            .unwrap();
        state
            .apply_batch(&[Mutation::Receive {
                product: key(),
                name: "b".into(),
                entry: blob(2, peer),
            }])
            .unwrap();
        let cell = state.cell(&key(), "b").unwrap();
        assert_eq!(cell.raw_history().len(), 2);
        assert_eq!(cell.visible_history().count(), 1);
        assert_eq!(cell.current().unwrap().origin, peer);
    }

    #[test]
    fn rollback_after_success() {
        let me = ReplicaId::generate();
        let mut state = StoreState::new(me, DatabaseKind::Local);
        let undo = state.apply_batch(&[append(me, "a", 1)]).unwrap();
        state.rollback(undo);
        assert!(state.product(&key()).is_none());
        assert_eq!(state.change_seq, ChangeSeq(0));
    }

    #[test]
    fn peer_state_takes_local_seq_at_apply() {
        let me = ReplicaId::generate();
        let peer = ReplicaId::generate();
        let mut state = StoreState::new(me, DatabaseKind::Local);
        state
            .apply_batch(&[
                append(me, "a", 1),
                Mutation::PeerState {
                    peer,
                    product: key(),
                    peer_seq: ChangeSeq(7),
                    pending: BTreeSet::from(["a".to_string()]),
                },
            ])
            .unwrap();
        let ps = state.peer_state(peer, &key()).unwrap();
        assert_eq!(ps.local_seq, ChangeSeq(1));
        assert!(ps.is_pending("A"));

        state
            .apply_batch(&[Mutation::ClearPending {
                peer,
                product: key(),
                name: "A".into(),
            }])
            .unwrap();
        assert!(state.peer_state(peer, &key()).unwrap().pending.is_empty());
    }

    #[test]
    fn snapshot_restores_everything() {
        let me = ReplicaId::generate();
        let mut state = StoreState::new(me, DatabaseKind::Local);
        state.apply_batch(&[append(me, "a", 1)]).unwrap();
        let snapshot = state.to_snapshot();

        let mut fresh = StoreState::new(me, DatabaseKind::Local);
        fresh.restore_snapshot(snapshot);
        assert_eq!(fresh.change_seq, state.change_seq);
        assert!(fresh.cell(&key(), "a").is_some());
    }
}
