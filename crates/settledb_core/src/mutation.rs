//! State changes, as they are journaled.

use crate::product::{ProductKey, Registration};
use crate::remote::RemoteEntry;
use crate::types::{ChangeSeq, EntryId, ReplicaId};
use crate::value::ValueEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One change to a store.
///
/// Every write, local or sync-driven, is expressed as a batch of mutations.
/// A batch is applied to memory and appended to the journal as one record,
/// so it becomes visible and durable as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Sets or clears one registration flag, creating the namespace if needed.
    Register {
        /// Product.
        product: ProductKey,
        /// Flag to change.
        scope: Registration,
        /// New flag value.
        registered: bool,
    },
    /// Appends an entry to a cell, creating product and cell if needed.
    Append {
        /// Product.
        product: ProductKey,
        /// Value name.
        name: String,
        /// Entry to append; must sort after the current entry.
        entry: ValueEntry,
    },
    /// Appends an entry that arrived from a peer.
    ///
    /// Older unmatched entries from other origins with equal content are
    /// marked matched as part of the same step.
    Receive {
        /// Product.
        product: ProductKey,
        /// Value name.
        name: String,
        /// Entry to append; must sort after the current entry.
        entry: ValueEntry,
    },
    /// Drops non-current entries from a history.
    Purge {
        /// Product.
        product: ProductKey,
        /// Value name.
        name: String,
        /// Entries to drop.
        ids: Vec<EntryId>,
    },
    /// Records the last entry known to be common with a peer.
    Marker {
        /// Product.
        product: ProductKey,
        /// Value name.
        name: String,
        /// Peer replica.
        peer: ReplicaId,
        /// Common entry.
        id: EntryId,
    },
    /// Records the end of a sync pass with a peer for one product.
    ///
    /// The local high-water mark is taken from the store's change sequence
    /// at apply time, so it covers the rest of the batch.
    PeerState {
        /// Peer replica.
        peer: ReplicaId,
        /// Product.
        product: ProductKey,
        /// Peer's change sequence after the pass.
        peer_seq: ChangeSeq,
        /// Case-folded names left in conflict.
        pending: BTreeSet<String>,
    },
    /// Removes one name from a peer's pending conflict set.
    ClearPending {
        /// Peer replica.
        peer: ReplicaId,
        /// Product.
        product: ProductKey,
        /// Value name.
        name: String,
    },
    /// Adds or replaces a remote registry entry.
    RememberRemote(RemoteEntry),
    /// Removes a remote registry entry.
    ForgetRemote {
        /// Friendly name of the entry.
        friendly_name: String,
    },
}

impl Mutation {
    /// Product touched by this mutation, if any.
    #[must_use]
    pub fn product(&self) -> Option<&ProductKey> {
        match self {
            Self::Register { product, .. }
            | Self::Append { product, .. }
            | Self::Receive { product, .. }
            | Self::Purge { product, .. }
            | Self::Marker { product, .. } => Some(product),
            Self::PeerState { .. }
            | Self::ClearPending { .. }
            | Self::RememberRemote(_)
            | Self::ForgetRemote { .. } => None,
        }
    }

    /// True if this mutation appends an entry.
    #[must_use]
    pub const fn is_append(&self) -> bool {
        matches!(self, Self::Append { .. } | Self::Receive { .. })
    }

    /// The appended entry and its value name, if this is an append.
    #[must_use]
    pub fn appended(&self) -> Option<(&ProductKey, &str, &ValueEntry)> {
        match self {
            Self::Append {
                product,
                name,
                entry,
            }
            | Self::Receive {
                product,
                name,
                entry,
            } => Some((product, name, entry)),
            _ => None,
        }
    }
}
