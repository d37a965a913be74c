//! Status reporting from sync passes and the scheduler.

use crate::conflict::ConflictProduct;
use settledb_core::{ProductKey, ReplicaId};
use std::fmt;
use tracing::{debug, warn};

/// Progress and error notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// A scheduler pass started.
    AutoSyncRunning,
    /// The legacy locator is being asked for products.
    RedetectingProducts,
    /// Redetection finished.
    RedetectProductsFinished {
        /// Products reported by the locator.
        detected: usize,
        /// Values written from bindings.
        written: usize,
    },
    /// A remote is about to be synced.
    SyncingRemote {
        /// Friendly name of the remote.
        remote: String,
    },
    /// A remote finished syncing.
    SyncRemoteFinished {
        /// Friendly name of the remote.
        remote: String,
        /// Entries appended on either side.
        applied: usize,
        /// Values left in conflict.
        conflicts: usize,
    },
    /// A remote opened after earlier failures, or on first contact.
    RemoteGood {
        /// Friendly name of the remote.
        remote: String,
    },
    /// One product is about to be synced.
    SyncingProduct {
        /// The other replica.
        peer: ReplicaId,
        /// Product being synced.
        product: ProductKey,
    },
    /// One product finished syncing.
    SyncProductFinished {
        /// The other replica.
        peer: ReplicaId,
        /// Product that was synced.
        product: ProductKey,
        /// Entries appended on either side.
        applied: usize,
        /// Values left in conflict.
        conflicts: usize,
    },
    /// One product failed; the pass continued.
    ProductError {
        /// Product that failed.
        product: ProductKey,
        /// Error text.
        message: String,
    },
    /// A failure not tied to one product.
    GeneralError {
        /// Error text.
        message: String,
    },
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoSyncRunning => write!(f, "autosync running"),
            Self::RedetectingProducts => write!(f, "redetecting products"),
            Self::RedetectProductsFinished { detected, written } => {
                write!(f, "redetected {detected} products, wrote {written} values")
            }
            Self::SyncingRemote { remote } => write!(f, "syncing remote '{remote}'"),
            Self::SyncRemoteFinished {
                remote,
                applied,
                conflicts,
            } => write!(
                f,
                "synced remote '{remote}': {applied} applied, {conflicts} conflicts"
            ),
            Self::RemoteGood { remote } => write!(f, "remote '{remote}' reachable"),
            Self::SyncingProduct { product, .. } => write!(f, "syncing {product}"),
            Self::SyncProductFinished {
                product,
                applied,
                conflicts,
                ..
            } => write!(f, "synced {product}: {applied} applied, {conflicts} conflicts"),
            Self::ProductError { product, message } => write!(f, "{product}: {message}"),
            Self::GeneralError { message } => write!(f, "{message}"),
        }
    }
}

/// Receives status events and conflict notifications.
///
/// Called from the sync thread; implementations must not block for long.
pub trait StatusSink: Send + Sync {
    /// Called for every status event.
    fn on_status(&self, event: &StatusEvent);

    /// Called when a pass against `remote` left conflicts.
    fn on_conflicts(&self, remote: &str, conflicts: &[ConflictProduct]) {
        let _ = (remote, conflicts);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn on_status(&self, _event: &StatusEvent) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn on_status(&self, event: &StatusEvent) {
        match event {
            StatusEvent::ProductError { .. } | StatusEvent::GeneralError { .. } => {
                warn!(%event, "sync status");
            }
            _ => debug!(%event, "sync status"),
        }
    }

    fn on_conflicts(&self, remote: &str, conflicts: &[ConflictProduct]) {
        let count: usize = conflicts.iter().map(|p| p.conflicts.len()).sum();
        warn!(remote, products = conflicts.len(), values = count, "conflicts need resolution");
    }
}
