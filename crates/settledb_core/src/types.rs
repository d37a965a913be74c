//! Identifier and ordering types shared by every replica.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one replica (one database).
///
/// Every entry a replica writes carries its id as origin. The id is generated
/// when the database is created and never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaId(Uuid);

impl ReplicaId {
    /// Origin used for entries produced by conflict resolution.
    ///
    /// Resolution writes the same entry into both replicas; giving it a
    /// reserved origin keeps it distinguishable from either side's writes.
    pub const SYNC_RESOLVER: Self = Self(Uuid::from_u128(0x5e77_1ed0_0000_4000_8000_0000_0000_0001));

    /// Generates a fresh random replica id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true for the reserved resolver origin.
    #[must_use]
    pub fn is_resolver(&self) -> bool {
        *self == Self::SYNC_RESOLVER
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_resolver() {
            f.write_str("sync-resolver")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Logical write time in milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Returns the next representable timestamp.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one history entry.
///
/// Ordering is last-writer-wins order: timestamp first, origin as tiebreak.
/// Field order matters for the derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId {
    /// When the entry was written.
    pub timestamp: Timestamp,
    /// Replica that wrote it.
    pub origin: ReplicaId,
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.timestamp, self.origin)
    }
}

/// Per-database mutation counter.
///
/// Bumped by every appended entry. Cells remember the counter value of their
/// last append, which lets sync skip cells that have not moved.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ChangeSeq(pub u64);

impl ChangeSeq {
    /// Returns the following sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Role a database plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseKind {
    /// The per-user store.
    Local,
    /// The machine-wide administrator store.
    Admin,
    /// A peer store, typically on removable or shared media.
    Remote,
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Admin => "admin",
            Self::Remote => "remote",
        })
    }
}
