//! Typed values and history entries.

use crate::types::{EntryId, ReplicaId, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The type of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueType {
    /// Present, but without payload.
    None,
    /// UTF-8 text.
    String,
    /// 32-bit unsigned integer.
    Dword,
    /// 64-bit unsigned integer.
    Qword,
    /// Boolean flag.
    Bool,
    /// Opaque bytes.
    Blob,
    /// Tombstone left by a delete.
    Deleted,
}

impl ValueType {
    const fn tag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::String => 1,
            Self::Dword => 2,
            Self::Qword => 3,
            Self::Bool => 4,
            Self::Blob => 5,
            Self::Deleted => 6,
        }
    }

    /// Parses a lowercase type name as printed by `Display`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "string" => Self::String,
            "dword" => Self::Dword,
            "qword" => Self::Qword,
            "bool" => Self::Bool,
            "blob" => Self::Blob,
            "deleted" => Self::Deleted,
            _ => return None,
        })
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::String => "string",
            Self::Dword => "dword",
            Self::Qword => "qword",
            Self::Bool => "bool",
            Self::Blob => "blob",
            Self::Deleted => "deleted",
        })
    }
}

/// A typed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueData {
    /// Present, but without payload.
    None,
    /// UTF-8 text.
    String(String),
    /// 32-bit unsigned integer.
    Dword(u32),
    /// 64-bit unsigned integer.
    Qword(u64),
    /// Boolean flag.
    Bool(bool),
    /// Opaque bytes.
    Blob(#[serde(with = "serde_bytes")] Vec<u8>),
    /// Tombstone.
    Deleted,
}

impl ValueData {
    /// Returns the type of this payload.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::None => ValueType::None,
            Self::String(_) => ValueType::String,
            Self::Dword(_) => ValueType::Dword,
            Self::Qword(_) => ValueType::Qword,
            Self::Bool(_) => ValueType::Bool,
            Self::Blob(_) => ValueType::Blob,
            Self::Deleted => ValueType::Deleted,
        }
    }

    /// Returns true for a tombstone.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Hashes the type tag together with the canonical payload bytes.
    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        let mut hasher = Sha256::new();
        hasher.update([self.value_type().tag()]);
        match self {
            Self::None | Self::Deleted => {}
            Self::String(s) => hasher.update(s.as_bytes()),
            Self::Dword(v) => hasher.update(v.to_le_bytes()),
            Self::Qword(v) => hasher.update(v.to_le_bytes()),
            Self::Bool(v) => hasher.update([u8::from(*v)]),
            Self::Blob(b) => hasher.update(b),
        }
        ContentHash(hasher.finalize().into())
    }
}

impl fmt::Display for ValueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("(none)"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Dword(v) => write!(f, "{v}"),
            Self::Qword(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Blob(b) => write!(f, "0x{}", hex::encode(b)),
            Self::Deleted => f.write_str("(deleted)"),
        }
    }
}

/// SHA-256 digest of a value's type and payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// One element of a value's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueEntry {
    /// The payload, or a tombstone.
    pub data: ValueData,
    /// Write time.
    pub timestamp: Timestamp,
    /// Replica that wrote it.
    pub origin: ReplicaId,
    /// Author label of the writer.
    pub by: String,
    /// Digest of `data`.
    pub hash: ContentHash,
    /// Set once an equal entry from another origin supersedes this one.
    #[serde(default)]
    pub matched: bool,
}

impl ValueEntry {
    /// Creates an unmatched entry, computing its content hash.
    pub fn new(
        data: ValueData,
        timestamp: Timestamp,
        origin: ReplicaId,
        by: impl Into<String>,
    ) -> Self {
        let hash = data.content_hash();
        Self {
            data,
            timestamp,
            origin,
            by: by.into(),
            hash,
            matched: false,
        }
    }

    /// Returns the entry's identity.
    #[must_use]
    pub const fn id(&self) -> EntryId {
        EntryId {
            timestamp: self.timestamp,
            origin: self.origin,
        }
    }

    /// Returns the payload type.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        self.data.value_type()
    }

    /// Returns true for a tombstone.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.data.is_deleted()
    }

    /// Type and content equality, ignoring identity and metadata.
    #[must_use]
    pub fn content_eq(&self, other: &Self) -> bool {
        self.value_type() == other.value_type() && self.hash == other.hash
    }
}

/// Filter applied when enumerating the values of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    /// Every live value.
    #[default]
    Any,
    /// Only values of this type.
    Only(ValueType),
    /// Every live value except this type.
    AnyBut(ValueType),
}

impl TypeFilter {
    /// Returns true if a live value of type `ty` passes the filter.
    #[must_use]
    pub fn accepts(self, ty: ValueType) -> bool {
        match self {
            Self::Any => true,
            Self::Only(only) => ty == only,
            Self::AnyBut(excluded) => ty != excluded,
        }
    }
}
