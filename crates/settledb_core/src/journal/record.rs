//! Journal record types and framing.

use crate::codec;
use crate::error::{CoreError, CoreResult};
use crate::mutation::Mutation;
use crate::state::Snapshot;
use crate::types::{DatabaseKind, ReplicaId, Timestamp};
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a journal record.
pub(crate) const JOURNAL_MAGIC: [u8; 4] = *b"SDBJ";

/// Current journal format version.
pub(crate) const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + kind (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Type of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum RecordKind {
    Header = 1,
    Batch = 2,
    Snapshot = 3,
}

impl RecordKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Header),
            2 => Some(Self::Batch),
            3 => Some(Self::Snapshot),
            _ => None,
        }
    }

    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Identity of a store, written once at the start of its journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoreHeader {
    pub replica: ReplicaId,
    pub kind: DatabaseKind,
    pub format_version: (u16, u16),
    pub created_at: Timestamp,
}

#[derive(Debug)]
pub(crate) enum JournalRecord {
    Header(StoreHeader),
    Batch(Vec<Mutation>),
    Snapshot(Snapshot),
}

impl JournalRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Header(_) => RecordKind::Header,
            Self::Batch(_) => RecordKind::Batch,
            Self::Snapshot(_) => RecordKind::Snapshot,
        }
    }

    fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        Ok(match self {
            Self::Header(header) => codec::encode(header)?,
            Self::Batch(batch) => codec::encode(batch)?,
            Self::Snapshot(snapshot) => codec::encode(snapshot)?,
        })
    }

    pub fn decode_payload(kind: RecordKind, payload: &[u8]) -> CoreResult<Self> {
        let record = match kind {
            RecordKind::Header => Self::Header(codec::decode(payload)?),
            RecordKind::Batch => Self::Batch(codec::decode(payload)?),
            RecordKind::Snapshot => Self::Snapshot(codec::decode(payload)?),
        };
        Ok(record)
    }

    /// Frames the record with its envelope and checksum.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_argument("journal record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.push(self.kind().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_layout() {
        let record = JournalRecord::Batch(Vec::new());
        let bytes = record.to_bytes().unwrap();

        assert_eq!(&bytes[..4], b"SDBJ");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), JOURNAL_VERSION);
        assert_eq!(bytes[6], RecordKind::Batch.as_byte());
        let len = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]) as usize;
        assert_eq!(bytes.len(), HEADER_SIZE + len + CRC_SIZE);

        let body = &bytes[..bytes.len() - CRC_SIZE];
        let crc = u32::from_le_bytes(bytes[bytes.len() - CRC_SIZE..].try_into().unwrap());
        assert_eq!(crc, crc32fast::hash(body));
    }

    #[test]
    fn unknown_kind() {
        assert_eq!(RecordKind::from_byte(0), None);
        assert_eq!(RecordKind::from_byte(9), None);
        assert_eq!(RecordKind::from_byte(3), Some(RecordKind::Snapshot));
    }
}
