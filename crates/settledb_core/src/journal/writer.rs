//! Journal writer and recovery reader.

use super::record::{JournalRecord, RecordKind, CRC_SIZE, HEADER_SIZE, JOURNAL_MAGIC, JOURNAL_VERSION};
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use settledb_storage::StorageBackend;

/// Result of scanning a journal from the start.
#[derive(Debug)]
pub(crate) struct Recovery {
    /// Every intact record, in order.
    pub records: Vec<JournalRecord>,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// Bytes past `valid_len` belonging to a torn final record.
    pub torn_bytes: u64,
}

/// Appends framed records to a storage backend.
pub(crate) struct JournalManager {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_write: bool,
}

impl JournalManager {
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_write,
        }
    }

    /// Appends one record. Returns the offset it was written at.
    pub fn append(&self, record: &JournalRecord) -> CoreResult<u64> {
        let data = record.to_bytes()?;
        let mut backend = self.backend.lock();
        let offset = backend.append(&data)?;
        if self.sync_on_write {
            backend.sync()?;
        } else {
            backend.flush()?;
        }
        Ok(offset)
    }

    pub fn sync(&self) -> CoreResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }

    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Drops a torn tail.
    pub fn truncate(&self, len: u64) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.truncate(len)?;
        backend.sync()?;
        Ok(())
    }

    /// Atomically replaces the whole journal with `records`.
    pub fn rewrite(&self, records: &[JournalRecord]) -> CoreResult<u64> {
        let mut data = Vec::new();
        for record in records {
            data.extend_from_slice(&record.to_bytes()?);
        }
        self.backend.lock().replace(&data)?;
        Ok(data.len() as u64)
    }

    /// Reads every intact record, stopping at a torn tail.
    pub fn recover(&self) -> CoreResult<Recovery> {
        let data = self.backend.lock().read_all()?;
        parse(&data)
    }
}

impl std::fmt::Debug for JournalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalManager")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

fn parse(data: &[u8]) -> CoreResult<Recovery> {
    let total = data.len();
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < total {
        let rest = &data[offset..];
        if rest.len() < HEADER_SIZE {
            break;
        }
        if rest[..4] != JOURNAL_MAGIC {
            return Err(CoreError::corrupted(format!(
                "bad record magic at offset {offset}"
            )));
        }
        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version > JOURNAL_VERSION {
            return Err(CoreError::invalid_format(format!(
                "journal version {version} is newer than supported version {JOURNAL_VERSION}"
            )));
        }
        let kind = RecordKind::from_byte(rest[6]).ok_or_else(|| {
            CoreError::corrupted(format!("unknown record kind {} at offset {offset}", rest[6]))
        })?;
        let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;
        let record_len = HEADER_SIZE + len + CRC_SIZE;
        if rest.len() < record_len {
            break;
        }

        let body = &rest[..HEADER_SIZE + len];
        let stored = u32::from_le_bytes([
            rest[HEADER_SIZE + len],
            rest[HEADER_SIZE + len + 1],
            rest[HEADER_SIZE + len + 2],
            rest[HEADER_SIZE + len + 3],
        ]);
        let actual = crc32fast::hash(body);
        if stored != actual {
            if offset + record_len == total {
                break;
            }
            return Err(CoreError::corrupted(format!(
                "checksum mismatch at offset {offset}: expected {stored:08x}, got {actual:08x}"
            )));
        }

        let record = JournalRecord::decode_payload(kind, &body[HEADER_SIZE..])
            .map_err(|e| CoreError::corrupted(format!("record at offset {offset}: {e}")))?;
        records.push(record);
        offset += record_len;
    }

    Ok(Recovery {
        records,
        valid_len: offset as u64,
        torn_bytes: (total - offset) as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::StoreHeader;
    use crate::types::{DatabaseKind, ReplicaId, Timestamp};
    use settledb_storage::InMemoryBackend;

    fn header() -> JournalRecord {
        JournalRecord::Header(StoreHeader {
            replica: ReplicaId::generate(),
            kind: DatabaseKind::Local,
            format_version: (1, 0),
            created_at: Timestamp(1),
        })
    }

    fn journal_with(bytes: Vec<u8>) -> JournalManager {
        JournalManager::new(Box::new(InMemoryBackend::with_data(bytes)), false)
    }

    fn two_records() -> Vec<u8> {
        let mut bytes = header().to_bytes().unwrap();
        bytes.extend(JournalRecord::Batch(Vec::new()).to_bytes().unwrap());
        bytes
    }

    #[test]
    fn append_then_recover() {
        let journal = journal_with(Vec::new());
        journal.append(&header()).unwrap();
        journal.append(&JournalRecord::Batch(Vec::new())).unwrap();

        let recovery = journal.recover().unwrap();
        assert_eq!(recovery.records.len(), 2);
        assert_eq!(recovery.torn_bytes, 0);
        assert_eq!(recovery.valid_len, journal.size().unwrap());
    }

    #[test]
    fn torn_payload_is_dropped() {
        let mut bytes = two_records();
        let full = bytes.len();
        bytes.truncate(full - 3);
        let recovery = parse(&bytes).unwrap();
        assert_eq!(recovery.records.len(), 1);
        assert!(recovery.torn_bytes > 0);
    }

    #[test]
    fn torn_header_is_dropped() {
        let mut bytes = header().to_bytes().unwrap();
        let good = bytes.len() as u64;
        bytes.extend_from_slice(b"SDB");
        let recovery = parse(&bytes).unwrap();
        assert_eq!(recovery.valid_len, good);
        assert_eq!(recovery.torn_bytes, 3);
    }

    #[test]
    fn bad_crc_on_last_record_is_torn() {
        let mut bytes = two_records();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let recovery = parse(&bytes).unwrap();
        assert_eq!(recovery.records.len(), 1);
    }

    #[test]
    fn bad_crc_mid_file_is_corruption() {
        let mut bytes = two_records();
        // Flip a payload byte of the first record.
        bytes[HEADER_SIZE + 1] ^= 0xff;
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, CoreError::Corrupted { .. }));
    }

    #[test]
    fn newer_version_is_rejected() {
        let mut bytes = header().to_bytes().unwrap();
        bytes[4] = 0xff;
        let err = parse(&bytes).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));
    }

    #[test]
    fn rewrite_replaces_contents() {
        let journal = journal_with(two_records());
        journal.rewrite(&[header()]).unwrap();
        assert_eq!(journal.recover().unwrap().records.len(), 1);
    }
}
