//! The settings journal: an append-only file of checksummed records.
//!
//! ## Record Format
//!
//! ```text
//! | magic "SDBJ" (4) | version (2) | kind (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Integers are little-endian. The payload is CBOR. The CRC covers every
//! byte before it.
//!
//! A journal always starts with a `Header` record. It is followed by any
//! number of `Batch` records, each holding the mutations of one commit.
//! Compaction rewrites the file as `Header` + `Snapshot`.
//!
//! ## Recovery Policy
//!
//! - A truncated header or payload at the end of the file is a torn write:
//!   the tail is discarded and the file truncated to the last good record.
//! - A checksum mismatch on the final record is treated the same way.
//! - A checksum mismatch followed by more data, bad magic, or an unknown
//!   record kind is corruption and fails the open.

mod record;
mod writer;

pub(crate) use record::{JournalRecord, StoreHeader};
pub(crate) use writer::{JournalManager, Recovery};
