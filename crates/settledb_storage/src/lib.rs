//! # SettleDB Storage
//!
//! Byte-store backends underneath the SettleDB settings journal.
//!
//! A backend knows nothing about products, value cells or journal records.
//! It stores bytes, appends bytes, and can atomically swap its whole content
//! for a compacted image. `settledb_core` owns every format decision.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and throwaway replicas
//! - [`FileBackend`] - the on-disk `settings.journal` of a replica
//!
//! ## Example
//!
//! ```rust
//! use settledb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"batch").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"batch");
//!
//! backend.replace(b"snapshot").unwrap();
//! assert_eq!(backend.size().unwrap(), 8);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
