//! # SettleDB Core
//!
//! The replica side of SettleDB: a typed, versioned settings store.
//!
//! This crate provides:
//! - [`ValueEntry`] / [`ValueCell`]: typed values with an append-only history
//! - [`ProductKey`] / [`ProductNamespace`]: per-product value namespaces with
//!   independent user and admin registration
//! - [`Database`]: one replica, persisted as a crash-safe journal
//! - [`HistoryMatcher`]: collapses content-identical entries from different
//!   origins
//! - [`RetentionPolicy`]: pluggable pruning of old history
//! - [`Clock`] and [`PathResolver`]: capabilities injected at construction
//!
//! Synchronisation between replicas lives in `settledb_sync`; it drives a
//! database through the [`EngineGuard`] capability.
//!
//! ```rust
//! use settledb_core::{Database, ProductKey, Registration};
//!
//! let db = Database::open_in_memory().unwrap();
//! let product = ProductKey::new("Editor", "1.0", "0123abcd");
//! db.register_product(&product, Registration::User).unwrap();
//!
//! db.set_string(&product, "Theme", "dark").unwrap();
//! assert_eq!(db.get_string(&product, "theme").unwrap(), "dark");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cell;
mod change_feed;
mod clock;
mod codec;
mod config;
mod database;
mod dir;
mod error;
mod journal;
mod matcher;
mod mutation;
mod paths;
mod product;
mod remote;
mod retention;
mod scope;
mod state;
mod types;
mod value;

pub use cell::ValueCell;
pub use change_feed::{ChangeEvent, ChangeFeed, ChangeSource};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::CodecError;
pub use config::Config;
pub use database::{CompactionStats, Database, EngineGuard, NamedValue, ProductInfo};
pub use error::{CoreError, CoreResult};
pub use matcher::HistoryMatcher;
pub use mutation::Mutation;
pub use paths::{PathResolver, StandardPaths};
pub use product::{ProductKey, ProductNamespace, Registration};
pub use remote::{RemoteEntry, RemoteTable};
pub use retention::{KeepAll, KeepLast, PurgeMatched, RetentionPolicy};
pub use scope::ProductScope;
pub use state::PeerSyncState;
pub use types::{ChangeSeq, DatabaseKind, EntryId, ReplicaId, Timestamp};
pub use value::{ContentHash, TypeFilter, ValueData, ValueEntry, ValueType};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
