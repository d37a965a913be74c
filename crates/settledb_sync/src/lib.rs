//! # SettleDB Sync
//!
//! Replication between SettleDB stores.
//!
//! This crate provides:
//! - [`SyncEngine`]: one bidirectional pass between two replicas
//! - conflict reporting and resolution ([`ConflictSession`], [`Resolutions`])
//! - the remote registry and shared remote handles
//! - [`AutoSync`], a background scheduler with backoff for unreachable remotes
//! - collaborator traits for legacy product detection and change monitoring
//! - [`Settings`], the facade applications use
//!
//! ## Sync model
//!
//! Every value keeps an ordered history. A pass compares, per value, each
//! side's current entry against the other side's history:
//!
//! 1. One side lacks the value: it receives the other side's visible history
//! 2. One side's history contains the other's current entry: the newer entries
//!    flow to the side that is behind
//! 3. Both moved independently: equal content converges on the newest entry,
//!    different content is reported as a conflict and left untouched
//!
//! Each side's changes for one product commit as one journal batch.
//!
//! ```rust
//! use settledb_core::{Database, ProductKey, Registration};
//! use settledb_sync::{SyncEngine, SyncOptions};
//!
//! let product = ProductKey::new("Editor", "1", "ab12");
//! let local = Database::open_in_memory().unwrap();
//! let remote = Database::open_in_memory().unwrap();
//! local.register_product(&product, Registration::User).unwrap();
//! local.set_string(&product, "Theme", "dark").unwrap();
//!
//! let report = SyncEngine::new().sync(&local, &remote, &SyncOptions::new()).unwrap();
//! assert_eq!(report.applied_count, 1);
//! assert_eq!(remote.get_string(&product, "Theme").unwrap(), "dark");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collaborators;
mod config;
mod conflict;
mod engine;
mod error;
mod plan;
mod registry;
mod resolver;
mod scheduler;
mod settings;
mod status;

pub use collaborators::{
    apply_detection, ChangeMonitor, DetectedProduct, DetectionStatus, LegacyLocator,
    SourceLocation, ValueBinding, WatchId, WatchRequest,
};
pub use config::{RetryConfig, SchedulerConfig};
pub use conflict::{Conflict, ConflictProduct, ResolutionChoice, Resolutions};
pub use engine::{ProductError, SyncEngine, SyncOptions, SyncReport, SyncStats};
pub use error::{SyncError, SyncResult};
pub use registry::{DatabaseList, RememberOutcome, RemoteHandles, RemoteRegistry};
pub use resolver::{ConflictSession, ResolveReport, SessionState};
pub use scheduler::{AutoSync, BlockedProducts, WakeReason, Waker, ADMIN_REMOTE};
pub use settings::{Settings, SettingsOptions};
pub use status::{NullSink, StatusEvent, StatusSink, TracingSink};
