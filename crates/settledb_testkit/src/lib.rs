//! # SettleDB Testkit
//!
//! Test utilities for SettleDB.
//!
//! This crate provides:
//! - Replica fixtures on a manual clock
//! - Property-based test generators using proptest
//! - Fake collaborators for the autosync scheduler
//! - Convergence assertions
//!
//! The cross-crate integration tests live in this crate's `tests/`.
//!
//! ## Usage
//!
//! ```rust
//! use settledb_testkit::prelude::*;
//! use settledb_sync::{SyncEngine, SyncOptions};
//!
//! let (clock, replicas) = replica_set(2);
//! replicas[0].set_string(&test_product(), "Theme", "dark").unwrap();
//! clock.advance(1);
//! SyncEngine::new()
//!     .sync(&replicas[0], &replicas[1], &SyncOptions::new())
//!     .unwrap();
//! assert_converged(&replicas[0], &replicas[1], &test_product());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod checks;
pub mod fakes;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checks::*;
    pub use crate::fakes::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use checks::*;
pub use fakes::*;
pub use fixtures::*;
pub use generators::*;
