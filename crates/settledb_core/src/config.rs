//! Database configuration.

use crate::clock::{Clock, SystemClock};
use crate::types::DatabaseKind;
use std::sync::Arc;

/// Configuration for opening or creating a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the database already exists.
    pub error_if_exists: bool,

    /// Whether to fsync the journal on every commit.
    pub sync_on_commit: bool,

    /// Role recorded in the header of a newly created database.
    pub kind: DatabaseKind,

    /// Author label stamped on entries written through this handle.
    pub author: Option<String>,

    /// Source of entry timestamps.
    pub clock: Arc<dyn Clock>,

    /// Journal format version written into new databases.
    pub format_version: (u16, u16),

    /// Rewrite the journal as a snapshot once it grows past this size.
    pub compact_after_bytes: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            error_if_exists: false,
            sync_on_commit: true,
            kind: DatabaseKind::Local,
            author: None,
            clock: Arc::new(SystemClock),
            format_version: (1, 0),
            compact_after_bytes: Some(4 * 1024 * 1024), // 4 MB
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if database exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets whether to fsync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the database role.
    #[must_use]
    pub const fn kind(mut self, kind: DatabaseKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the author label.
    #[must_use]
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the auto-compaction threshold, or disables it with `None`.
    #[must_use]
    pub const fn compact_after_bytes(mut self, value: Option<u64>) -> Self {
        self.compact_after_bytes = value;
        self
    }

    /// Resolves the author label, falling back to the login name.
    pub(crate) fn resolved_author(&self) -> String {
        self.author
            .clone()
            .filter(|a| !a.is_empty())
            .or_else(|| std::env::var("USER").ok().filter(|a| !a.is_empty()))
            .or_else(|| std::env::var("USERNAME").ok().filter(|a| !a.is_empty()))
            .unwrap_or_else(|| "settledb".to_string())
    }
}
