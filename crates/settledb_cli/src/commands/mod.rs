//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod register;
pub mod remotes;
pub mod sync;
pub mod values;

use settledb_core::Database;
use std::path::Path;
use tracing::debug;

/// Opens an existing store, refusing to create one.
pub fn open_store(path: &Path) -> Result<Database, Box<dyn std::error::Error>> {
    debug!(path = %path.display(), "opening store");
    Database::open(path).map_err(|e| format!("Cannot open store at {}: {e}", path.display()).into())
}
