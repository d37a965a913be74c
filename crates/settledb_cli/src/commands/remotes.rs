//! Remote registry commands.

use super::open_store;
use settledb_sync::{RememberOutcome, RemoteRegistry};
use std::path::Path;

/// Lists remembered remotes.
pub fn list(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_store(path)?;
    let list = RemoteRegistry::new(&db)?.enumerate()?;
    println!("{} remote(s)", list.count);
    for entry in &list.entries {
        let auto = if entry.sync_by_default { " [autosync]" } else { "" };
        println!(
            "  {} -> {} ({}){auto}",
            entry.friendly_name,
            entry.path.display(),
            entry.replica
        );
    }
    Ok(())
}

/// Remembers the store at `remote` as `name`.
pub fn remember(
    path: &Path,
    remote: &Path,
    name: &str,
    sync_by_default: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_store(path)?;
    let peer = open_store(remote)?;
    match RemoteRegistry::new(&db)?.remember(&peer, name, sync_by_default)? {
        RememberOutcome::Added => println!("✓ Remembered {name}"),
        RememberOutcome::Updated => println!("✓ Updated {name}"),
    }
    Ok(())
}

/// Forgets a remote.
pub fn forget(path: &Path, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_store(path)?;
    let removed = RemoteRegistry::new(&db)?.forget(name)?;
    println!("✓ Forgot {} ({})", removed.friendly_name, removed.path.display());
    Ok(())
}
