//! Compact command implementation.

use super::open_store;
use settledb_core::PurgeMatched;
use std::path::Path;

/// Rewrites the journal, optionally purging matched history first.
pub fn run(path: &Path, purge_matched: bool) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_store(path)?;

    println!("Compacting journal at {}", path.display());
    if purge_matched {
        let purged = db.apply_retention(&PurgeMatched)?;
        println!("  Purged entries: {purged}");
    }

    let stats = db.compact()?;
    let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
    println!("  Size before: {} bytes", stats.bytes_before);
    println!("  Size after:  {} bytes", stats.bytes_after);
    println!(
        "  Space saved: {saved} bytes ({:.1}%)",
        if stats.bytes_before > 0 {
            saved as f64 / stats.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );
    println!("✓ Compaction complete");
    Ok(())
}
