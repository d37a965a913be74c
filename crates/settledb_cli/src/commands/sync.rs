//! Sync command implementation.

use super::open_store;
use settledb_sync::{SyncEngine, SyncOptions, SyncReport};
use std::path::Path;

/// Runs one pass between the store at `path` and `remote`.
pub fn run(path: &Path, remote: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let local = open_store(path)?;
    let peer = open_store(remote)?;

    let report = SyncEngine::new().sync(&local, &peer, &SyncOptions::new())?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!(
        "Synced {} products in {:?}",
        report.products_synced, report.duration
    );
    println!("  Entries applied:  {}", report.applied_count);
    println!("  Products skipped: {}", report.skipped.len());
    for error in &report.product_errors {
        println!("  ✗ {}: {}", error.product, error.message);
    }
    if report.has_conflicts() {
        println!();
        println!("Conflicts ({}):", report.conflict_count());
        for group in &report.conflicts {
            for conflict in &group.conflicts {
                println!(
                    "  {} / {}: local {} vs remote {}",
                    group.product, conflict.name, conflict.local.data, conflict.remote.data
                );
            }
        }
    }
}
