//! Benchmark utilities.

use rand::Rng;
use settledb_core::{Config, Database, DatabaseKind, ManualClock, ProductKey, Registration};
use std::sync::Arc;

/// Product every benchmark writes to.
pub fn bench_product() -> ProductKey {
    ProductKey::new("BenchApp", "1.0", "bench000")
}

/// Generate random blob data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Value names `Value0`, `Value1`, ...
pub fn value_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("Value{i}")).collect()
}

/// An in-memory replica of `kind` with [`bench_product`] registered.
pub fn replica(clock: &Arc<ManualClock>, kind: DatabaseKind) -> Database {
    let config = Config::new()
        .clock(clock.clone())
        .kind(kind)
        .author("bench")
        .sync_on_commit(false);
    let db = Database::open_in_memory_with_config(config).unwrap();
    db.register_product(&bench_product(), Registration::User)
        .unwrap();
    db
}

/// Writes `count` dword values, advancing the clock between writes.
pub fn populate(db: &Database, clock: &ManualClock, count: usize) {
    for (i, name) in value_names(count).iter().enumerate() {
        db.set_dword(&bench_product(), name, i as u32).unwrap();
        clock.advance(1);
    }
}
