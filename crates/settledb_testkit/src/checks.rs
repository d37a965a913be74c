//! Assertions shared by the integration tests.

use settledb_core::{Database, ProductKey, TypeFilter, ValueData};
use std::collections::BTreeMap;

/// Live values of `product` keyed by case-folded name.
pub fn live_values(db: &Database, product: &ProductKey) -> BTreeMap<String, ValueData> {
    match db.enumerate_values(product, TypeFilter::Any) {
        Ok(values) => values
            .into_iter()
            .map(|v| (v.name.to_lowercase(), v.entry.data))
            .collect(),
        Err(err) if err.is_not_found() => BTreeMap::new(),
        Err(err) => panic!("Failed to enumerate values: {err}"),
    }
}

/// Panics unless both replicas expose the same live values for `product`.
pub fn assert_converged(a: &Database, b: &Database, product: &ProductKey) {
    let (left, right) = (live_values(a, product), live_values(b, product));
    assert_eq!(
        left,
        right,
        "replicas {} and {} disagree on {product}",
        a.replica_id(),
        b.replica_id()
    );
}

/// Panics unless every visible history of `product` in `db` is strictly
/// increasing and carries an author.
pub fn assert_histories_well_formed(db: &Database, product: &ProductKey) {
    let names: Vec<String> = db
        .enumerate_values(product, TypeFilter::Any)
        .map(|values| values.into_iter().map(|v| v.name).collect())
        .unwrap_or_default();
    for name in names {
        let history = db
            .enumerate_past_values(product, &name)
            .expect("Failed to read history");
        for pair in history.windows(2) {
            assert!(pair[0].id() < pair[1].id(), "history of {name} is out of order");
        }
        assert!(history.iter().all(|e| !e.by.is_empty()), "{name} has an entry without author");
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn eventually(timeout: std::time::Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
}
