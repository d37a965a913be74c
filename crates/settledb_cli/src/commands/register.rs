//! Register command implementation.

use super::open_store;
use settledb_core::{ProductKey, Registration};
use std::path::Path;

/// Sets or clears one registration flag.
pub fn run(
    path: &Path,
    product: &ProductKey,
    admin: bool,
    remove: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_store(path)?;
    let scope = if admin {
        Registration::Admin
    } else {
        Registration::User
    };
    if remove {
        db.unregister_product(product, scope)?;
        println!("✓ {product} unregistered ({scope:?})");
    } else {
        db.register_product(product, scope)?;
        println!("✓ {product} registered ({scope:?})");
    }
    Ok(())
}
