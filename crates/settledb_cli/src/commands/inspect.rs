//! Inspect command implementation.

use super::open_store;
use serde::Serialize;
use settledb_core::{Database, DatabaseKind};
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Replica id.
    pub replica: String,
    /// Local, remote or admin.
    pub kind: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Mutation counter.
    pub change_seq: u64,
    /// Every product the store knows.
    pub products: Vec<ProductStats>,
    /// Remembered remotes (local stores only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remotes: Option<usize>,
}

/// Statistics for a single product.
#[derive(Debug, Serialize)]
pub struct ProductStats {
    /// `name@version@pkh`.
    pub product: String,
    /// User registration flag.
    pub user: bool,
    /// Admin registration flag.
    pub admin: bool,
    /// Live values.
    pub values: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_store(path)?;
    let result = inspect(path, &db)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn inspect(path: &Path, db: &Database) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let products = db
        .known_products()?
        .into_iter()
        .map(|info| ProductStats {
            product: info.key.to_string(),
            user: info.user_registered,
            admin: info.admin_registered,
            values: info.value_count,
        })
        .collect();
    let remotes = match db.kind() {
        DatabaseKind::Local => Some(db.remotes()?.len()),
        _ => None,
    };
    Ok(InspectResult {
        path: path.display().to_string(),
        replica: db.replica_id().to_string(),
        kind: db.kind().to_string(),
        journal_size: db.journal_size()?,
        change_seq: db.change_seq().0,
        products,
        remotes,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("SettleDB Store Inspection");
    println!("=========================");
    println!();
    println!("Path:    {}", result.path);
    println!("Replica: {}", result.replica);
    println!("Kind:    {}", result.kind);
    println!();
    println!("Journal:");
    println!("  Size:       {}", format_size(result.journal_size));
    println!("  Change seq: {}", result.change_seq);
    if let Some(remotes) = result.remotes {
        println!("  Remotes:    {remotes}");
    }
    println!();
    println!("Products:");
    if result.products.is_empty() {
        println!("  (none)");
    }
    for p in &result.products {
        let flags = match (p.user, p.admin) {
            (true, true) => "user+admin",
            (true, false) => "user",
            (false, true) => "admin",
            (false, false) => "unregistered",
        };
        println!("  {} [{flags}] {} values", p.product, p.values);
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settledb_core::{ProductKey, Registration};
    use tempfile::tempdir;

    #[test]
    fn reports_products_and_flags() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        let db = Database::create(&path).unwrap();
        let product = ProductKey::new("Editor", "1.0", "0123abcd");
        db.register_product(&product, Registration::Admin).unwrap();
        db.set_dword(&product, "Width", 3).unwrap();

        let result = inspect(&path, &db).unwrap();
        assert_eq!(result.kind, "local");
        assert_eq!(result.remotes, Some(0));
        assert_eq!(result.products.len(), 1);
        assert!(result.products[0].admin);
        assert!(!result.products[0].user);
        assert_eq!(result.products[0].values, 1);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["products"][0]["product"], "Editor@1.0@0123abcd");
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(12), "12 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
