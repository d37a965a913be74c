//! Value commands: get, set, delete, history.

use super::open_store;
use settledb_core::{ProductKey, ValueData, ValueEntry};
use std::path::Path;

/// Builds a payload from the `set` flags. Exactly one must be given.
pub fn parse_value(
    string: Option<String>,
    dword: Option<u32>,
    qword: Option<u64>,
    boolean: Option<bool>,
    blob_hex: Option<&str>,
    none: bool,
) -> Result<ValueData, Box<dyn std::error::Error>> {
    let mut candidates = Vec::new();
    if let Some(s) = string {
        candidates.push(ValueData::String(s));
    }
    if let Some(v) = dword {
        candidates.push(ValueData::Dword(v));
    }
    if let Some(v) = qword {
        candidates.push(ValueData::Qword(v));
    }
    if let Some(v) = boolean {
        candidates.push(ValueData::Bool(v));
    }
    if let Some(hex_str) = blob_hex {
        let trimmed = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(trimmed).map_err(|e| format!("Invalid blob hex: {e}"))?;
        candidates.push(ValueData::Blob(bytes));
    }
    if none {
        candidates.push(ValueData::None);
    }
    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err("Give one of --string, --dword, --qword, --bool, --blob-hex, --none".into()),
        _ => Err("Give only one value".into()),
    }
}

/// Prints the current value.
pub fn get(path: &Path, product: &ProductKey, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_store(path)?;
    let entry = db.get_value(product, name)?;
    println!("{} = {}", name, entry.data);
    println!("  type: {}", entry.value_type());
    println!("  written by {} at {}", entry.by, entry.timestamp);
    Ok(())
}

/// Writes a value.
pub fn set(
    path: &Path,
    product: &ProductKey,
    name: &str,
    data: ValueData,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_store(path)?;
    let id = db.set_value(product, name, data)?;
    println!("✓ {name} written ({id})");
    Ok(())
}

/// Appends a tombstone.
pub fn delete(path: &Path, product: &ProductKey, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_store(path)?;
    if db.delete_value(product, name)? {
        println!("✓ {name} deleted");
    } else {
        println!("{name} has no live value");
    }
    Ok(())
}

/// Prints the history, oldest first.
pub fn history(
    path: &Path,
    product: &ProductKey,
    name: &str,
    raw: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_store(path)?;
    let entries = if raw {
        db.cell_history(product, name)?
    } else {
        db.enumerate_past_values(product, name)?
    };
    println!("History of {name} ({} entries):", entries.len());
    for (i, entry) in entries.iter().enumerate() {
        println!("  {}", format_entry(i, entry));
    }
    Ok(())
}

fn format_entry(index: usize, entry: &ValueEntry) -> String {
    let marker = if entry.matched { " (matched)" } else { "" };
    format!(
        "[{index}] {} {} by {} from {}{marker}",
        entry.timestamp, entry.data, entry.by, entry.origin
    )
}
