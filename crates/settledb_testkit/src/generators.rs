//! Property-based test generators using proptest.

use proptest::prelude::*;
use settledb_core::{Database, ProductKey, ValueData};

/// Strategy for value names. Short alphabet so independent writes collide.
pub fn value_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for product keys.
pub fn product_key_strategy() -> impl Strategy<Value = ProductKey> {
    (
        prop::string::string_regex("[A-Za-z][A-Za-z0-9 ]{0,15}").expect("Invalid regex"),
        prop::string::string_regex("[0-9]{1,2}\\.[0-9]{1,2}").expect("Invalid regex"),
        prop::string::string_regex("[0-9a-f]{8}").expect("Invalid regex"),
    )
        .prop_map(|(name, version, pkh)| ProductKey::new(name, version, pkh))
}

/// Strategy for live (non-tombstone) payloads of every type.
pub fn value_data_strategy() -> impl Strategy<Value = ValueData> {
    prop_oneof![
        Just(ValueData::None),
        ".{0,64}".prop_map(ValueData::String),
        any::<u32>().prop_map(ValueData::Dword),
        any::<u64>().prop_map(ValueData::Qword),
        any::<bool>().prop_map(ValueData::Bool),
        prop::collection::vec(any::<u8>(), 0..256).prop_map(ValueData::Blob),
    ]
}

/// One local write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Set a value.
    Set(String, ValueData),
    /// Delete a value.
    Delete(String),
}

/// Strategy for a write against one of `names`.
pub fn write_op_strategy(names: Vec<String>) -> impl Strategy<Value = WriteOp> {
    let pick = prop::sample::select(names);
    prop_oneof![
        4 => (pick.clone(), value_data_strategy()).prop_map(|(n, v)| WriteOp::Set(n, v)),
        1 => pick.prop_map(WriteOp::Delete),
    ]
}

/// Strategy for a sequence of writes over a small fixed name set.
pub fn write_ops_strategy(max: usize) -> impl Strategy<Value = Vec<WriteOp>> {
    let names = ["Alpha", "Beta", "Gamma", "Delta"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    prop::collection::vec(write_op_strategy(names), 0..max)
}

/// Applies `ops` to `db` under `product`.
pub fn apply_ops(db: &Database, product: &ProductKey, ops: &[WriteOp]) {
    for op in ops {
        match op {
            WriteOp::Set(name, value) => {
                db.set_value(product, name, value.clone())
                    .expect("Failed to set value");
            }
            WriteOp::Delete(name) => {
                db.delete_value(product, name)
                    .expect("Failed to delete value");
            }
        }
    }
}
