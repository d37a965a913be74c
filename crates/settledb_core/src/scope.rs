//! A database bound to one product.

use crate::database::{Database, NamedValue};
use crate::error::CoreResult;
use crate::product::ProductKey;
use crate::types::EntryId;
use crate::value::{TypeFilter, ValueData, ValueEntry};

/// Value access for a single product.
///
/// Returned by [`Database::select_product`].
///
/// ```rust
/// use settledb_core::{Database, ProductKey, Registration};
///
/// let db = Database::open_in_memory().unwrap();
/// let key = ProductKey::new("Viewer", "3", "99");
/// db.register_product(&key, Registration::User).unwrap();
///
/// let viewer = db.select_product(&key).unwrap();
/// viewer.set_bool("ShowGrid", true).unwrap();
/// assert!(viewer.get_bool("showgrid").unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct ProductScope<'a> {
    db: &'a Database,
    product: ProductKey,
}

impl<'a> ProductScope<'a> {
    pub(crate) fn new(db: &'a Database, product: ProductKey) -> Self {
        Self { db, product }
    }

    /// The selected product.
    #[must_use]
    pub fn product(&self) -> &ProductKey {
        &self.product
    }

    /// The underlying database.
    #[must_use]
    pub fn database(&self) -> &'a Database {
        self.db
    }

    /// See [`Database::set_value`].
    pub fn set_value(&self, name: &str, data: ValueData) -> CoreResult<EntryId> {
        self.db.set_value(&self.product, name, data)
    }

    /// See [`Database::set_string`].
    pub fn set_string(&self, name: &str, value: impl Into<String>) -> CoreResult<EntryId> {
        self.db.set_string(&self.product, name, value)
    }

    /// See [`Database::set_dword`].
    pub fn set_dword(&self, name: &str, value: u32) -> CoreResult<EntryId> {
        self.db.set_dword(&self.product, name, value)
    }

    /// See [`Database::set_qword`].
    pub fn set_qword(&self, name: &str, value: u64) -> CoreResult<EntryId> {
        self.db.set_qword(&self.product, name, value)
    }

    /// See [`Database::set_bool`].
    pub fn set_bool(&self, name: &str, value: bool) -> CoreResult<EntryId> {
        self.db.set_bool(&self.product, name, value)
    }

    /// See [`Database::set_blob`].
    pub fn set_blob(&self, name: &str, value: impl Into<Vec<u8>>) -> CoreResult<EntryId> {
        self.db.set_blob(&self.product, name, value)
    }

    /// See [`Database::get_value`].
    pub fn get_value(&self, name: &str) -> CoreResult<ValueEntry> {
        self.db.get_value(&self.product, name)
    }

    /// See [`Database::get_string`].
    pub fn get_string(&self, name: &str) -> CoreResult<String> {
        self.db.get_string(&self.product, name)
    }

    /// See [`Database::get_dword`].
    pub fn get_dword(&self, name: &str) -> CoreResult<u32> {
        self.db.get_dword(&self.product, name)
    }

    /// See [`Database::get_qword`].
    pub fn get_qword(&self, name: &str) -> CoreResult<u64> {
        self.db.get_qword(&self.product, name)
    }

    /// See [`Database::get_bool`].
    pub fn get_bool(&self, name: &str) -> CoreResult<bool> {
        self.db.get_bool(&self.product, name)
    }

    /// See [`Database::get_blob`].
    pub fn get_blob(&self, name: &str) -> CoreResult<Vec<u8>> {
        self.db.get_blob(&self.product, name)
    }

    /// See [`Database::delete_value`].
    pub fn delete_value(&self, name: &str) -> CoreResult<bool> {
        self.db.delete_value(&self.product, name)
    }

    /// See [`Database::enumerate_values`].
    pub fn enumerate_values(&self, filter: TypeFilter) -> CoreResult<Vec<NamedValue>> {
        self.db.enumerate_values(&self.product, filter)
    }

    /// See [`Database::enumerate_past_values`].
    pub fn enumerate_past_values(&self, name: &str) -> CoreResult<Vec<ValueEntry>> {
        self.db.enumerate_past_values(&self.product, name)
    }
}

#[cfg(test)]
mod tests {
    use crate::{CoreError, Database, ProductKey, Registration};

    #[test]
    fn unknown_product_cannot_be_selected() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .select_product(&ProductKey::new("x", "1", "k"))
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn scope_uses_canonical_key() {
        let db = Database::open_in_memory().unwrap();
        db.register_product(&ProductKey::new("Viewer", "1", "k"), Registration::User)
            .unwrap();
        let scope = db.select_product(&ProductKey::new("VIEWER", "1", "k")).unwrap();
        assert_eq!(scope.product().name(), "Viewer");
        scope.set_dword("Zoom", 150).unwrap();
        assert_eq!(scope.get_dword("zoom").unwrap(), 150);
        assert_eq!(scope.enumerate_past_values("Zoom").unwrap().len(), 1);
    }
}
