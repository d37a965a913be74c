//! Products and their value namespaces.

use crate::cell::ValueCell;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Identity of a product: name, version and publisher key hash.
///
/// The name compares case-insensitively; version and key hash compare
/// exactly. The display form is `name@version@pkh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductKey {
    name: String,
    version: String,
    public_key_hash: String,
}

impl ProductKey {
    /// Creates a product key.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        public_key_hash: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            public_key_hash: public_key_hash.into(),
        }
    }

    /// Product name as first registered.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Product version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Publisher key hash.
    #[must_use]
    pub fn public_key_hash(&self) -> &str {
        &self.public_key_hash
    }

    fn folded(&self) -> (String, &str, &str) {
        (
            fold_name(&self.name),
            &self.version,
            &self.public_key_hash,
        )
    }
}

impl PartialEq for ProductKey {
    fn eq(&self, other: &Self) -> bool {
        self.folded() == other.folded()
    }
}

impl Eq for ProductKey {}

impl Hash for ProductKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded().hash(state);
    }
}

impl PartialOrd for ProductKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProductKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(&other.folded())
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}@{}", self.name, self.version, self.public_key_hash)
    }
}

impl FromStr for ProductKey {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let mut parts = s.splitn(3, '@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(version), Some(pkh)) if !name.is_empty() => {
                Ok(Self::new(name, version, pkh))
            }
            _ => Err(CoreError::invalid_argument(format!(
                "product must be written name@version@pkh, got '{s}'"
            ))),
        }
    }
}

/// Case-folds a product or value name for lookup.
pub(crate) fn fold_name(name: &str) -> String {
    name.to_lowercase()
}

/// Which registration flag an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Registration {
    /// Registered by the user.
    User,
    /// Registered by an administrator.
    Admin,
}

/// All values of one product in one replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductNamespace {
    key: ProductKey,
    user_registered: bool,
    admin_registered: bool,
    cells: BTreeMap<String, ValueCell>,
}

impl ProductNamespace {
    /// Creates an empty, unregistered namespace.
    #[must_use]
    pub fn new(key: ProductKey) -> Self {
        Self {
            key,
            user_registered: false,
            admin_registered: false,
            cells: BTreeMap::new(),
        }
    }

    /// The product this namespace belongs to.
    #[must_use]
    pub fn key(&self) -> &ProductKey {
        &self.key
    }

    /// True while either registration flag is set.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.user_registered || self.admin_registered
    }

    /// Returns one registration flag.
    #[must_use]
    pub fn is_registered(&self, scope: Registration) -> bool {
        match scope {
            Registration::User => self.user_registered,
            Registration::Admin => self.admin_registered,
        }
    }

    pub(crate) fn set_registered(&mut self, scope: Registration, registered: bool) {
        match scope {
            Registration::User => self.user_registered = registered,
            Registration::Admin => self.admin_registered = registered,
        }
    }

    /// Looks up a cell by case-insensitive name.
    #[must_use]
    pub fn cell(&self, name: &str) -> Option<&ValueCell> {
        self.cells.get(&fold_name(name))
    }

    pub(crate) fn cell_mut_or_insert(&mut self, name: &str) -> &mut ValueCell {
        self.cells
            .entry(fold_name(name))
            .or_insert_with(|| ValueCell::new(name))
    }

    pub(crate) fn cell_mut(&mut self, name: &str) -> Option<&mut ValueCell> {
        self.cells.get_mut(&fold_name(name))
    }

    /// Iterates cells in case-folded name order.
    pub fn cells(&self) -> impl Iterator<Item = &ValueCell> {
        self.cells.values()
    }

    /// Number of cells whose current entry is live.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.cells.values().filter(|c| c.current_live().is_some()).count()
    }
}
