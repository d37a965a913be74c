//! Conflict records and resolution choices.

use settledb_core::{ProductKey, ValueEntry};
use std::collections::BTreeMap;

/// A value whose two sides diverged with different content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Value name.
    pub name: String,
    /// Current entry on the source (local) side.
    pub local: ValueEntry,
    /// Current entry on the target (remote) side.
    pub remote: ValueEntry,
}

/// All conflicts found in one product during one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictProduct {
    /// Product the conflicts belong to.
    pub product: ProductKey,
    /// Conflicting values, ordered by name.
    pub conflicts: Vec<Conflict>,
}

impl ConflictProduct {
    /// Finds a conflict by value name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&Conflict> {
        self.conflicts
            .iter()
            .find(|c| c.name.to_lowercase() == name.to_lowercase())
    }
}

/// Which side wins a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionChoice {
    /// Keep the source-side content.
    Local,
    /// Keep the target-side content.
    Remote,
}

/// Explicit choices keyed by product and value name.
///
/// Value names are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolutions {
    choices: BTreeMap<(ProductKey, String), ResolutionChoice>,
}

impl Resolutions {
    /// Creates an empty set of choices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a choice, replacing any earlier one for the same value.
    pub fn choose(&mut self, product: &ProductKey, name: &str, choice: ResolutionChoice) {
        self.choices
            .insert((product.clone(), name.to_lowercase()), choice);
    }

    /// Builder form of [`choose`](Self::choose).
    #[must_use]
    pub fn with(mut self, product: &ProductKey, name: &str, choice: ResolutionChoice) -> Self {
        self.choose(product, name, choice);
        self
    }

    /// Chooses the same side for every conflict in `conflicts`.
    pub fn choose_all(conflicts: &[ConflictProduct], choice: ResolutionChoice) -> Self {
        let mut resolutions = Self::new();
        for product in conflicts {
            for conflict in &product.conflicts {
                resolutions.choose(&product.product, &conflict.name, choice);
            }
        }
        resolutions
    }

    /// The choice for a value, if any.
    pub fn get(&self, product: &ProductKey, name: &str) -> Option<ResolutionChoice> {
        self.choices
            .get(&(product.clone(), name.to_lowercase()))
            .copied()
    }

    /// Number of recorded choices.
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    /// True if no choice has been recorded.
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}
