//! Interfaces to the outside world the scheduler drives.
//!
//! The legacy locator finds installed products and the values bound to their
//! native storage; the change monitor wakes the scheduler when a watched
//! location changes. Both are implemented outside this crate.

use crate::error::SyncResult;
use crate::scheduler::Waker;
use settledb_core::{Database, ProductKey, Registration, ValueData};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Where a bound value lives natively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceLocation {
    /// A value under a registry key.
    RegistryValue {
        /// Full key path.
        key: String,
        /// Value name under the key.
        value: String,
    },
    /// A key in an INI file section.
    IniKey {
        /// The INI file.
        file: PathBuf,
        /// Section name.
        section: String,
        /// Key name.
        key: String,
    },
    /// A whole directory.
    Directory(PathBuf),
    /// A single file.
    File(PathBuf),
}

impl SourceLocation {
    /// Filesystem path a change monitor should watch, if any.
    pub fn watch_target(&self) -> Option<PathBuf> {
        match self {
            Self::RegistryValue { .. } => None,
            Self::IniKey { file, .. } => Some(file.clone()),
            Self::Directory(path) | Self::File(path) => Some(path.clone()),
        }
    }
}

/// One value the locator read from native storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueBinding {
    /// Value name in the product namespace.
    pub name: String,
    /// Native location.
    pub location: SourceLocation,
    /// Current native content; `None` if it could not be read.
    pub value: Option<ValueData>,
}

/// Whether a product is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStatus {
    /// Installed; keep it registered.
    Registered,
    /// No longer installed.
    Unregistered,
}

/// A product reported by the locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedProduct {
    /// Product identity.
    pub product: ProductKey,
    /// Installation status.
    pub status: DetectionStatus,
    /// Bound values.
    pub bindings: Vec<ValueBinding>,
}

/// Finds installed products.
pub trait LegacyLocator: Send + Sync {
    /// Scans for products.
    fn detect(&self) -> SyncResult<Vec<DetectedProduct>>;
}

/// Opaque handle for a registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u64);

/// What to watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    /// Path to watch. If it does not exist the monitor watches its nearest
    /// existing ancestor.
    pub target: PathBuf,
    /// Quiet period after the last change before waking.
    pub silence: Duration,
}

/// Wakes the scheduler when watched locations change.
pub trait ChangeMonitor: Send + Sync {
    /// Starts watching; `waker` is called after each quiet period.
    fn watch(&self, request: WatchRequest, waker: Waker) -> SyncResult<WatchId>;

    /// Stops a watch.
    fn unwatch(&self, id: WatchId) -> SyncResult<()>;
}

/// Writes one detected product into `db`.
///
/// Registered products get the user flag and any binding whose content
/// differs from the stored value. Unregistered products lose the user flag.
/// Returns the number of values written.
pub fn apply_detection(db: &Database, detected: &DetectedProduct) -> SyncResult<usize> {
    let key = &detected.product;
    match detected.status {
        DetectionStatus::Unregistered => {
            if db.is_registered(key, Registration::User) {
                db.unregister_product(key, Registration::User)?;
            }
            return Ok(0);
        }
        DetectionStatus::Registered => db.register_product(key, Registration::User)?,
    }

    let mut written = 0;
    for binding in &detected.bindings {
        let Some(value) = &binding.value else {
            continue;
        };
        let stored = match db.get_value(key, &binding.name) {
            Ok(entry) => Some(entry.data),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };
        match (value.is_deleted(), stored) {
            (true, None) => {}
            (true, Some(_)) => {
                db.delete_value(key, &binding.name)?;
                written += 1;
            }
            (false, Some(current)) if &current == value => {}
            (false, _) => {
                db.set_value(key, &binding.name, value.clone())?;
                written += 1;
            }
        }
    }
    if written > 0 {
        debug!(product = %key, written, "bound values updated");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected(status: DetectionStatus, value: Option<ValueData>) -> DetectedProduct {
        DetectedProduct {
            product: ProductKey::new("Legacy", "7", "aa"),
            status,
            bindings: vec![ValueBinding {
                name: "Path".into(),
                location: SourceLocation::IniKey {
                    file: PathBuf::from("/etc/legacy.ini"),
                    section: "main".into(),
                    key: "path".into(),
                },
                value,
            }],
        }
    }

    #[test]
    fn watch_targets() {
        let ini = detected(DetectionStatus::Registered, None).bindings[0]
            .location
            .watch_target();
        assert_eq!(ini, Some(PathBuf::from("/etc/legacy.ini")));
        let reg = SourceLocation::RegistryValue {
            key: "HKCU\\Software\\Legacy".into(),
            value: "Path".into(),
        };
        assert_eq!(reg.watch_target(), None);
    }

    #[test]
    fn detection_registers_and_writes_changed_values_once() {
        let db = Database::open_in_memory().unwrap();
        let product = detected(
            DetectionStatus::Registered,
            Some(ValueData::String("/opt/legacy".into())),
        );

        assert_eq!(apply_detection(&db, &product).unwrap(), 1);
        assert!(db.is_registered(&product.product, Registration::User));
        assert_eq!(apply_detection(&db, &product).unwrap(), 0);
        assert_eq!(
            db.get_string(&product.product, "Path").unwrap(),
            "/opt/legacy"
        );
    }

    #[test]
    fn deleted_binding_deletes_the_value() {
        let db = Database::open_in_memory().unwrap();
        let set = detected(DetectionStatus::Registered, Some(ValueData::Dword(1)));
        apply_detection(&db, &set).unwrap();

        let gone = detected(DetectionStatus::Registered, Some(ValueData::Deleted));
        assert_eq!(apply_detection(&db, &gone).unwrap(), 1);
        assert!(db.get_value(&gone.product, "Path").is_err());
    }

    #[test]
    fn uninstalled_product_loses_user_flag() {
        let db = Database::open_in_memory().unwrap();
        apply_detection(&db, &detected(DetectionStatus::Registered, None)).unwrap();
        let removed = detected(DetectionStatus::Unregistered, None);
        apply_detection(&db, &removed).unwrap();
        assert!(!db.is_registered(&removed.product, Registration::User));
    }
}
