//! Where stores live on disk.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// Maps store roles to filesystem locations.
///
/// Injected into `Settings::initialize` so the same code runs against a
/// per-user profile, a test directory, or a portable install.
pub trait PathResolver: Send + Sync + Debug {
    /// Directory of the per-user store.
    fn local_store(&self) -> PathBuf;

    /// Directory of the machine-wide admin store, if there is one.
    fn admin_store(&self) -> Option<PathBuf>;

    /// Resolves a remote path as given by the caller or a registry entry.
    fn resolve_remote(&self, path: &Path) -> PathBuf;
}

/// Layout rooted at a single base directory.
///
/// `<base>/local` and `<base>/admin` hold the two fixed stores; relative
/// remote paths resolve against `<base>`.
#[derive(Debug, Clone)]
pub struct StandardPaths {
    base: PathBuf,
    with_admin: bool,
}

impl StandardPaths {
    /// Creates a layout with both a local and an admin store.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            with_admin: true,
        }
    }

    /// Drops the admin store from the layout.
    #[must_use]
    pub fn without_admin(mut self) -> Self {
        self.with_admin = false;
        self
    }

    /// The base directory.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl PathResolver for StandardPaths {
    fn local_store(&self) -> PathBuf {
        self.base.join("local")
    }

    fn admin_store(&self) -> Option<PathBuf> {
        self.with_admin.then(|| self.base.join("admin"))
    }

    fn resolve_remote(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }
}
