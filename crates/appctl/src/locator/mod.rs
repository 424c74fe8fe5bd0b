//! Resource locators resolve component names to definitions on disk.
//!
//! The control system never reads the filesystem directly: it asks a
//! [`ResourceLocator`] for the raw bytes of a component's resource
//! definition and for the directory the component is installed in. The
//! [`DirectoryLocator`] searches a list of library roots, while the
//! [`MemoryLocator`] serves definitions registered in-process.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

const LOCATOR_TARGET: &str = "appctl::locator";

/// File name suffix of a resource definition inside a component directory.
pub const DEFINITION_SUFFIX: &str = ".component.json";

/// Errors reported by resource locators.
#[derive(Debug, Error)]
pub enum LocatorError {
    /// No definition exists for the component.
    #[error("component '{name}' not found on the search path")]
    NotFound {
        /// Component name.
        name: String,
    },
    /// A definition exists but could not be read.
    #[error("failed to read '{path}': {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Locates component resource definitions and install directories.
pub trait ResourceLocator: Send + Sync {
    /// Returns the raw resource definition for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::NotFound`] when no definition exists and
    /// [`LocatorError::Io`] when one exists but cannot be read.
    fn find_definition(&self, name: &str) -> Result<Vec<u8>, LocatorError>;

    /// Returns the directory the component is installed in.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::NotFound`] for unknown components.
    fn install_dir(&self, name: &str) -> Result<PathBuf, LocatorError>;
}

impl<T> ResourceLocator for Arc<T>
where
    T: ResourceLocator + ?Sized,
{
    fn find_definition(&self, name: &str) -> Result<Vec<u8>, LocatorError> {
        (**self).find_definition(name)
    }

    fn install_dir(&self, name: &str) -> Result<PathBuf, LocatorError> {
        (**self).install_dir(name)
    }
}

/// Searches library roots for `<root>/<name>/<name>.component.json`.
///
/// Roots are consulted in order and the first root holding a definition for
/// the component wins.
#[derive(Debug, Clone, Default)]
pub struct DirectoryLocator {
    roots: Vec<PathBuf>,
}

impl DirectoryLocator {
    /// Builds a locator over the given roots.
    #[must_use]
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    /// Roots in search order.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn definition_path(root: &Path, name: &str) -> PathBuf {
        root.join(name).join(format!("{name}{DEFINITION_SUFFIX}"))
    }

    fn find_root(&self, name: &str) -> Option<&Path> {
        self.roots
            .iter()
            .map(PathBuf::as_path)
            .find(|root| Self::definition_path(root, name).is_file())
    }
}

impl ResourceLocator for DirectoryLocator {
    fn find_definition(&self, name: &str) -> Result<Vec<u8>, LocatorError> {
        let root = self.find_root(name).ok_or_else(|| LocatorError::NotFound {
            name: name.to_owned(),
        })?;
        let path = Self::definition_path(root, name);
        debug!(
            target: LOCATOR_TARGET,
            component = name,
            path = %path.display(),
            "reading resource definition"
        );
        fs::read(&path).map_err(|source| LocatorError::Io { path, source })
    }

    fn install_dir(&self, name: &str) -> Result<PathBuf, LocatorError> {
        self.find_root(name)
            .map(|root| root.join(name))
            .ok_or_else(|| LocatorError::NotFound {
                name: name.to_owned(),
            })
    }
}

/// Serves definitions registered in memory, for embedders and tests.
#[derive(Debug, Default)]
pub struct MemoryLocator {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    definition: Vec<u8>,
    install_dir: PathBuf,
}

impl MemoryLocator {
    /// Creates an empty locator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the definition of `name`.
    pub fn insert(
        &self,
        name: impl Into<String>,
        definition: impl Into<Vec<u8>>,
        install_dir: impl Into<PathBuf>,
    ) {
        self.entries.write().insert(
            name.into(),
            MemoryEntry {
                definition: definition.into(),
                install_dir: install_dir.into(),
            },
        );
    }

    /// Removes the definition of `name`, returning whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }
}

impl ResourceLocator for MemoryLocator {
    fn find_definition(&self, name: &str) -> Result<Vec<u8>, LocatorError> {
        self.entries
            .read()
            .get(name)
            .map(|entry| entry.definition.clone())
            .ok_or_else(|| LocatorError::NotFound {
                name: name.to_owned(),
            })
    }

    fn install_dir(&self, name: &str) -> Result<PathBuf, LocatorError> {
        self.entries
            .read()
            .get(name)
            .map(|entry| entry.install_dir.clone())
            .ok_or_else(|| LocatorError::NotFound {
                name: name.to_owned(),
            })
    }
}
