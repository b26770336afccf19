//! External manifest store
//!
//! Some object stores cannot create an object only if it is absent. For
//! those, a small key-value store with compare-and-set semantics decides
//! which writer owns version N of a table. Entries are keyed by
//! `(table_uri, version)` and hold the object store path of the manifest.

use dashmap::DashMap;
use tessel_core::{Error, Result};

/// Key-value store with conditional writes, keyed by `(uri, version)`
pub trait ExternalManifestStore: Send + Sync + std::fmt::Debug {
    /// Path recorded for a version
    fn get(&self, uri: &str, version: u64) -> Result<Option<String>>;

    /// Highest recorded version and its path
    fn get_latest_version(&self, uri: &str) -> Result<Option<(u64, String)>>;

    /// Record a path only if no entry exists; [`Error::AlreadyExists`] otherwise
    fn put_if_not_exists(&self, uri: &str, version: u64, path: &str) -> Result<()>;

    /// Replace the path of an existing entry; [`Error::NotFound`] otherwise
    fn put_if_exists(&self, uri: &str, version: u64, path: &str) -> Result<()>;

    /// Drop every entry of a table
    fn delete(&self, uri: &str) -> Result<()>;
}

/// In-process external store backed by a `DashMap`
#[derive(Debug, Default)]
pub struct MemoryExternalStore {
    entries: DashMap<(String, u64), String>,
}

impl MemoryExternalStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExternalManifestStore for MemoryExternalStore {
    fn get(&self, uri: &str, version: u64) -> Result<Option<String>> {
        Ok(self
            .entries
            .get(&(uri.to_string(), version))
            .map(|e| e.value().clone()))
    }

    fn get_latest_version(&self, uri: &str) -> Result<Option<(u64, String)>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().0 == uri)
            .max_by_key(|e| e.key().1)
            .map(|e| (e.key().1, e.value().clone())))
    }

    fn put_if_not_exists(&self, uri: &str, version: u64, path: &str) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry((uri.to_string(), version)) {
            Entry::Occupied(_) => Err(Error::AlreadyExists {
                path: format!("{}@{}", uri, version),
            }),
            Entry::Vacant(slot) => {
                slot.insert(path.to_string());
                Ok(())
            }
        }
    }

    fn put_if_exists(&self, uri: &str, version: u64, path: &str) -> Result<()> {
        match self.entries.get_mut(&(uri.to_string(), version)) {
            Some(mut entry) => {
                *entry = path.to_string();
                Ok(())
            }
            None => Err(Error::not_found(format!("{}@{}", uri, version))),
        }
    }

    fn delete(&self, uri: &str) -> Result<()> {
        self.entries.retain(|k, _| k.0 != uri);
        Ok(())
    }
}
