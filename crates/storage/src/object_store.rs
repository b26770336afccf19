//! Object store abstraction
//!
//! All table I/O goes through [`ObjectStore`]. Paths are `/`-separated and
//! relative to the table root. Objects are written once and never modified
//! in place, except for the handful of control files the commit path
//! manages explicitly.

use std::fmt::Debug;
use std::ops::Range;
use tessel_core::{Error, Result};

/// Minimal blob store used by the table engine
pub trait ObjectStore: Send + Sync + Debug {
    /// Identifier of the store root, used as the external manifest store key
    fn uri(&self) -> String;

    /// Read a whole object. Missing objects return [`Error::NotFound`].
    fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Read a byte range of an object
    fn get_range(&self, path: &str, range: Range<u64>) -> Result<Vec<u8>> {
        let bytes = self.get(path)?;
        let start = range.start as usize;
        let end = range.end as usize;
        if start > end || end > bytes.len() {
            return Err(Error::invalid_input(format!(
                "range {}..{} out of bounds for '{}' ({} bytes)",
                start,
                end,
                path,
                bytes.len()
            )));
        }
        Ok(bytes[start..end].to_vec())
    }

    /// Write an object, replacing any previous content atomically
    fn put(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Write an object only if nothing exists at `path`.
    ///
    /// Returns [`Error::AlreadyExists`] if the path is taken. Stores without
    /// an atomic primitive return [`Error::UnsupportedFeature`].
    fn put_if_absent(&self, path: &str, data: &[u8]) -> Result<()>;

    /// True if [`ObjectStore::put_if_absent`] is atomic on this store
    fn supports_conditional_put(&self) -> bool {
        true
    }

    /// Copy an object, replacing the destination
    fn copy(&self, from: &str, to: &str) -> Result<()> {
        let bytes = self.get(from)?;
        self.put(to, &bytes)
    }

    /// Delete an object. Deleting a missing object succeeds.
    fn delete(&self, path: &str) -> Result<()>;

    /// True if an object exists at `path`
    fn exists(&self, path: &str) -> Result<bool>;

    /// All object paths starting with `prefix`, sorted ascending
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Error for stores that cannot do conditional puts
pub(crate) fn conditional_put_unsupported(uri: &str) -> Error {
    Error::UnsupportedFeature(format!(
        "object store '{}' does not support atomic put-if-absent",
        uri
    ))
}
