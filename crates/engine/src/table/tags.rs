//! Tags: human names bound to one version
//!
//! A tag is a marker object at `_refs/tags/{name}.txt` holding the version
//! number, created with create-if-absent so two writers cannot bind the same
//! name. Tags also protect their version from cleanup.

use super::Table;
use std::collections::BTreeMap;
use tessel_core::{Error, Result};
use tessel_durability::{read_tag, read_tag_marker, validate_tag, write_tag};
use tessel_storage::{ObjectStore, TablePaths};
use tracing::info;

const TAG_SUFFIX: &str = ".txt";

/// Every bound tag of the table and the version it points at.
///
/// Tags still claimed by an in-flight commit are skipped.
pub(crate) fn list_tags(
    store: &dyn ObjectStore,
    paths: &TablePaths,
) -> Result<BTreeMap<String, u64>> {
    let prefix = paths.tags_prefix();
    let mut tags = BTreeMap::new();
    for path in store.list(&prefix)? {
        let Some(name) = path
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(TAG_SUFFIX))
        else {
            continue;
        };
        if let Some(version) = read_tag_marker(store, paths, name)? {
            tags.insert(name.to_string(), version);
        }
    }
    Ok(tags)
}

impl Table {
    /// Bind `name` to an existing version.
    ///
    /// # Errors
    /// - [`Error::TagExists`] if the name is taken
    /// - [`Error::VersionNotFound`] if the version does not exist
    pub fn create_tag(&self, name: &str, version: u64) -> Result<()> {
        validate_tag(name)?;
        let coordinator = self.coordinator();
        coordinator
            .handler()
            .resolve_version(&**coordinator.store(), coordinator.paths(), version)?;
        write_tag(&**coordinator.store(), coordinator.paths(), name, version)?;
        info!(target: "tessel::table", tag = %name, version, "Created tag");
        Ok(())
    }

    /// Remove a tag. The version it pointed at becomes eligible for cleanup.
    pub fn delete_tag(&self, name: &str) -> Result<()> {
        validate_tag(name)?;
        let coordinator = self.coordinator();
        let path = coordinator.paths().tag(name);
        if !coordinator.store().exists(&path)? {
            return Err(Error::TagNotFound(name.to_string()));
        }
        coordinator.store().delete(&path)
    }

    /// Tags by name
    pub fn list_tags(&self) -> Result<BTreeMap<String, u64>> {
        let coordinator = self.coordinator();
        list_tags(&**coordinator.store(), coordinator.paths())
    }

    /// Version a tag points at
    pub fn tag_version(&self, name: &str) -> Result<u64> {
        let coordinator = self.coordinator();
        read_tag(&**coordinator.store(), coordinator.paths(), name)
    }
}
