//! Deletion overlay maintenance
//!
//! Deleting rows never touches data files. The offsets are unioned with the
//! fragment's current deletion vector and written as a fresh deletion file;
//! the old file stays behind for older versions until cleanup removes it.

use tessel_core::{DeletionFile, DeletionVector, Error, Fragment, Result};
use tessel_durability::{read_deletion_vector, write_deletion_file};
use tessel_storage::{ObjectStore, TablePaths};

/// Result of marking rows of one fragment deleted
#[derive(Debug, Clone, PartialEq)]
pub enum DeletionOutcome {
    /// No new rows were deleted; the fragment is unchanged
    Unchanged,
    /// The fragment keeps some rows and needs this deletion file
    Updated(DeletionFile),
    /// Every row is deleted; drop the fragment
    FullyDeleted,
}

/// Union `offsets` into the fragment's deletion vector and persist it.
///
/// Returns `Ok(None)` when the fragment has no live rows left, so the caller
/// can drop it instead of committing an empty fragment. If none of the
/// offsets are new the existing deletion file is returned as is.
///
/// # Errors
/// - [`Error::InvalidInput`] if an offset is `>= physical_rows`, or nothing
///   is deleted in a fragment that has no deletion file
pub fn mark_deleted(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    fragment: &Fragment,
    read_version: u64,
    offsets: &[u32],
    sparse_max: usize,
) -> Result<Option<DeletionFile>> {
    match apply_deletions(store, paths, fragment, read_version, offsets, sparse_max)? {
        DeletionOutcome::FullyDeleted => Ok(None),
        DeletionOutcome::Updated(file) => Ok(Some(file)),
        DeletionOutcome::Unchanged => match &fragment.deletion_file {
            Some(file) => Ok(Some(file.clone())),
            None => Err(Error::invalid_input(format!(
                "no rows to delete in fragment {}",
                fragment.id
            ))),
        },
    }
}

/// Like [`mark_deleted`] but reports whether anything changed.
pub fn apply_deletions(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    fragment: &Fragment,
    read_version: u64,
    offsets: &[u32],
    sparse_max: usize,
) -> Result<DeletionOutcome> {
    if let Some(&bad) = offsets.iter().find(|&&o| o as u64 >= fragment.physical_rows) {
        return Err(Error::invalid_input(format!(
            "offset {} is out of range for fragment {} with {} rows",
            bad, fragment.id, fragment.physical_rows
        )));
    }
    let mut dv = read_deletion_vector(store, paths, fragment)?;
    let before = dv.len();
    dv.extend(offsets.iter().copied());
    if dv.len() == before {
        return Ok(DeletionOutcome::Unchanged);
    }
    if dv.len() as u64 >= fragment.physical_rows {
        return Ok(DeletionOutcome::FullyDeleted);
    }
    match write_deletion_file(store, paths, fragment, read_version, &dv, sparse_max)? {
        Some(file) => Ok(DeletionOutcome::Updated(file)),
        None => Ok(DeletionOutcome::Unchanged),
    }
}

/// Deletion vector of a fragment, or an empty one
pub fn deleted_rows(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    fragment: &Fragment,
) -> Result<DeletionVector> {
    read_deletion_vector(store, paths, fragment)
}
