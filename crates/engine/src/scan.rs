//! Row-level readers over a manifest
//!
//! Column values live in data files owned by the file-format layer; these
//! readers resolve which rows a version exposes and where they live.

use crate::filter::RowFilter;
use crate::row_id_index::RowIdIndex;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use tessel_core::{DeletionVector, Error, Manifest, Result, RowAddress};
use tessel_durability::{read_deletion_vector, read_row_ids};
use tessel_storage::{ObjectStore, TablePaths};

/// Options for [`scan`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions<'a> {
    /// Also yield soft-deleted rows, flagged with [`ScanRow::deleted`]
    pub include_deleted: bool,
    /// Only yield rows this filter selects
    pub filter: Option<&'a dyn RowFilter>,
}

impl<'a> ScanOptions<'a> {
    /// Include deleted rows (builder pattern)
    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Restrict to rows matching `filter` (builder pattern)
    pub fn with_filter(mut self, filter: &'a dyn RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// One row yielded by [`scan`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRow {
    /// Stable row id, or the address when stable row ids are off
    pub row_id: u64,
    /// Current physical location
    pub address: RowAddress,
    /// True if the row is soft-deleted
    pub deleted: bool,
}

/// Rows of `manifest` in fragment order.
///
/// Deleted rows are skipped unless `options.include_deleted` is set; the
/// filter is applied on top of the deletion overlay.
pub fn scan(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    manifest: &Manifest,
    options: &ScanOptions<'_>,
) -> Result<Vec<ScanRow>> {
    let stable = manifest.uses_stable_row_ids();
    let mut rows = Vec::new();
    for fragment in &manifest.fragments {
        let dv = read_deletion_vector(store, paths, fragment)?;
        let selected: Option<BTreeSet<u32>> = match options.filter {
            Some(filter) => Some(filter.matching_offsets(fragment)?.into_iter().collect()),
            None => None,
        };
        let row_ids: Option<Vec<u64>> = if stable {
            let meta = fragment.row_id_meta.as_ref().ok_or_else(|| {
                Error::corrupt_manifest(
                    "scan",
                    format!("fragment {} has no row id sequence", fragment.id),
                )
            })?;
            Some(read_row_ids(store, meta)?.iter().collect())
        } else {
            None
        };

        let physical = u32::try_from(fragment.physical_rows)
            .map_err(|_| Error::invalid_input(format!("fragment {} is too large", fragment.id)))?;
        for offset in 0..physical {
            let deleted = dv.contains(offset);
            if deleted && !options.include_deleted {
                continue;
            }
            if selected.as_ref().is_some_and(|s| !s.contains(&offset)) {
                continue;
            }
            let address = RowAddress::try_new(fragment.id, offset)?;
            let row_id = match &row_ids {
                Some(ids) => *ids.get(offset as usize).ok_or_else(|| {
                    Error::corrupt_manifest(
                        "scan",
                        format!(
                            "fragment {} has {} rows but fewer row ids",
                            fragment.id, fragment.physical_rows
                        ),
                    )
                })?,
                None => address.as_u64(),
            };
            rows.push(ScanRow {
                row_id,
                address,
                deleted,
            });
        }
    }
    Ok(rows)
}

/// Resolve row ids to live addresses.
///
/// Unknown and deleted rows resolve to `None`; the output is parallel to
/// `row_ids`.
pub fn take_rows(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    manifest: &Manifest,
    index: &RowIdIndex,
    row_ids: &[u64],
) -> Result<Vec<Option<RowAddress>>> {
    let mut deletions: FxHashMap<u64, DeletionVector> = FxHashMap::default();
    let mut out = Vec::with_capacity(row_ids.len());
    for &row_id in row_ids {
        let Some(address) = index.get(row_id) else {
            out.push(None);
            continue;
        };
        let fragment_id = address.fragment_id() as u64;
        let Some(fragment) = manifest.fragment(fragment_id) else {
            out.push(None);
            continue;
        };
        if !deletions.contains_key(&fragment_id) {
            deletions.insert(fragment_id, read_deletion_vector(store, paths, fragment)?);
        }
        let deleted = deletions
            .get(&fragment_id)
            .is_some_and(|dv| dv.contains(address.offset()));
        out.push(if deleted { None } else { Some(address) });
    }
    Ok(out)
}
