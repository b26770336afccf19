//! Fragment model
//!
//! A fragment is a horizontal slice of the table: a set of data files that
//! together cover the same rows, plus an optional soft-delete overlay and
//! the fragment's row-id sequence.
//!
//! # Invariants
//!
//! - `current_rows() == physical_rows - num_deleted_rows`
//! - `num_deleted_rows < physical_rows` (a fully deleted fragment is dropped
//!   from the manifest instead of carrying a full overlay)
//! - Fragment id 0 means "not yet assigned"; the commit path assigns ids
//!   starting at `max_fragment_id + 1`

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Field id of a data-file slot that has not been assigned yet
pub const FIELD_ID_UNASSIGNED: i32 = -1;

/// Field id of a data-file slot whose field was dropped or moved elsewhere
pub const FIELD_ID_TOMBSTONE: i32 = -2;

/// Column index for a field without a dedicated top-level column
pub const COLUMN_INDEX_NONE: i32 = -1;

/// Fragment id of a staged fragment that the commit path has not numbered
pub const UNASSIGNED_FRAGMENT_ID: u64 = 0;

/// Major version of the data file format written by default
pub const DEFAULT_FILE_MAJOR_VERSION: u32 = 2;

/// Minor version of the data file format written by default
pub const DEFAULT_FILE_MINOR_VERSION: u32 = 0;

/// Reference to one immutable column file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFile {
    /// Path relative to the table's `data/` directory
    pub path: String,
    /// Field ids stored in this file
    pub fields: Vec<i32>,
    /// Physical column position for each entry in `fields`
    pub column_indices: Vec<i32>,
    /// File format major version
    pub file_major_version: u32,
    /// File format minor version
    pub file_minor_version: u32,
    /// Size in bytes, if known at write time
    pub file_size_bytes: Option<u64>,
}

impl DataFile {
    /// Create a data file whose columns are laid out in field order.
    pub fn new(path: impl Into<String>, fields: Vec<i32>) -> Self {
        let column_indices = (0..fields.len() as i32).collect();
        DataFile {
            path: path.into(),
            fields,
            column_indices,
            file_major_version: DEFAULT_FILE_MAJOR_VERSION,
            file_minor_version: DEFAULT_FILE_MINOR_VERSION,
            file_size_bytes: None,
        }
    }

    /// Create a data file with an explicit field-to-column mapping.
    pub fn with_column_indices(
        path: impl Into<String>,
        fields: Vec<i32>,
        column_indices: Vec<i32>,
    ) -> Result<Self> {
        let file = DataFile {
            column_indices,
            ..DataFile::new(path, fields)
        };
        file.validate()?;
        Ok(file)
    }

    /// Record the file size (builder pattern)
    pub fn with_size(mut self, bytes: u64) -> Self {
        self.file_size_bytes = Some(bytes);
        self
    }

    /// Check column mapping and field ordering.
    pub fn validate(&self) -> Result<()> {
        if self.column_indices.len() != self.fields.len() {
            return Err(Error::invalid_input(format!(
                "data file '{}' has {} fields but {} column indices",
                self.path,
                self.fields.len(),
                self.column_indices.len()
            )));
        }
        let mut seen = HashSet::new();
        for &col in self.column_indices.iter().filter(|&&c| c >= 0) {
            if !seen.insert(col) {
                return Err(Error::invalid_input(format!(
                    "data file '{}' maps column {} twice",
                    self.path, col
                )));
            }
        }
        let active: Vec<i32> = self.active_fields().collect();
        if active.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::invalid_input(format!(
                "data file '{}' field ids are not sorted",
                self.path
            )));
        }
        Ok(())
    }

    /// Field ids that still hold live data
    pub fn active_fields(&self) -> impl Iterator<Item = i32> + '_ {
        self.fields.iter().copied().filter(|&id| id >= 0)
    }

    /// Replace dropped field ids with [`FIELD_ID_TOMBSTONE`].
    ///
    /// Returns true if any slot changed.
    pub fn tombstone_fields(&mut self, dropped: &BTreeSet<i32>) -> bool {
        let mut changed = false;
        for id in self.fields.iter_mut() {
            if *id >= 0 && dropped.contains(id) {
                *id = FIELD_ID_TOMBSTONE;
                changed = true;
            }
        }
        changed
    }

    /// True if no field in this file is still live
    pub fn is_fully_tombstoned(&self) -> bool {
        self.active_fields().next().is_none()
    }
}

/// Encoding of a deletion file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeletionFileType {
    /// Sorted list of deleted offsets
    SparseArray,
    /// Roaring bitmap of deleted offsets
    Bitmap,
}

impl DeletionFileType {
    /// File extension used in the deletion file path
    pub fn suffix(&self) -> &'static str {
        match self {
            DeletionFileType::SparseArray => "arrow",
            DeletionFileType::Bitmap => "bin",
        }
    }
}

/// Soft-delete overlay for one fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionFile {
    /// On-disk encoding
    pub file_type: DeletionFileType,
    /// Manifest version the overlay was computed against
    pub read_version: u64,
    /// Random disambiguator between concurrent writers
    pub id: u64,
    /// Number of deleted offsets in the file
    pub num_deleted_rows: u64,
}

/// Location of a row-id sequence stored outside the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalFile {
    /// Object store path relative to the table root
    pub path: String,
    /// Byte offset of the sequence within the file
    pub offset: u64,
    /// Encoded size in bytes
    pub size: u64,
}

/// Where a fragment's row-id sequence lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowIdMeta {
    /// Encoded sequence stored directly in the manifest
    Inline(Vec<u8>),
    /// Encoded sequence stored in a separate object
    External(ExternalFile),
}

/// A horizontal slice of the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Fragment id, unique for the table's lifetime
    pub id: u64,
    /// Column files covering this fragment's rows
    pub files: Vec<DataFile>,
    /// Row count before deletions
    pub physical_rows: u64,
    /// Soft-delete overlay, if any rows were deleted
    pub deletion_file: Option<DeletionFile>,
    /// Row-id sequence, present when stable row ids are enabled
    pub row_id_meta: Option<RowIdMeta>,
}

impl Fragment {
    /// Create an empty fragment with the given id
    pub fn new(id: u64) -> Self {
        Fragment {
            id,
            files: Vec::new(),
            physical_rows: 0,
            deletion_file: None,
            row_id_meta: None,
        }
    }

    /// Create a staged (unnumbered) fragment from data files
    pub fn staged(files: Vec<DataFile>, physical_rows: u64) -> Self {
        Fragment {
            files,
            physical_rows,
            ..Fragment::new(UNASSIGNED_FRAGMENT_ID)
        }
    }

    /// Add a data file (builder pattern)
    pub fn with_file(mut self, file: DataFile) -> Self {
        self.files.push(file);
        self
    }

    /// Set the physical row count (builder pattern)
    pub fn with_physical_rows(mut self, rows: u64) -> Self {
        self.physical_rows = rows;
        self
    }

    /// True if the commit path still has to assign an id
    pub fn is_unassigned(&self) -> bool {
        self.id == UNASSIGNED_FRAGMENT_ID
    }

    /// Number of soft-deleted rows
    pub fn num_deleted_rows(&self) -> u64 {
        self.deletion_file
            .as_ref()
            .map(|d| d.num_deleted_rows)
            .unwrap_or(0)
    }

    /// Rows visible to readers
    pub fn current_rows(&self) -> u64 {
        self.physical_rows.saturating_sub(self.num_deleted_rows())
    }

    /// Fraction of physical rows that are soft-deleted
    pub fn deleted_fraction(&self) -> f64 {
        if self.physical_rows == 0 {
            return 0.0;
        }
        self.num_deleted_rows() as f64 / self.physical_rows as f64
    }

    /// Live field ids across all data files
    pub fn field_ids(&self) -> BTreeSet<i32> {
        self.files.iter().flat_map(|f| f.active_fields()).collect()
    }

    /// The data file holding `field_id`, if any
    pub fn file_for_field(&self, field_id: i32) -> Option<&DataFile> {
        self.files
            .iter()
            .find(|f| f.active_fields().any(|id| id == field_id))
    }

    /// Check per-file invariants and the deletion count bound.
    pub fn validate(&self) -> Result<()> {
        for file in &self.files {
            file.validate()?;
        }
        let mut seen = BTreeSet::new();
        for id in self.files.iter().flat_map(|f| f.active_fields()) {
            if !seen.insert(id) {
                return Err(Error::invalid_input(format!(
                    "fragment {} stores field {} in more than one file",
                    self.id, id
                )));
            }
        }
        if self.num_deleted_rows() >= self.physical_rows && self.deletion_file.is_some() {
            return Err(Error::invalid_input(format!(
                "fragment {} deletes {} of {} rows; fully deleted fragments must be removed",
                self.id,
                self.num_deleted_rows(),
                self.physical_rows
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment_with_deletions(physical: u64, deleted: u64) -> Fragment {
        let mut frag = Fragment::new(3)
            .with_file(DataFile::new("a.lance", vec![0, 1]))
            .with_physical_rows(physical);
        if deleted > 0 {
            frag.deletion_file = Some(DeletionFile {
                file_type: DeletionFileType::SparseArray,
                read_version: 1,
                id: 42,
                num_deleted_rows: deleted,
            });
        }
        frag
    }

    #[test]
    fn test_current_rows() {
        assert_eq!(fragment_with_deletions(100, 0).current_rows(), 100);
        assert_eq!(fragment_with_deletions(100, 25).current_rows(), 75);
        assert!((fragment_with_deletions(100, 25).deleted_fraction() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_full_deletion_overlay_is_invalid() {
        let frag = fragment_with_deletions(4, 4);
        assert!(frag.validate().is_err());
        assert!(fragment_with_deletions(4, 3).validate().is_ok());
    }

    #[test]
    fn test_data_file_duplicate_columns_rejected() {
        let err = DataFile::with_column_indices("a.lance", vec![0, 1], vec![0, 0]);
        assert!(err.is_err());
        // Fields without a dedicated column may repeat -1
        let ok = DataFile::with_column_indices("a.lance", vec![0, 1, 2], vec![0, -1, -1]);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_data_file_length_mismatch_rejected() {
        assert!(DataFile::with_column_indices("a.lance", vec![0, 1], vec![0]).is_err());
    }

    #[test]
    fn test_unsorted_fields_rejected() {
        let file = DataFile::new("a.lance", vec![2, 1]);
        assert!(file.validate().is_err());
        // Tombstones are ignored for ordering
        let file = DataFile::new("a.lance", vec![1, FIELD_ID_TOMBSTONE, 3]);
        assert!(file.validate().is_ok());
    }

    #[test]
    fn test_tombstone_fields() {
        let mut file = DataFile::new("a.lance", vec![0, 1, 2]);
        assert!(file.tombstone_fields(&[1].into_iter().collect()));
        assert_eq!(file.fields, vec![0, FIELD_ID_TOMBSTONE, 2]);
        assert!(!file.tombstone_fields(&[7].into_iter().collect()));
        file.tombstone_fields(&[0, 2].into_iter().collect());
        assert!(file.is_fully_tombstoned());
    }

    #[test]
    fn test_field_in_two_files_rejected() {
        let frag = Fragment::new(1)
            .with_file(DataFile::new("a.lance", vec![0, 1]))
            .with_file(DataFile::new("b.lance", vec![1]))
            .with_physical_rows(10);
        assert!(frag.validate().is_err());
    }

    #[test]
    fn test_staged_fragment_is_unassigned() {
        let frag = Fragment::staged(vec![DataFile::new("a.lance", vec![0])], 10);
        assert!(frag.is_unassigned());
        assert_eq!(frag.file_for_field(0).unwrap().path, "a.lance");
        assert!(frag.file_for_field(1).is_none());
    }

    #[test]
    fn test_deletion_suffix() {
        assert_eq!(DeletionFileType::SparseArray.suffix(), "arrow");
        assert_eq!(DeletionFileType::Bitmap.suffix(), "bin");
    }
}
