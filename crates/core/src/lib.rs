//! Core types for Tessel
//!
//! This crate defines the table model shared by every other crate:
//! - Error: typed error taxonomy for commits, decoding and I/O
//! - Schema/Field: depth-first schema with stable field ids
//! - Fragment/DataFile/DeletionFile: the physical layout of table rows
//! - RowAddress: packed (fragment, offset) physical location
//! - RowIdSequence: per-fragment stable row ids
//! - DeletionVector: decoded soft-delete sets
//! - Manifest: immutable per-version snapshot
//! - Feature flags: reader/writer compatibility bits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod deletion;
pub mod error;
pub mod feature_flags;
pub mod fragment;
pub mod manifest;
pub mod rowids;
pub mod schema;

pub use address::RowAddress;
pub use deletion::{preferred_file_type, DeletionVector, BITMAP_THRESHOLD};
pub use error::{Error, Result};
pub use feature_flags::{
    apply_feature_flags, can_read, can_write, FLAG_DELETION_FILES, FLAG_STABLE_ROW_IDS,
    FLAG_TABLE_CONFIG,
};
pub use fragment::{
    DataFile, DeletionFile, DeletionFileType, ExternalFile, Fragment, RowIdMeta,
    FIELD_ID_TOMBSTONE, FIELD_ID_UNASSIGNED, UNASSIGNED_FRAGMENT_ID,
};
pub use manifest::{IndexMetadata, Manifest, ManifestNamingScheme, WriterVersion};
pub use rowids::{RowIdSequence, U64Segment};
pub use schema::{Field, Schema};
