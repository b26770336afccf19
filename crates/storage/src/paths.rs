//! Table directory layout
//!
//! ```text
//! <table_root>/
//!   data/*                        immutable column data files
//!   _versions/{name}.manifest     one manifest per version
//!   _indices/{uuid}/*             secondary index files
//!   _deletions/{fragment_id}-{read_version}-{id}.{arrow|bin}
//!   _transactions/{read_version}-{uuid}.txn
//!   _rowids/{uuid}.rowids         row-id sequences too large to inline
//!   _refs/tags/{tag}.txt          tag markers
//!   _blobs/                       blob sub-table with the same layout
//! ```

use crate::naming::manifest_file_name;
use tessel_core::{DeletionFile, ManifestNamingScheme};
use uuid::Uuid;

/// Directory of data files
pub const DATA_DIR: &str = "data";
/// Directory of manifests
pub const VERSIONS_DIR: &str = "_versions";
/// Directory of index files
pub const INDICES_DIR: &str = "_indices";
/// Directory of deletion files
pub const DELETIONS_DIR: &str = "_deletions";
/// Directory of transaction files
pub const TRANSACTIONS_DIR: &str = "_transactions";
/// Directory of external row-id sequences
pub const ROW_IDS_DIR: &str = "_rowids";
/// Directory of tag markers
pub const TAGS_DIR: &str = "_refs/tags";
/// Directory of the blob sub-table
pub const BLOBS_DIR: &str = "_blobs";

/// Path builder for one table inside an object store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TablePaths {
    base: String,
}

impl TablePaths {
    /// Layout rooted at the store root
    pub fn root() -> Self {
        TablePaths::default()
    }

    /// Layout rooted at a sub-directory
    pub fn at(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        TablePaths { base }
    }

    /// Layout of the blob sub-table
    pub fn blobs(&self) -> Self {
        TablePaths::at(self.join(BLOBS_DIR))
    }

    /// Base prefix ("" for the store root)
    pub fn base(&self) -> &str {
        &self.base
    }

    fn join(&self, rel: &str) -> String {
        if self.base.is_empty() {
            rel.to_string()
        } else {
            format!("{}/{}", self.base, rel)
        }
    }

    /// `_versions/` listing prefix
    pub fn versions_prefix(&self) -> String {
        self.join(&format!("{}/", VERSIONS_DIR))
    }

    /// Canonical manifest path for a version
    pub fn manifest(&self, scheme: ManifestNamingScheme, version: u64) -> String {
        self.join(&format!(
            "{}/{}",
            VERSIONS_DIR,
            manifest_file_name(scheme, version)
        ))
    }

    /// Transaction file path
    pub fn transaction(&self, read_version: u64, uuid: &Uuid) -> String {
        self.join(&format!(
            "{}/{}-{}.txn",
            TRANSACTIONS_DIR, read_version, uuid
        ))
    }

    /// `_transactions/` listing prefix
    pub fn transactions_prefix(&self) -> String {
        self.join(&format!("{}/", TRANSACTIONS_DIR))
    }

    /// Deletion file path for a fragment
    pub fn deletion_file(&self, fragment_id: u64, deletion: &DeletionFile) -> String {
        self.join(&format!(
            "{}/{}-{}-{}.{}",
            DELETIONS_DIR,
            fragment_id,
            deletion.read_version,
            deletion.id,
            deletion.file_type.suffix()
        ))
    }

    /// `_deletions/` listing prefix
    pub fn deletions_prefix(&self) -> String {
        self.join(&format!("{}/", DELETIONS_DIR))
    }

    /// Data file path from the name stored in a [`tessel_core::DataFile`]
    pub fn data_file(&self, name: &str) -> String {
        self.join(&format!("{}/{}", DATA_DIR, name))
    }

    /// `data/` listing prefix
    pub fn data_prefix(&self) -> String {
        self.join(&format!("{}/", DATA_DIR))
    }

    /// Directory holding an index's files
    pub fn index_dir(&self, uuid: &Uuid) -> String {
        self.join(&format!("{}/{}", INDICES_DIR, uuid))
    }

    /// External row-id sequence path
    pub fn row_ids(&self, uuid: &Uuid) -> String {
        self.join(&format!("{}/{}.rowids", ROW_IDS_DIR, uuid))
    }

    /// `_rowids/` listing prefix
    pub fn row_ids_prefix(&self) -> String {
        self.join(&format!("{}/", ROW_IDS_DIR))
    }

    /// Tag marker path
    pub fn tag(&self, name: &str) -> String {
        self.join(&format!("{}/{}.txt", TAGS_DIR, name))
    }

    /// `_refs/tags/` listing prefix
    pub fn tags_prefix(&self) -> String {
        self.join(&format!("{}/", TAGS_DIR))
    }
}
