//! Manifest: the immutable snapshot of a table at one version
//!
//! A manifest lists the schema, the live fragments, secondary index
//! descriptors, feature flags and the id counters. Once published it is
//! never modified; every change produces a new manifest with a higher
//! version.

use crate::error::{Error, Result};
use crate::feature_flags::FLAG_STABLE_ROW_IDS;
use crate::fragment::Fragment;
use crate::schema::Schema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// How manifest files are named inside `_versions/`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ManifestNamingScheme {
    /// `{version}.manifest`
    V1,
    /// `{u64::MAX - version:020}.manifest`, sorting newest first
    #[default]
    V2,
}

/// Library that wrote a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterVersion {
    /// Library name
    pub library: String,
    /// Semver string
    pub version: String,
}

impl Default for WriterVersion {
    fn default() -> Self {
        WriterVersion {
            library: "tessel".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Descriptor of a secondary index; the index data lives in `_indices/{uuid}/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Identifies the index files
    pub uuid: Uuid,
    /// User-facing name, unique among live indices
    pub name: String,
    /// Indexed field ids
    pub fields: Vec<i32>,
    /// Version the index was built against
    pub dataset_version: u64,
    /// Fragments covered by the index
    pub fragment_ids: BTreeSet<u64>,
}

impl IndexMetadata {
    /// Create a descriptor with a fresh uuid
    pub fn new(
        name: impl Into<String>,
        fields: Vec<i32>,
        dataset_version: u64,
        fragment_ids: BTreeSet<u64>,
    ) -> Self {
        IndexMetadata {
            uuid: Uuid::new_v4(),
            name: name.into(),
            fields,
            dataset_version,
            fragment_ids,
        }
    }

    /// True if the index covers any of the given fields
    pub fn covers_any_field(&self, fields: &BTreeSet<i32>) -> bool {
        self.fields.iter().any(|f| fields.contains(f))
    }
}

/// Immutable table snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Table schema
    pub schema: Schema,
    /// Live fragments in insertion order
    pub fragments: Vec<Fragment>,
    /// Version number, starting at 1
    pub version: u64,
    /// Next row id to hand out; 0 means no row was ever written
    pub next_row_id: u64,
    /// Highest fragment id ever assigned
    pub max_fragment_id: u64,
    /// Features a reader must understand
    pub reader_feature_flags: u64,
    /// Features a writer must understand
    pub writer_feature_flags: u64,
    /// Free-form table configuration
    pub config: BTreeMap<String, String>,
    /// Tag bound to this version
    pub tag: Option<String>,
    /// Library that wrote this manifest
    pub writer_version: WriterVersion,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Path of the transaction file that produced this version
    pub transaction_file: Option<String>,
    /// Secondary index descriptors
    pub indices: Vec<IndexMetadata>,
    /// Naming scheme of the table's manifest files
    pub naming_scheme: ManifestNamingScheme,
    /// Version of the `_blobs` sub-table committed alongside this version
    pub blob_dataset_version: Option<u64>,
}

impl Manifest {
    /// Create a version-1 manifest. Fragment ids must already be assigned.
    pub fn new(
        schema: Schema,
        fragments: Vec<Fragment>,
        naming_scheme: ManifestNamingScheme,
    ) -> Self {
        let max_fragment_id = fragments.iter().map(|f| f.id).max().unwrap_or(0);
        Manifest {
            schema,
            fragments,
            version: 1,
            next_row_id: 0,
            max_fragment_id,
            reader_feature_flags: 0,
            writer_feature_flags: 0,
            config: BTreeMap::new(),
            tag: None,
            writer_version: WriterVersion::default(),
            timestamp: Utc::now(),
            transaction_file: None,
            indices: Vec::new(),
            naming_scheme,
            blob_dataset_version: None,
        }
    }

    /// Start the next version from this one.
    ///
    /// Copies everything except the per-version fields (tag, transaction
    /// file, timestamp, writer).
    pub fn next_version(&self) -> Manifest {
        Manifest {
            version: self.version + 1,
            tag: None,
            transaction_file: None,
            timestamp: Utc::now(),
            writer_version: WriterVersion::default(),
            ..self.clone()
        }
    }

    /// Look up a live fragment
    pub fn fragment(&self, id: u64) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.id == id)
    }

    /// Ids of all live fragments
    pub fn fragment_ids(&self) -> BTreeSet<u64> {
        self.fragments.iter().map(|f| f.id).collect()
    }

    /// Rows visible to readers
    pub fn count_rows(&self) -> u64 {
        self.fragments.iter().map(|f| f.current_rows()).sum()
    }

    /// Rows including soft-deleted ones
    pub fn count_physical_rows(&self) -> u64 {
        self.fragments.iter().map(|f| f.physical_rows).sum()
    }

    /// Number of soft-deleted rows
    pub fn count_deleted_rows(&self) -> u64 {
        self.fragments.iter().map(|f| f.num_deleted_rows()).sum()
    }

    /// True if the table tracks stable row ids
    pub fn uses_stable_row_ids(&self) -> bool {
        self.reader_feature_flags & FLAG_STABLE_ROW_IDS != 0
    }

    /// Look up a live index by name
    pub fn index(&self, name: &str) -> Option<&IndexMetadata> {
        self.indices.iter().find(|i| i.name == name)
    }

    /// Check id uniqueness and counters.
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 {
            return Err(Error::internal("manifest version must start at 1"));
        }
        let mut seen = BTreeSet::new();
        for frag in &self.fragments {
            if frag.is_unassigned() {
                return Err(Error::internal("manifest contains an unassigned fragment id"));
            }
            if frag.id > self.max_fragment_id {
                return Err(Error::internal(format!(
                    "fragment id {} exceeds max_fragment_id {}",
                    frag.id, self.max_fragment_id
                )));
            }
            if !seen.insert(frag.id) {
                return Err(Error::internal(format!(
                    "fragment id {} appears twice",
                    frag.id
                )));
            }
            frag.validate()?;
        }
        let mut names = BTreeSet::new();
        for index in &self.indices {
            if !names.insert(index.name.as_str()) {
                return Err(Error::internal(format!(
                    "index name '{}' appears twice",
                    index.name
                )));
            }
        }
        self.schema.validate()
    }
}
