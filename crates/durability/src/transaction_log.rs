//! Transaction log entries
//!
//! Every committed version records the transaction that produced it in
//! `_transactions/{read_version}-{uuid}.txn`. Later writers read these files
//! to decide whether their own operation conflicts with what was committed
//! after they started.
//!
//! ## Core Guarantees
//!
//! 1. **Write once**: a transaction file is never modified after it is written
//! 2. **Retained**: cleanup never deletes transaction files
//! 3. **Closed set**: `Operation` is a closed tagged union; a file naming an
//!    operation this build does not know fails to decode, and the commit path
//!    treats that as a conflict

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tessel_core::{DataFile, Fragment, IndexMetadata, Schema};
use uuid::Uuid;

/// One compaction group: old fragments replaced by new ones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteGroup {
    /// Fragments being replaced, as they were at read time
    pub old_fragments: Vec<Fragment>,
    /// Replacement fragments (ids may be unassigned)
    pub new_fragments: Vec<Fragment>,
}

/// An index whose fragment coverage is remapped by a rewrite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewrittenIndex {
    /// Uuid of the index before the rewrite
    pub old_id: Uuid,
    /// Uuid of the remapped index files
    pub new_id: Uuid,
}

/// Replacement of one data file within an existing fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataReplacementGroup {
    /// Fragment receiving the new file
    pub fragment_id: u64,
    /// New file; its field ids select the file it replaces
    pub new_file: DataFile,
}

/// What a transaction does to the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Add new fragments
    Append {
        /// Staged fragments
        fragments: Vec<Fragment>,
    },
    /// Soft-delete rows
    Delete {
        /// Fragments with new deletion files
        updated_fragments: Vec<Fragment>,
        /// Fragments whose rows were all deleted
        deleted_fragment_ids: Vec<u64>,
        /// Predicate that selected the rows
        predicate: String,
    },
    /// Replace the whole table
    Overwrite {
        /// New schema
        schema: Schema,
        /// New fragments
        fragments: Vec<Fragment>,
        /// Config entries to set on the new version
        config_upsert: Option<BTreeMap<String, String>>,
    },
    /// Add columns to every fragment
    Merge {
        /// Every fragment of the table with its new files
        fragments: Vec<Fragment>,
        /// Schema including the new columns
        schema: Schema,
    },
    /// Rename, drop or reorder columns without touching data
    Project {
        /// New schema
        schema: Schema,
    },
    /// Rewrite rows in place
    Update {
        /// Fragments removed entirely
        removed_fragment_ids: Vec<u64>,
        /// Existing fragments with new files or deletion files
        updated_fragments: Vec<Fragment>,
        /// Fragments holding the rewritten rows
        new_fragments: Vec<Fragment>,
        /// Fields whose values changed; empty means every field
        fields_modified: Vec<i32>,
    },
    /// Compaction
    Rewrite {
        /// Old/new fragment groups
        groups: Vec<RewriteGroup>,
        /// Indices remapped onto the new fragments
        rewritten_indices: Vec<RewrittenIndex>,
    },
    /// Add or replace secondary indices
    CreateIndex {
        /// Indices to add; an existing index with the same name is replaced
        new_indices: Vec<IndexMetadata>,
        /// Indices to remove
        removed_indices: Vec<IndexMetadata>,
    },
    /// Swap data files of existing fragments
    DataReplacement {
        /// Per-fragment replacements
        replacements: Vec<DataReplacementGroup>,
    },
    /// Re-publish an older version as the newest one
    Restore {
        /// Version to restore
        version: u64,
    },
    /// Reserve fragment ids ahead of a commit
    ReserveFragments {
        /// How many ids to reserve
        num_fragments: u32,
    },
    /// Edit the table config map
    UpdateConfig {
        /// Keys to insert or replace
        upsert_values: BTreeMap<String, String>,
        /// Keys to remove
        delete_keys: Vec<String>,
    },
}

impl Operation {
    /// Short name used in logs and conflict messages
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Append { .. } => "Append",
            Operation::Delete { .. } => "Delete",
            Operation::Overwrite { .. } => "Overwrite",
            Operation::Merge { .. } => "Merge",
            Operation::Project { .. } => "Project",
            Operation::Update { .. } => "Update",
            Operation::Rewrite { .. } => "Rewrite",
            Operation::CreateIndex { .. } => "CreateIndex",
            Operation::DataReplacement { .. } => "DataReplacement",
            Operation::Restore { .. } => "Restore",
            Operation::ReserveFragments { .. } => "ReserveFragments",
            Operation::UpdateConfig { .. } => "UpdateConfig",
        }
    }

    /// True for operations that replace the whole table state
    pub fn replaces_table(&self) -> bool {
        matches!(self, Operation::Overwrite { .. } | Operation::Restore { .. })
    }

    /// Ids of pre-existing fragments this operation modifies or removes
    pub fn modified_fragment_ids(&self) -> BTreeSet<u64> {
        match self {
            Operation::Delete {
                updated_fragments,
                deleted_fragment_ids,
                ..
            } => updated_fragments
                .iter()
                .map(|f| f.id)
                .chain(deleted_fragment_ids.iter().copied())
                .collect(),
            Operation::Update {
                removed_fragment_ids,
                updated_fragments,
                ..
            } => updated_fragments
                .iter()
                .map(|f| f.id)
                .chain(removed_fragment_ids.iter().copied())
                .collect(),
            Operation::Rewrite { groups, .. } => groups
                .iter()
                .flat_map(|g| g.old_fragments.iter().map(|f| f.id))
                .collect(),
            Operation::DataReplacement { replacements } => {
                replacements.iter().map(|r| r.fragment_id).collect()
            }
            Operation::Merge { fragments, .. } => fragments.iter().map(|f| f.id).collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Field ids whose stored values this operation changes.
    ///
    /// `None` means every field (a whole-row rewrite).
    pub fn written_fields(&self) -> Option<BTreeSet<i32>> {
        match self {
            Operation::Update {
                fields_modified, ..
            } if fields_modified.is_empty() => None,
            Operation::Update {
                fields_modified, ..
            } => Some(fields_modified.iter().copied().collect()),
            Operation::DataReplacement { replacements } => Some(
                replacements
                    .iter()
                    .flat_map(|r| r.new_file.active_fields())
                    .collect(),
            ),
            _ => Some(BTreeSet::new()),
        }
    }
}

/// One attempt to move the table from `read_version` to a new version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Version the writer observed before staging changes
    pub read_version: u64,
    /// Identifies this transaction across retries
    pub uuid: Uuid,
    /// What the transaction does
    pub operation: Operation,
    /// Tag to bind to the new version
    pub tag: Option<String>,
    /// Operation to commit on the `_blobs` sub-table first
    pub blobs_op: Option<Operation>,
}

impl Transaction {
    /// Create a transaction with a fresh uuid
    pub fn new(read_version: u64, operation: Operation) -> Self {
        Transaction {
            read_version,
            uuid: Uuid::new_v4(),
            operation,
            tag: None,
            blobs_op: None,
        }
    }

    /// Bind a tag to the committed version (builder pattern)
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Attach a blob sub-table operation (builder pattern)
    pub fn with_blobs_op(mut self, op: Operation) -> Self {
        self.blobs_op = Some(op);
        self
    }
}
