//! The `Table` handle
//!
//! A `Table` is pinned to one manifest. Reads (`scan`, `take_rows`,
//! `count_rows`) see exactly that version. Writes build an [`Operation`],
//! commit it with the handle's version as the read version, and move the
//! handle to the version they produced. Handles are cheap to clone; give
//! each writer thread its own.
//!
//! ## Commit Sequence
//!
//! ```text
//! writer                          CommitCoordinator
//!   |  stage files / side files        |
//!   |  build Operation                 |
//!   |--- Transaction(read_version) --->|
//!   |                                  |  check versions after read_version
//!   |                                  |  rebase onto latest
//!   |                                  |  write _transactions/{v}-{uuid}.txn
//!   |                                  |  publish _versions/{v+1}
//!   |<-------- new Manifest -----------|
//! ```

pub mod builder;
pub mod config;
pub(crate) mod tags;

pub use builder::TableBuilder;
pub use config::{ConfigError, TableConfig, CONFIG_FILE_NAME};

use crate::cleanup::{cleanup_old_versions, CleanupStats};
use crate::compaction::{
    plan_compaction, prepare_rewrite, CompactionMetrics, CompactionOptions, FragmentRewriter,
};
use crate::deletion::{apply_deletions, DeletionOutcome};
use crate::filter::{OffsetFilter, RowFilter};
use crate::row_id_index::RowIdIndex;
use crate::scan::{scan, take_rows, ScanOptions, ScanRow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tessel_concurrency::CommitCoordinator;
use tessel_core::{Error, Fragment, IndexMetadata, Manifest, Result, RowAddress, Schema};
use tessel_durability::{DataReplacementGroup, Operation, Transaction};
use tessel_storage::ObjectStore;
use tracing::{debug, info};

/// Summary of one published version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Version number
    pub version: u64,
    /// When the manifest was written
    pub timestamp: DateTime<Utc>,
    /// Tag recorded in the manifest, if any
    pub tag: Option<String>,
}

/// Deletions computed for a set of fragments
#[derive(Debug, Default)]
struct DeletionPlan {
    updated: Vec<Fragment>,
    removed: Vec<u64>,
    rows: u64,
}

impl DeletionPlan {
    fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Handle to one version of a table
#[derive(Debug, Clone)]
pub struct Table {
    coordinator: CommitCoordinator,
    config: TableConfig,
    manifest: Arc<Manifest>,
    /// Lazily built index for `manifest`
    row_id_index: Arc<Mutex<Option<Arc<RowIdIndex>>>>,
}

impl Table {
    pub(crate) fn from_parts(
        coordinator: CommitCoordinator,
        config: TableConfig,
        manifest: Manifest,
    ) -> Self {
        Table {
            coordinator,
            config,
            manifest: Arc::new(manifest),
            row_id_index: Arc::new(Mutex::new(None)),
        }
    }

    /// Builder for tables at a sub-path, with an external store, or custom config
    pub fn builder(store: Arc<dyn ObjectStore>) -> TableBuilder {
        TableBuilder::new(store)
    }

    /// Create a table at the root of `store` from staged fragments
    pub fn create(
        store: Arc<dyn ObjectStore>,
        schema: Schema,
        fragments: Vec<Fragment>,
        config: TableConfig,
    ) -> Result<Table> {
        TableBuilder::new(store)
            .with_config(config)
            .create(schema, fragments)
    }

    /// Open the latest version of the table at the root of `store`
    pub fn open(store: Arc<dyn ObjectStore>, config: TableConfig) -> Result<Table> {
        TableBuilder::new(store).with_config(config).open()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Version this handle reads
    pub fn version(&self) -> u64 {
        self.manifest.version
    }

    /// Manifest this handle reads
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Current schema
    pub fn schema(&self) -> &Schema {
        &self.manifest.schema
    }

    /// Live rows
    pub fn count_rows(&self) -> u64 {
        self.manifest.count_rows()
    }

    /// Writer configuration
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Commit coordinator of this table
    pub fn coordinator(&self) -> &CommitCoordinator {
        &self.coordinator
    }

    fn store(&self) -> &dyn ObjectStore {
        &**self.coordinator.store()
    }

    fn set_manifest(&mut self, manifest: Manifest) {
        self.manifest = Arc::new(manifest);
        self.row_id_index = Arc::new(Mutex::new(None));
    }

    // ========================================================================
    // Versions
    // ========================================================================

    /// Newest published version
    pub fn latest_version(&self) -> Result<u64> {
        self.coordinator
            .handler()
            .resolve_latest(self.store(), self.coordinator.paths())?
            .map(|l| l.version)
            .ok_or_else(|| Error::NotFound {
                path: self.coordinator.paths().versions_prefix(),
            })
    }

    /// Every published version, ascending
    pub fn versions(&self) -> Result<Vec<VersionInfo>> {
        let locations = self
            .coordinator
            .handler()
            .list_versions(self.store(), self.coordinator.paths())?;
        locations
            .iter()
            .map(|location| {
                let manifest = self.coordinator.load_version(location.version)?;
                Ok(VersionInfo {
                    version: manifest.version,
                    timestamp: manifest.timestamp,
                    tag: manifest.tag,
                })
            })
            .collect()
    }

    /// Handle pinned to an older (or newer) version
    pub fn checkout_version(&self, version: u64) -> Result<Table> {
        let manifest = self.coordinator.load_version(version)?;
        Ok(Table::from_parts(
            self.coordinator.clone(),
            self.config.clone(),
            manifest,
        ))
    }

    /// Handle pinned to the version a tag points at
    pub fn checkout_tag(&self, name: &str) -> Result<Table> {
        self.checkout_version(self.tag_version(name)?)
    }

    /// Move this handle to the newest version
    pub fn checkout_latest(&mut self) -> Result<()> {
        let manifest = self.coordinator.load_latest()?.ok_or_else(|| Error::NotFound {
            path: self.coordinator.paths().versions_prefix(),
        })?;
        if manifest.version != self.manifest.version {
            self.set_manifest(manifest);
        }
        Ok(())
    }

    // ========================================================================
    // Commits
    // ========================================================================

    /// Commit an operation built against `read_version`.
    ///
    /// The handle moves to the new version.
    pub fn commit(&mut self, operation: Operation, read_version: u64) -> Result<u64> {
        self.commit_transaction(Transaction::new(read_version, operation))
    }

    /// Commit a prepared transaction (tags, blob operations).
    pub fn commit_transaction(&mut self, txn: Transaction) -> Result<u64> {
        let manifest = self.coordinator.commit(&txn)?;
        let version = manifest.version;
        self.set_manifest(manifest);
        Ok(version)
    }

    fn commit_op(&mut self, operation: Operation) -> Result<u64> {
        let read_version = self.version();
        self.commit(operation, read_version)
    }

    /// Add staged fragments
    pub fn append(&mut self, fragments: Vec<Fragment>) -> Result<u64> {
        self.commit_op(Operation::Append { fragments })
    }

    /// Replace the whole table
    pub fn overwrite(&mut self, schema: Schema, fragments: Vec<Fragment>) -> Result<u64> {
        self.commit_op(Operation::Overwrite {
            schema,
            fragments,
            config_upsert: None,
        })
    }

    fn plan_deletions(&self, filter: &dyn RowFilter) -> Result<DeletionPlan> {
        let mut plan = DeletionPlan::default();
        for fragment in &self.manifest.fragments {
            let offsets = filter.matching_offsets(fragment)?;
            if offsets.is_empty() {
                continue;
            }
            let outcome = apply_deletions(
                self.store(),
                self.coordinator.paths(),
                fragment,
                self.version(),
                &offsets,
                self.config.sparse_deletion_max,
            )?;
            match outcome {
                DeletionOutcome::Unchanged => {}
                DeletionOutcome::Updated(file) => {
                    plan.rows += file.num_deleted_rows - fragment.num_deleted_rows();
                    let mut updated = fragment.clone();
                    updated.deletion_file = Some(file);
                    plan.updated.push(updated);
                }
                DeletionOutcome::FullyDeleted => {
                    plan.rows += fragment.current_rows();
                    plan.removed.push(fragment.id);
                }
            }
        }
        Ok(plan)
    }

    /// Soft-delete the rows `filter` selects. Returns the number of rows deleted.
    ///
    /// Fragments that lose every row are removed from the manifest. Nothing
    /// is committed when no live row matches.
    pub fn delete(&mut self, filter: &dyn RowFilter) -> Result<u64> {
        let plan = self.plan_deletions(filter)?;
        if plan.is_empty() {
            return Ok(0);
        }
        debug!(
            target: "tessel::table",
            rows = plan.rows,
            removed = plan.removed.len(),
            "Deleting rows"
        );
        self.commit_op(Operation::Delete {
            updated_fragments: plan.updated,
            deleted_fragment_ids: plan.removed,
            predicate: filter.describe(),
        })?;
        Ok(plan.rows)
    }

    /// Soft-delete rows by stable row id. Unknown ids are ignored.
    pub fn delete_row_ids(&mut self, row_ids: &[u64]) -> Result<u64> {
        let addresses: Vec<RowAddress> = self.take_rows(row_ids)?.into_iter().flatten().collect();
        if addresses.is_empty() {
            return Ok(0);
        }
        self.delete(&OffsetFilter::from_addresses(addresses))
    }

    /// Rewrite the rows `filter` selects.
    ///
    /// The selected rows are deleted and `new_fragments` (staged, holding
    /// the updated rows) are added in the same version. Updated rows get
    /// new row ids. Returns the number of rows replaced.
    pub fn update(&mut self, filter: &dyn RowFilter, new_fragments: Vec<Fragment>) -> Result<u64> {
        let plan = self.plan_deletions(filter)?;
        if plan.is_empty() && new_fragments.is_empty() {
            return Ok(0);
        }
        self.commit_op(Operation::Update {
            removed_fragment_ids: plan.removed,
            updated_fragments: plan.updated,
            new_fragments,
            fields_modified: Vec::new(),
        })?;
        Ok(plan.rows)
    }

    /// Add columns. `fragments` must list every fragment with its new files.
    pub fn merge(&mut self, fragments: Vec<Fragment>, schema: Schema) -> Result<u64> {
        self.commit_op(Operation::Merge { fragments, schema })
    }

    /// Replace the schema without touching data (rename, drop, reorder).
    pub fn project(&mut self, schema: Schema) -> Result<u64> {
        self.commit_op(Operation::Project { schema })
    }

    /// Drop columns by name, with their children
    pub fn drop_columns(&mut self, names: &[&str]) -> Result<u64> {
        let mut dropped = BTreeSet::new();
        for name in names {
            let field = self
                .schema()
                .field_by_name(name)
                .ok_or_else(|| Error::invalid_input(format!("no column named '{}'", name)))?;
            dropped.insert(field.id);
        }
        // Fields are depth-first, so parents are seen before children
        for field in &self.schema().fields {
            if dropped.contains(&field.parent_id) {
                dropped.insert(field.id);
            }
        }
        let keep: BTreeSet<i32> = self.schema().field_ids().difference(&dropped).copied().collect();
        let schema = self.schema().project(&keep);
        self.project(schema)
    }

    /// Register a secondary index over `fields` covering every current fragment
    pub fn create_index(&mut self, name: &str, fields: &[i32]) -> Result<IndexMetadata> {
        let index = IndexMetadata::new(
            name,
            fields.to_vec(),
            self.version(),
            self.manifest.fragment_ids(),
        );
        let uuid = index.uuid;
        self.commit_op(Operation::CreateIndex {
            new_indices: vec![index],
            removed_indices: Vec::new(),
        })?;
        self.manifest
            .indices
            .iter()
            .find(|i| i.uuid == uuid)
            .cloned()
            .ok_or_else(|| Error::internal(format!("index '{}' missing after commit", name)))
    }

    /// Remove a secondary index by name
    pub fn drop_index(&mut self, name: &str) -> Result<u64> {
        let index = self
            .manifest
            .index(name)
            .cloned()
            .ok_or_else(|| Error::invalid_input(format!("no index named '{}'", name)))?;
        self.commit_op(Operation::CreateIndex {
            new_indices: Vec::new(),
            removed_indices: vec![index],
        })
    }

    /// Swap data files of existing fragments
    pub fn replace_data(&mut self, replacements: Vec<DataReplacementGroup>) -> Result<u64> {
        self.commit_op(Operation::DataReplacement { replacements })
    }

    /// Re-publish this handle's version as the newest version
    pub fn restore(&mut self) -> Result<u64> {
        let latest = self.latest_version()?;
        let version = self.version();
        info!(target: "tessel::table", version, latest, "Restoring version");
        self.commit(Operation::Restore { version }, latest)
    }

    /// Reserve fragment ids for use in a later commit
    pub fn reserve_fragments(&mut self, num_fragments: u32) -> Result<Vec<u64>> {
        if num_fragments == 0 {
            return Ok(Vec::new());
        }
        self.commit_op(Operation::ReserveFragments { num_fragments })?;
        let high = self.manifest.max_fragment_id;
        Ok((high + 1 - u64::from(num_fragments)..=high).collect())
    }

    /// Edit the table's config map
    pub fn update_config(
        &mut self,
        upsert: impl IntoIterator<Item = (String, String)>,
        delete: impl IntoIterator<Item = String>,
    ) -> Result<u64> {
        let upsert_values: BTreeMap<String, String> = upsert.into_iter().collect();
        let delete_keys: Vec<String> = delete.into_iter().collect();
        self.commit_op(Operation::UpdateConfig {
            upsert_values,
            delete_keys,
        })
    }

    // ========================================================================
    // Compaction & cleanup
    // ========================================================================

    /// Merge small fragments and purge deleted rows in one `Rewrite` commit.
    ///
    /// Uses the configured compaction defaults when `options` is `None`.
    pub fn compact_files(
        &mut self,
        options: Option<&CompactionOptions>,
        rewriter: &dyn FragmentRewriter,
    ) -> Result<CompactionMetrics> {
        let options = options.unwrap_or(&self.config.compaction).clone();
        let plan = plan_compaction(&self.manifest.fragments, &self.manifest.indices, &options)?;
        if plan.is_empty() {
            debug!(target: "tessel::compaction", version = self.version(), "Nothing to compact");
            return Ok(CompactionMetrics::default());
        }
        let prepared = prepare_rewrite(
            self.store(),
            self.coordinator.paths(),
            &self.manifest.schema,
            &self.manifest.indices,
            &plan,
            &options,
            self.manifest.uses_stable_row_ids(),
            self.config.inline_row_id_limit_bytes,
            rewriter,
        )?;
        let version = self.commit_op(Operation::Rewrite {
            groups: prepared.groups,
            rewritten_indices: prepared.rewritten_indices,
        })?;
        info!(
            target: "tessel::compaction",
            version,
            fragments_removed = prepared.metrics.fragments_removed,
            fragments_added = prepared.metrics.fragments_added,
            "Compacted fragments"
        );
        Ok(prepared.metrics)
    }

    /// Delete versions older than `before` (never the latest or tagged ones)
    pub fn cleanup_old_versions(&self, before: DateTime<Utc>) -> Result<CleanupStats> {
        cleanup_old_versions(&self.coordinator, before)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Rows of this version
    pub fn scan(&self, options: &ScanOptions<'_>) -> Result<Vec<ScanRow>> {
        scan(self.store(), self.coordinator.paths(), &self.manifest, options)
    }

    /// Resolve row ids to live row addresses; unknown or deleted ids are `None`
    pub fn take_rows(&self, row_ids: &[u64]) -> Result<Vec<Option<RowAddress>>> {
        let index = self.row_id_index()?;
        take_rows(
            self.store(),
            self.coordinator.paths(),
            &self.manifest,
            &index,
            row_ids,
        )
    }

    /// Row id index of this version, built on first use
    pub fn row_id_index(&self) -> Result<Arc<RowIdIndex>> {
        let mut cached = self.row_id_index.lock();
        if let Some(index) = cached.as_ref() {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(RowIdIndex::build(
            self.store(),
            &self.manifest.fragments,
            self.manifest.uses_stable_row_ids(),
        )?);
        *cached = Some(Arc::clone(&index));
        Ok(index)
    }
}
