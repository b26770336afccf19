//! Table builder for fluent configuration
//!
//! Chooses where the table lives inside the object store, how manifests are
//! published, and which [`TableConfig`] governs writes.

use super::config::TableConfig;
use super::Table;
use std::path::Path;
use std::sync::Arc;
use tessel_concurrency::CommitCoordinator;
use tessel_core::{Error, Fragment, Result, Schema};
use tessel_durability::{
    CommitHandler, ConditionalPutCommitHandler, ExternalManifestCommitHandler, Operation,
    Transaction,
};
use tessel_storage::{ExternalManifestStore, ObjectStore, TablePaths};
use tracing::info;

// ============================================================================
// Table Builder Pattern
// ============================================================================

/// Builder for [`Table`] handles
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use tessel_engine::{Table, TableConfig};
/// use tessel_storage::{MemoryObjectStore, MemoryExternalStore};
///
/// // Store with atomic create-if-absent: publish by conditional put
/// let table = Table::builder(Arc::new(MemoryObjectStore::new()))
///     .with_base_path("tables/events")
///     .open()?;
///
/// // Store without it: publish through an external CAS store
/// let table = Table::builder(Arc::new(MemoryObjectStore::without_conditional_put()))
///     .with_external_store(Arc::new(MemoryExternalStore::new()))
///     .create(schema, fragments)?;
/// ```
///
/// # Commit Handler Selection
///
/// | External store | Store has conditional put | Handler |
/// |----------------|---------------------------|---------|
/// | set | any | `ExternalManifestCommitHandler` |
/// | unset | yes | `ConditionalPutCommitHandler` |
/// | unset | no | error: `UnsupportedFeature` |
#[derive(Debug, Clone)]
pub struct TableBuilder {
    /// Object store holding the table
    store: Arc<dyn ObjectStore>,
    /// Table directory inside the store ("" = store root)
    base_path: String,
    /// Writer configuration
    config: TableConfig,
    /// CAS side channel for stores without conditional put
    external_store: Option<Arc<dyn ExternalManifestStore>>,
}

impl TableBuilder {
    /// Create a builder for a table at the root of `store`
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        TableBuilder {
            store,
            base_path: String::new(),
            config: TableConfig::default(),
            external_store: None,
        }
    }

    /// Place the table under a sub-directory of the store
    pub fn with_base_path(mut self, base: impl Into<String>) -> Self {
        self.base_path = base.into();
        self
    }

    /// Use the given writer configuration
    pub fn with_config(mut self, config: TableConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the writer configuration from a TOML file
    pub fn with_config_file(mut self, path: &Path) -> Result<Self> {
        self.config = TableConfig::load(path)?;
        Ok(self)
    }

    /// Publish manifests through an external CAS store
    pub fn with_external_store(mut self, external: Arc<dyn ExternalManifestStore>) -> Self {
        self.external_store = Some(external);
        self
    }

    fn handler(&self) -> Result<Arc<dyn CommitHandler>> {
        match &self.external_store {
            Some(external) => Ok(Arc::new(ExternalManifestCommitHandler::new(Arc::clone(
                external,
            )))),
            None if self.store.supports_conditional_put() => {
                Ok(Arc::new(ConditionalPutCommitHandler))
            }
            None => Err(Error::UnsupportedFeature(format!(
                "object store '{}' has no conditional put; configure an external manifest store",
                self.store.uri()
            ))),
        }
    }

    /// Commit coordinator configured from this builder
    pub fn coordinator(&self) -> Result<CommitCoordinator> {
        self.config.validate()?;
        Ok(CommitCoordinator::new(
            Arc::clone(&self.store),
            TablePaths::at(self.base_path.clone()),
            self.handler()?,
        )
        .with_config(self.config.commit_config())
        .with_naming_scheme(self.config.manifest_naming_scheme()?)
        .with_stable_row_ids(self.config.stable_row_ids))
    }

    /// Open the latest version of an existing table.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if the table has no versions
    /// - [`Error::NamingSchemeConflict`] if the version directory mixes
    ///   naming schemes
    pub fn open(self) -> Result<Table> {
        let coordinator = self.coordinator()?;
        let manifest = coordinator.load_latest()?.ok_or_else(|| Error::NotFound {
            path: coordinator.paths().versions_prefix(),
        })?;
        Ok(Table::from_parts(coordinator, self.config, manifest))
    }

    /// Create a new table as version 1.
    ///
    /// Fragments must be staged (unassigned ids).
    ///
    /// # Errors
    /// - [`Error::AlreadyExists`] if the table already has versions
    pub fn create(self, schema: Schema, fragments: Vec<Fragment>) -> Result<Table> {
        let coordinator = self.coordinator()?;
        if coordinator.load_latest()?.is_some() {
            return Err(Error::AlreadyExists {
                path: coordinator.paths().versions_prefix(),
            });
        }
        let manifest = coordinator.commit(&Transaction::new(
            0,
            Operation::Overwrite {
                schema,
                fragments,
                config_upsert: None,
            },
        ))?;
        info!(
            target: "tessel::table",
            path = %coordinator.paths().base(),
            fragments = manifest.fragments.len(),
            "Created table"
        );
        Ok(Table::from_parts(coordinator, self.config, manifest))
    }
}
