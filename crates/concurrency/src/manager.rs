//! Commit coordinator for publishing new table versions
//!
//! Writers never hold a lock. Each commit reads the latest manifest, checks
//! its operation against everything committed since it started, rebuilds
//! the manifest on top of the latest version and races to publish it. The
//! object store's create-if-absent (or the external store's CAS) picks a
//! single winner per version.
//!
//! ## Commit Sequence
//!
//! ```text
//! 0. claim_tag()          - Reserve the tag, if any (create-if-absent)
//! 1. resolve_latest()     - Find the newest published manifest
//! 2. check_version()      - For each version in (read_version, latest]:
//!                           load its transaction file and test for conflict
//! 3. IF conflict: return Error::Conflict
//! 4. ManifestBuilder      - Apply the operation on top of latest (rebase)
//! 5. write_transaction()  - `_transactions/{read_version}-{uuid}.txn`
//! 6. handler.commit()     - Publish version latest + 1 (COMMIT POINT)
//! 7. IF another writer won the version: go to 1
//! 8. bind_tag()           - Point the claimed tag at the new version
//! 9. Return the published manifest
//! ```
//!
//! A failure before step 6 leaves at most an orphaned transaction file,
//! which nothing references, and releases the tag claim. The loop is
//! bounded by [`CommitConfig::max_retries`] and [`CommitConfig::timeout`].

use crate::builder::ManifestBuilder;
use crate::conflict::check_conflict;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessel_core::{can_read, Error, Manifest, ManifestNamingScheme, Result};
use tessel_durability::{
    bind_tag, claim_tag, read_manifest, read_transaction, release_tag, write_transaction,
    CommitHandler, Operation, Transaction,
};
use tessel_storage::{ObjectStore, TablePaths};
use tracing::{debug, error, info, warn};

/// Default number of retries after losing a publish race
pub const DEFAULT_MAX_RETRIES: u32 = 20;

/// Default wall-clock budget for one commit
pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounds on the commit retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Wall-clock budget across all attempts
    pub timeout: Duration,
}

impl Default for CommitConfig {
    fn default() -> Self {
        CommitConfig {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_COMMIT_TIMEOUT,
        }
    }
}

impl CommitConfig {
    /// Set the retry count (builder pattern)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the wall-clock budget (builder pattern)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject a zero timeout
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::invalid_input("commit timeout must be positive"));
        }
        Ok(())
    }
}

/// Publishes transactions as new table versions
///
/// A coordinator is bound to one table directory. It is cheap to clone and
/// may be shared between threads; every clone shares the cache of
/// already-loaded committed transactions.
#[derive(Debug, Clone)]
pub struct CommitCoordinator {
    store: Arc<dyn ObjectStore>,
    paths: TablePaths,
    handler: Arc<dyn CommitHandler>,
    config: CommitConfig,
    /// Naming scheme used when the commit creates the table
    naming_scheme: ManifestNamingScheme,
    /// Stable row ids for a table created by this coordinator
    stable_row_ids: bool,
    /// Committed transactions by the version they produced
    committed: Arc<DashMap<u64, Arc<Transaction>>>,
}

impl CommitCoordinator {
    /// Create a coordinator with default settings
    pub fn new(
        store: Arc<dyn ObjectStore>,
        paths: TablePaths,
        handler: Arc<dyn CommitHandler>,
    ) -> Self {
        CommitCoordinator {
            store,
            paths,
            handler,
            config: CommitConfig::default(),
            naming_scheme: ManifestNamingScheme::default(),
            stable_row_ids: false,
            committed: Arc::new(DashMap::new()),
        }
    }

    /// Set retry bounds (builder pattern)
    pub fn with_config(mut self, config: CommitConfig) -> Self {
        self.config = config;
        self
    }

    /// Naming scheme for a table this coordinator creates (builder pattern)
    pub fn with_naming_scheme(mut self, scheme: ManifestNamingScheme) -> Self {
        self.naming_scheme = scheme;
        self
    }

    /// Track stable row ids in a table this coordinator creates (builder pattern)
    pub fn with_stable_row_ids(mut self, enabled: bool) -> Self {
        self.stable_row_ids = enabled;
        self
    }

    /// Object store the table lives in
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Table directory layout
    pub fn paths(&self) -> &TablePaths {
        &self.paths
    }

    /// Manifest publication strategy
    pub fn handler(&self) -> &Arc<dyn CommitHandler> {
        &self.handler
    }

    /// Retry bounds
    pub fn config(&self) -> &CommitConfig {
        &self.config
    }

    /// Coordinator for the `_blobs` sub-table
    pub fn blobs(&self) -> CommitCoordinator {
        CommitCoordinator {
            store: Arc::clone(&self.store),
            paths: self.paths.blobs(),
            handler: Arc::clone(&self.handler),
            config: self.config,
            naming_scheme: self.naming_scheme,
            stable_row_ids: false,
            committed: Arc::new(DashMap::new()),
        }
    }

    /// Latest manifest, or `None` if the table has no versions
    pub fn load_latest(&self) -> Result<Option<Manifest>> {
        match self.handler.resolve_latest(&*self.store, &self.paths)? {
            Some(location) => {
                let manifest = read_manifest(&*self.store, &location.path)?;
                can_read(&manifest)?;
                Ok(Some(manifest))
            }
            None => Ok(None),
        }
    }

    /// Manifest of a specific version
    pub fn load_version(&self, version: u64) -> Result<Manifest> {
        let location = self
            .handler
            .resolve_version(&*self.store, &self.paths, version)?;
        let manifest = read_manifest(&*self.store, &location.path)?;
        can_read(&manifest)?;
        Ok(manifest)
    }

    /// Commit `txn` as a new version
    ///
    /// # Errors
    /// - [`Error::Conflict`] if a transaction committed after
    ///   `txn.read_version` is incompatible, or its transaction file is
    ///   missing or unreadable
    /// - [`Error::StaleFragmentReference`] if the operation names a fragment
    ///   the latest version does not contain
    /// - [`Error::CommitExhausted`] if the retry budget runs out
    /// - [`Error::UnsupportedFeature`] if the latest manifest sets writer
    ///   flags this build does not know
    /// - [`Error::TagExists`] if `txn.tag` is already bound or claimed by
    ///   another in-flight commit
    ///
    /// A tagged commit claims its tag before publishing and binds it to the
    /// published version afterwards. If binding fails the version stays
    /// published, the claim stays in place and the error is returned.
    pub fn commit(&self, txn: &Transaction) -> Result<Manifest> {
        self.config.validate()?;
        let Some(tag) = &txn.tag else {
            return self.publish(txn);
        };

        claim_tag(&*self.store, &self.paths, tag)?;
        let manifest = match self.publish(txn) {
            Ok(manifest) => manifest,
            Err(e) => {
                if let Err(release) = release_tag(&*self.store, &self.paths, tag) {
                    warn!(target: "tessel::commit", tag = %tag, error = %release, "Failed to release tag claim");
                }
                return Err(e);
            }
        };
        if let Err(e) = bind_tag(&*self.store, &self.paths, tag, manifest.version) {
            error!(
                target: "tessel::commit",
                tag = %tag,
                version = manifest.version,
                error = %e,
                "Version published but tag left unbound"
            );
            return Err(e);
        }
        debug!(target: "tessel::commit", tag = %tag, version = manifest.version, "Bound tag");
        Ok(manifest)
    }

    /// Retry loop publishing `txn`, without tag handling
    fn publish(&self, txn: &Transaction) -> Result<Manifest> {
        let started = Instant::now();
        let blob_version = match &txn.blobs_op {
            Some(op) => Some(self.commit_blobs(op)?),
            None => None,
        };

        let mut transaction_file: Option<String> = None;
        let mut attempts: u32 = 0;
        loop {
            if attempts > self.config.max_retries {
                return Err(Error::CommitExhausted {
                    attempts,
                    reason: format!("lost the publish race {} times", attempts),
                });
            }
            if attempts > 0 && started.elapsed() >= self.config.timeout {
                return Err(Error::CommitExhausted {
                    attempts,
                    reason: format!("timed out after {:?}", started.elapsed()),
                });
            }
            attempts += 1;

            let latest = self.load_latest()?;
            let latest_version = latest.as_ref().map_or(0, |m| m.version);
            if txn.read_version > latest_version {
                return Err(Error::invalid_input(format!(
                    "read version {} is newer than the latest version {}",
                    txn.read_version, latest_version
                )));
            }
            debug!(
                target: "tessel::commit",
                attempt = attempts,
                read_version = txn.read_version,
                latest_version,
                op = txn.operation.name(),
                "Commit attempt"
            );
            for version in txn.read_version + 1..=latest_version {
                self.check_version(txn, version)?;
            }

            let restore_source = match &txn.operation {
                Operation::Restore { version } => Some(self.load_version(*version)?),
                _ => None,
            };
            let mut builder = ManifestBuilder::new(latest.as_ref())
                .with_naming_scheme(self.naming_scheme)
                .with_stable_row_ids(self.stable_row_ids);
            if let Some(source) = &restore_source {
                builder = builder.with_restore_source(source);
            }
            if let Some(version) = blob_version {
                builder = builder.with_blob_dataset_version(version);
            }
            let mut manifest = builder.build(txn)?;

            let path = match &transaction_file {
                Some(path) => path.clone(),
                None => {
                    let path = write_transaction(&*self.store, &self.paths, txn)?;
                    transaction_file = Some(path.clone());
                    path
                }
            };
            manifest.transaction_file = Some(path);

            match self.handler.commit(&*self.store, &self.paths, &manifest) {
                Ok(location) => {
                    info!(
                        target: "tessel::commit",
                        version = manifest.version,
                        path = %location.path,
                        op = txn.operation.name(),
                        attempts,
                        "Committed version"
                    );
                    self.committed.insert(manifest.version, Arc::new(txn.clone()));
                    return Ok(manifest);
                }
                Err(Error::AlreadyExists { .. }) => {
                    warn!(
                        target: "tessel::commit",
                        version = manifest.version,
                        attempt = attempts,
                        "Another writer published this version first, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Test `txn` against the transaction that produced `version`
    fn check_version(&self, txn: &Transaction, version: u64) -> Result<()> {
        let conflict = |message: String| Error::Conflict {
            read_version: txn.read_version,
            conflicting_version: version,
            message,
        };
        let theirs = match self.committed_transaction(version) {
            Ok(Some(theirs)) => theirs,
            Ok(None) => {
                return Err(conflict(format!(
                    "version {} records no transaction file",
                    version
                )))
            }
            Err(e) if e.is_not_found() || matches!(e, Error::CorruptTransaction { .. }) => {
                return Err(conflict(format!(
                    "transaction of version {} is unreadable: {}",
                    version, e
                )))
            }
            Err(e) => return Err(e),
        };
        match check_conflict(&txn.operation, &theirs.operation) {
            None => {
                debug!(
                    target: "tessel::commit",
                    version,
                    ours = txn.operation.name(),
                    theirs = theirs.operation.name(),
                    "Compatible with concurrent commit"
                );
                Ok(())
            }
            Some(reason) => {
                debug!(
                    target: "tessel::commit",
                    version,
                    reason = %reason,
                    "Conflict with concurrent commit"
                );
                Err(conflict(format!(
                    "{} conflicts with {}: {}",
                    txn.operation.name(),
                    theirs.operation.name(),
                    reason
                )))
            }
        }
    }

    /// Load (and cache) the transaction that produced `version`
    fn committed_transaction(&self, version: u64) -> Result<Option<Arc<Transaction>>> {
        if let Some(cached) = self.committed.get(&version) {
            return Ok(Some(Arc::clone(cached.value())));
        }
        let manifest = self.load_version(version)?;
        let Some(path) = manifest.transaction_file else {
            return Ok(None);
        };
        let txn = Arc::new(read_transaction(&*self.store, &path)?);
        self.committed.insert(version, Arc::clone(&txn));
        Ok(Some(txn))
    }

    fn commit_blobs(&self, op: &Operation) -> Result<u64> {
        let blobs = self.blobs();
        let read_version = blobs.load_latest()?.map_or(0, |m| m.version);
        let manifest = blobs.commit(&Transaction::new(read_version, op.clone()))?;
        debug!(target: "tessel::commit", blob_version = manifest.version, "Committed blob sub-table");
        Ok(manifest.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_core::{DataFile, Field, Fragment, Schema};
    use tessel_durability::{ConditionalPutCommitHandler, ExternalManifestCommitHandler};
    use tessel_storage::{MemoryExternalStore, MemoryObjectStore};

    fn schema() -> Schema {
        Schema::new(vec![Field::new(0, "id", "int64")]).unwrap()
    }

    fn staged(rows: u64) -> Fragment {
        Fragment::staged(vec![DataFile::new("d.lance", vec![0])], rows)
    }

    fn coordinator() -> CommitCoordinator {
        CommitCoordinator::new(
            Arc::new(MemoryObjectStore::new()),
            TablePaths::root(),
            Arc::new(ConditionalPutCommitHandler),
        )
        .with_stable_row_ids(true)
    }

    fn create(c: &CommitCoordinator) -> Manifest {
        c.commit(&Transaction::new(
            0,
            Operation::Overwrite {
                schema: schema(),
                fragments: vec![staged(10)],
                config_upsert: None,
            },
        ))
        .unwrap()
    }

    fn append(read_version: u64, rows: u64) -> Transaction {
        Transaction::new(
            read_version,
            Operation::Append {
                fragments: vec![staged(rows)],
            },
        )
    }

    #[test]
    fn test_create_and_append() {
        let c = coordinator();
        let v1 = create(&c);
        assert_eq!(v1.version, 1);
        assert!(v1.transaction_file.is_some());
        let v2 = c.commit(&append(1, 5)).unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.count_rows(), 15);
        assert_eq!(c.load_latest().unwrap().unwrap(), v2);
    }

    #[test]
    fn test_stale_read_version_rebases_compatible_append() {
        let c = coordinator();
        create(&c);
        c.commit(&append(1, 5)).unwrap();
        // Built against version 1, committed after version 2
        let v3 = c.commit(&append(1, 7)).unwrap();
        assert_eq!(v3.version, 3);
        assert_eq!(v3.fragment_ids(), [1, 2, 3].into_iter().collect());
        assert_eq!(v3.next_row_id, 22);
    }

    #[test]
    fn test_conflicting_delete_fails() {
        let c = coordinator();
        let v1 = create(&c);
        let delete = |read_version| {
            Transaction::new(
                read_version,
                Operation::Delete {
                    updated_fragments: vec![],
                    deleted_fragment_ids: vec![v1.fragments[0].id],
                    predicate: "true".into(),
                },
            )
        };
        c.commit(&delete(1)).unwrap();
        let err = c.commit(&delete(1)).unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict {
                read_version: 1,
                conflicting_version: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_transaction_file_is_conflict() {
        let c = coordinator();
        create(&c);
        let v2 = c.commit(&append(1, 5)).unwrap();
        let path = v2.transaction_file.unwrap();
        c.store().delete(&path).unwrap();

        // A fresh coordinator has no cached copy
        let fresh = CommitCoordinator::new(
            Arc::clone(c.store()),
            TablePaths::root(),
            Arc::new(ConditionalPutCommitHandler),
        );
        let err = fresh.commit(&append(1, 1)).unwrap_err();
        assert!(matches!(err, Error::Conflict { conflicting_version: 2, .. }));
        // Up to date writers are unaffected
        assert_eq!(fresh.commit(&append(2, 1)).unwrap().version, 3);
    }

    #[test]
    fn test_corrupt_transaction_file_is_conflict() {
        let c = coordinator();
        create(&c);
        let v2 = c.commit(&append(1, 5)).unwrap();
        c.store()
            .put(&v2.transaction_file.unwrap(), b"not a transaction")
            .unwrap();
        let fresh = CommitCoordinator::new(
            Arc::clone(c.store()),
            TablePaths::root(),
            Arc::new(ConditionalPutCommitHandler),
        );
        assert!(fresh.commit(&append(1, 1)).unwrap_err().is_conflict());
    }

    #[test]
    fn test_read_version_from_the_future() {
        let c = coordinator();
        create(&c);
        assert!(matches!(
            c.commit(&append(9, 1)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_zero_retries_still_attempts_once() {
        let c = coordinator().with_config(CommitConfig::default().with_max_retries(0));
        create(&c);
        assert_eq!(c.commit(&append(1, 1)).unwrap().version, 2);
        assert!(CommitConfig::default()
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_restore_republishes_old_state() {
        let c = coordinator();
        create(&c);
        c.commit(&append(1, 5)).unwrap();
        let v3 = c
            .commit(&Transaction::new(2, Operation::Restore { version: 1 }))
            .unwrap();
        assert_eq!(v3.version, 3);
        assert_eq!(v3.count_rows(), 10);
        assert_eq!(v3.max_fragment_id, 2);
    }

    #[test]
    fn test_tag_is_bound_once() {
        let c = coordinator();
        create(&c);
        let v2 = c.commit(&append(1, 1).with_tag("golden")).unwrap();
        assert_eq!(v2.tag.as_deref(), Some("golden"));
        assert_eq!(
            tessel_durability::read_tag(&**c.store(), c.paths(), "golden").unwrap(),
            2
        );
        assert!(matches!(
            c.commit(&append(2, 1).with_tag("golden")),
            Err(Error::TagExists(_))
        ));
        assert_eq!(c.load_latest().unwrap().unwrap().version, 2);
    }

    #[test]
    fn test_blobs_op_commits_sub_table_first() {
        let c = coordinator();
        create(&c);
        let blobs = Operation::Overwrite {
            schema: schema(),
            fragments: vec![staged(2)],
            config_upsert: None,
        };
        let v2 = c.commit(&append(1, 1).with_blobs_op(blobs)).unwrap();
        assert_eq!(v2.blob_dataset_version, Some(1));
        let blob_table = c.blobs().load_latest().unwrap().unwrap();
        assert_eq!(blob_table.count_rows(), 2);
        assert!(c
            .store()
            .exists(&TablePaths::root().blobs().manifest(ManifestNamingScheme::V2, 1))
            .unwrap());
    }

    #[test]
    fn test_commit_through_external_store() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::without_conditional_put());
        let handler = Arc::new(ExternalManifestCommitHandler::new(Arc::new(
            MemoryExternalStore::new(),
        )));
        let c = CommitCoordinator::new(store, TablePaths::root(), handler);
        create(&c);
        c.commit(&append(1, 3)).unwrap();
        let v3 = c.commit(&append(1, 4)).unwrap();
        assert_eq!(v3.version, 3);
        assert_eq!(v3.count_rows(), 17);
    }
}
