//! Manifest publication
//!
//! A commit handler decides how "version N exists" is established:
//!
//! - [`ConditionalPutCommitHandler`]: the object store's atomic
//!   create-if-absent at the canonical manifest path is the commit point.
//! - [`ExternalManifestCommitHandler`]: for stores without that primitive.
//!   The manifest is staged under a unique name, then an external CAS store
//!   records `(uri, version) -> staged path`. That CAS is the commit point;
//!   copying to the canonical path and repointing the entry is finalization,
//!   which any reader can redo if the writer died half way.
//!
//! Both handlers report a lost race as [`Error::AlreadyExists`].

use crate::format::encode_manifest;
use std::fmt::Debug;
use std::sync::Arc;
use tessel_core::{Error, Manifest, ManifestNamingScheme, Result};
use tessel_storage::{
    check_manifest_version, detect_naming_scheme, parse_manifest_file_name, staged_manifest_name,
    ExternalManifestStore, ObjectStore, TablePaths,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A published manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLocation {
    /// Version number
    pub version: u64,
    /// Object store path of the manifest
    pub path: String,
    /// Naming scheme of the path
    pub naming_scheme: ManifestNamingScheme,
}

/// Finalized manifests in listing order, plus the scheme they use.
///
/// Fails with [`Error::NamingSchemeConflict`] if the directory mixes schemes.
fn scan_versions_dir(
    store: &dyn ObjectStore,
    paths: &TablePaths,
) -> Result<(Option<ManifestNamingScheme>, Vec<ManifestLocation>)> {
    let prefix = paths.versions_prefix();
    let listing = store.list(&prefix)?;
    let names: Vec<&str> = listing
        .iter()
        .filter_map(|p| p.strip_prefix(prefix.as_str()))
        .filter(|n| !n.contains('/'))
        .collect();
    let scheme = detect_naming_scheme(&prefix, names.iter().copied())?;
    let locations = listing
        .iter()
        .filter_map(|path| {
            let name = path.strip_prefix(prefix.as_str())?;
            let (version, naming_scheme) = parse_manifest_file_name(name)?;
            Some(ManifestLocation {
                version,
                path: path.clone(),
                naming_scheme,
            })
        })
        .collect();
    Ok((scheme, locations))
}

/// List finalized manifests in ascending version order.
///
/// Fails with [`Error::NamingSchemeConflict`] if the directory mixes schemes.
pub fn list_manifests(
    store: &dyn ObjectStore,
    paths: &TablePaths,
) -> Result<Vec<ManifestLocation>> {
    let (_, mut locations) = scan_versions_dir(store, paths)?;
    locations.sort_by_key(|l| l.version);
    Ok(locations)
}

/// Latest finalized manifest from a directory listing.
///
/// Listings are ascending, so with V2 names the first manifest is the
/// newest. V1 names sort as text ("11" before "2") and need the maximum.
fn latest_from_listing(
    store: &dyn ObjectStore,
    paths: &TablePaths,
) -> Result<Option<ManifestLocation>> {
    let (scheme, locations) = scan_versions_dir(store, paths)?;
    Ok(match scheme {
        Some(ManifestNamingScheme::V2) => locations.into_iter().next(),
        _ => locations.into_iter().max_by_key(|l| l.version),
    })
}

fn location_from_listing(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    version: u64,
) -> Result<ManifestLocation> {
    list_manifests(store, paths)?
        .into_iter()
        .find(|l| l.version == version)
        .ok_or(Error::VersionNotFound(version))
}

/// Strategy for publishing and locating manifests
pub trait CommitHandler: Send + Sync + Debug {
    /// Latest published version, or `None` for a table with no versions
    fn resolve_latest(
        &self,
        store: &dyn ObjectStore,
        paths: &TablePaths,
    ) -> Result<Option<ManifestLocation>>;

    /// Location of a specific version
    fn resolve_version(
        &self,
        store: &dyn ObjectStore,
        paths: &TablePaths,
        version: u64,
    ) -> Result<ManifestLocation>;

    /// Every published version, ascending
    fn list_versions(
        &self,
        store: &dyn ObjectStore,
        paths: &TablePaths,
    ) -> Result<Vec<ManifestLocation>> {
        // Make sure an unfinalized latest version is visible in the listing
        self.resolve_latest(store, paths)?;
        list_manifests(store, paths)
    }

    /// Publish `manifest` as its version.
    ///
    /// Returns [`Error::AlreadyExists`] if another writer published that
    /// version first.
    fn commit(
        &self,
        store: &dyn ObjectStore,
        paths: &TablePaths,
        manifest: &Manifest,
    ) -> Result<ManifestLocation>;
}

/// Publishes with the object store's atomic put-if-absent
#[derive(Debug, Default, Clone)]
pub struct ConditionalPutCommitHandler;

impl CommitHandler for ConditionalPutCommitHandler {
    fn resolve_latest(
        &self,
        store: &dyn ObjectStore,
        paths: &TablePaths,
    ) -> Result<Option<ManifestLocation>> {
        latest_from_listing(store, paths)
    }

    fn resolve_version(
        &self,
        store: &dyn ObjectStore,
        paths: &TablePaths,
        version: u64,
    ) -> Result<ManifestLocation> {
        location_from_listing(store, paths, version)
    }

    fn commit(
        &self,
        store: &dyn ObjectStore,
        paths: &TablePaths,
        manifest: &Manifest,
    ) -> Result<ManifestLocation> {
        if !store.supports_conditional_put() {
            return Err(Error::UnsupportedFeature(format!(
                "object store '{}' needs an external manifest store to commit",
                store.uri()
            )));
        }
        check_manifest_version(manifest.naming_scheme, manifest.version)?;
        let path = paths.manifest(manifest.naming_scheme, manifest.version);
        let bytes = encode_manifest(manifest)?;
        store.put_if_absent(&path, &bytes)?;
        debug!(target: "tessel::commit", version = manifest.version, path = %path, "Published manifest");
        Ok(ManifestLocation {
            version: manifest.version,
            path,
            naming_scheme: manifest.naming_scheme,
        })
    }
}

/// Publishes through an external CAS store
#[derive(Debug, Clone)]
pub struct ExternalManifestCommitHandler {
    external: Arc<dyn ExternalManifestStore>,
}

/// Length of `-{uuid}` appended to staged manifest names
const STAGED_SUFFIX_LEN: usize = 37;

impl ExternalManifestCommitHandler {
    /// Wrap an external store
    pub fn new(external: Arc<dyn ExternalManifestStore>) -> Self {
        ExternalManifestCommitHandler { external }
    }

    /// External store key of a table
    fn table_key(store: &dyn ObjectStore, paths: &TablePaths) -> String {
        if paths.base().is_empty() {
            store.uri()
        } else {
            format!("{}/{}", store.uri(), paths.base())
        }
    }

    /// Turn an external-store entry into a canonical location, finishing an
    /// interrupted commit if needed.
    fn finalize(
        &self,
        store: &dyn ObjectStore,
        paths: &TablePaths,
        version: u64,
        recorded: &str,
    ) -> Result<ManifestLocation> {
        let name = recorded.rsplit('/').next().unwrap_or(recorded);
        if let Some((parsed, naming_scheme)) = parse_manifest_file_name(name) {
            if parsed != version {
                return Err(Error::ExternalStoreDesync {
                    version,
                    message: format!("entry points at manifest for version {}", parsed),
                });
            }
            return Ok(ManifestLocation {
                version,
                path: recorded.to_string(),
                naming_scheme,
            });
        }

        // Staged path: `{canonical}-{uuid}`
        let desync = |message: String| Error::ExternalStoreDesync { version, message };
        if recorded.len() <= STAGED_SUFFIX_LEN {
            return Err(desync(format!("unrecognized manifest path '{}'", recorded)));
        }
        let canonical = &recorded[..recorded.len() - STAGED_SUFFIX_LEN];
        let canonical_name = canonical.rsplit('/').next().unwrap_or(canonical);
        let naming_scheme = match parse_manifest_file_name(canonical_name) {
            Some((parsed, scheme)) if parsed == version => scheme,
            _ => return Err(desync(format!("unrecognized staged path '{}'", recorded))),
        };
        if canonical != paths.manifest(naming_scheme, version) {
            return Err(desync(format!(
                "staged path '{}' is outside this table",
                recorded
            )));
        }

        warn!(
            target: "tessel::external",
            version,
            staged = %recorded,
            "Finalizing interrupted manifest commit"
        );
        if !store.exists(canonical)? {
            if let Err(e) = store.copy(recorded, canonical) {
                // A concurrent reader may have finalized it first
                if !store.exists(canonical)? {
                    return Err(desync(format!("copy to canonical path failed: {}", e)));
                }
            }
        }
        let uri = Self::table_key(store, paths);
        self.external
            .put_if_exists(&uri, version, canonical)
            .map_err(|e| desync(format!("external store update failed: {}", e)))?;
        if let Err(e) = store.delete(recorded) {
            warn!(target: "tessel::external", path = %recorded, error = %e, "Failed to remove staged manifest");
        }
        Ok(ManifestLocation {
            version,
            path: canonical.to_string(),
            naming_scheme,
        })
    }
}

impl CommitHandler for ExternalManifestCommitHandler {
    fn resolve_latest(
        &self,
        store: &dyn ObjectStore,
        paths: &TablePaths,
    ) -> Result<Option<ManifestLocation>> {
        let uri = Self::table_key(store, paths);
        match self.external.get_latest_version(&uri)? {
            Some((version, recorded)) => self
                .finalize(store, paths, version, &recorded)
                .map(Some),
            None => latest_from_listing(store, paths),
        }
    }

    fn resolve_version(
        &self,
        store: &dyn ObjectStore,
        paths: &TablePaths,
        version: u64,
    ) -> Result<ManifestLocation> {
        let uri = Self::table_key(store, paths);
        match self.external.get(&uri, version)? {
            Some(recorded) => self.finalize(store, paths, version, &recorded),
            None => location_from_listing(store, paths, version),
        }
    }

    fn commit(
        &self,
        store: &dyn ObjectStore,
        paths: &TablePaths,
        manifest: &Manifest,
    ) -> Result<ManifestLocation> {
        let version = manifest.version;
        check_manifest_version(manifest.naming_scheme, version)?;
        let canonical = paths.manifest(manifest.naming_scheme, version);
        let staged = staged_manifest_name(&canonical, &Uuid::new_v4());
        let bytes = encode_manifest(manifest)?;
        store.put(&staged, &bytes)?;

        let uri = Self::table_key(store, paths);
        if let Err(e) = self.external.put_if_not_exists(&uri, version, &staged) {
            if let Err(cleanup) = store.delete(&staged) {
                warn!(target: "tessel::external", path = %staged, error = %cleanup, "Failed to remove losing staged manifest");
            }
            return Err(match e {
                Error::AlreadyExists { .. } => Error::AlreadyExists { path: canonical },
                other => other,
            });
        }

        // Committed. Finalization failures leave work for the next reader.
        match self.finalize(store, paths, version, &staged) {
            Ok(location) => {
                info!(target: "tessel::external", version, path = %location.path, "Published manifest");
                Ok(location)
            }
            Err(e) => {
                warn!(target: "tessel::external", version, error = %e, "Manifest committed but not finalized");
                Ok(ManifestLocation {
                    version,
                    path: staged,
                    naming_scheme: manifest.naming_scheme,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::read_manifest;
    use tessel_core::{Field, Schema};
    use tessel_storage::{MemoryExternalStore, MemoryObjectStore};

    fn manifest(version: u64, scheme: ManifestNamingScheme) -> Manifest {
        let schema = Schema::new(vec![Field::new(0, "a", "int64")]).unwrap();
        let mut m = Manifest::new(schema, vec![], scheme);
        m.version = version;
        m
    }

    #[test]
    fn test_conditional_put_single_winner() {
        let store = MemoryObjectStore::new();
        let paths = TablePaths::root();
        let handler = ConditionalPutCommitHandler;
        handler
            .commit(&store, &paths, &manifest(1, ManifestNamingScheme::V2))
            .unwrap();
        let err = handler
            .commit(&store, &paths, &manifest(1, ManifestNamingScheme::V2))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn test_conditional_put_requires_store_support() {
        let store = MemoryObjectStore::without_conditional_put();
        let err = ConditionalPutCommitHandler
            .commit(&store, &TablePaths::root(), &manifest(1, ManifestNamingScheme::V1))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature(_)));
    }

    #[test]
    fn test_resolve_latest_and_specific_versions() {
        let store = MemoryObjectStore::new();
        let paths = TablePaths::root();
        let handler = ConditionalPutCommitHandler;
        assert!(handler.resolve_latest(&store, &paths).unwrap().is_none());
        for v in 1..=11 {
            handler
                .commit(&store, &paths, &manifest(v, ManifestNamingScheme::V1))
                .unwrap();
        }
        // "11.manifest" sorts before "2.manifest"; the version still wins
        assert_eq!(handler.resolve_latest(&store, &paths).unwrap().unwrap().version, 11);
        let loc = handler.resolve_version(&store, &paths, 3).unwrap();
        assert_eq!(loc.path, "_versions/3.manifest");
        assert!(matches!(
            handler.resolve_version(&store, &paths, 12),
            Err(Error::VersionNotFound(12))
        ));
        let versions: Vec<u64> = handler
            .list_versions(&store, &paths)
            .unwrap()
            .iter()
            .map(|l| l.version)
            .collect();
        assert_eq!(versions, (1..=11).collect::<Vec<_>>());
    }

    #[test]
    fn test_resolve_latest_v2_takes_first_listed() {
        let store = MemoryObjectStore::new();
        let paths = TablePaths::root();
        let handler = ConditionalPutCommitHandler;
        for v in 1..=11 {
            handler
                .commit(&store, &paths, &manifest(v, ManifestNamingScheme::V2))
                .unwrap();
        }
        let listing = store.list(&paths.versions_prefix()).unwrap();
        let latest = handler.resolve_latest(&store, &paths).unwrap().unwrap();
        assert_eq!(latest.version, 11);
        assert_eq!(latest.path, listing[0]);
    }

    #[test]
    fn test_v1_version_limit_enforced_at_commit() {
        let store = MemoryObjectStore::new();
        let paths = TablePaths::root();
        let too_far = manifest(tessel_storage::MAX_V1_VERSION + 1, ManifestNamingScheme::V1);
        assert!(matches!(
            ConditionalPutCommitHandler.commit(&store, &paths, &too_far),
            Err(Error::InvalidInput(_))
        ));
        assert!(store.list(&paths.versions_prefix()).unwrap().is_empty());
    }

    #[test]
    fn test_mixed_naming_schemes_rejected() {
        let store = MemoryObjectStore::new();
        let paths = TablePaths::root();
        let handler = ConditionalPutCommitHandler;
        handler
            .commit(&store, &paths, &manifest(1, ManifestNamingScheme::V1))
            .unwrap();
        handler
            .commit(&store, &paths, &manifest(2, ManifestNamingScheme::V2))
            .unwrap();
        assert!(matches!(
            handler.resolve_latest(&store, &paths),
            Err(Error::NamingSchemeConflict { .. })
        ));
    }

    #[test]
    fn test_external_commit_finalizes() {
        let store = MemoryObjectStore::without_conditional_put();
        let paths = TablePaths::root();
        let external = Arc::new(MemoryExternalStore::new());
        let handler = ExternalManifestCommitHandler::new(external.clone());

        let loc = handler
            .commit(&store, &paths, &manifest(1, ManifestNamingScheme::V2))
            .unwrap();
        assert_eq!(loc.path, paths.manifest(ManifestNamingScheme::V2, 1));
        assert_eq!(
            external.get(&store.uri(), 1).unwrap().as_deref(),
            Some(loc.path.as_str())
        );
        // Only the canonical manifest remains
        assert_eq!(store.list("_versions/").unwrap(), vec![loc.path.clone()]);
        assert_eq!(read_manifest(&store, &loc.path).unwrap().version, 1);

        let err = handler
            .commit(&store, &paths, &manifest(1, ManifestNamingScheme::V2))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
        assert_eq!(store.list("_versions/").unwrap().len(), 1);
    }

    #[test]
    fn test_reader_finishes_interrupted_commit() {
        let store = MemoryObjectStore::without_conditional_put();
        let paths = TablePaths::root();
        let external = Arc::new(MemoryExternalStore::new());
        let handler = ExternalManifestCommitHandler::new(external.clone());

        // Writer staged and won the CAS, then crashed
        let m = manifest(1, ManifestNamingScheme::V1);
        let canonical = paths.manifest(ManifestNamingScheme::V1, 1);
        let staged = staged_manifest_name(&canonical, &Uuid::new_v4());
        store.put(&staged, &encode_manifest(&m).unwrap()).unwrap();
        external.put_if_not_exists(&store.uri(), 1, &staged).unwrap();
        assert!(!store.exists(&canonical).unwrap());

        let loc = handler.resolve_latest(&store, &paths).unwrap().unwrap();
        assert_eq!(loc.path, canonical);
        assert!(store.exists(&canonical).unwrap());
        assert!(!store.exists(&staged).unwrap());
        assert_eq!(external.get(&store.uri(), 1).unwrap().as_deref(), Some(canonical.as_str()));

        // Second reader: nothing left to do
        let again = handler.resolve_version(&store, &paths, 1).unwrap();
        assert_eq!(again, loc);
    }

    #[test]
    fn test_missing_staged_manifest_is_desync() {
        let store = MemoryObjectStore::without_conditional_put();
        let paths = TablePaths::root();
        let external = Arc::new(MemoryExternalStore::new());
        let handler = ExternalManifestCommitHandler::new(external.clone());
        let canonical = paths.manifest(ManifestNamingScheme::V2, 4);
        let staged = staged_manifest_name(&canonical, &Uuid::new_v4());
        external.put_if_not_exists(&store.uri(), 4, &staged).unwrap();

        assert!(matches!(
            handler.resolve_latest(&store, &paths),
            Err(Error::ExternalStoreDesync { version: 4, .. })
        ));
    }
}
