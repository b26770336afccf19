//! Removal of old versions and the files only they reference
//!
//! A version is removable when it is older than the cutoff, is not the
//! latest version, and no tag points at it. Files referenced by any kept
//! version survive. Transaction files are never removed: they are the audit
//! trail conflict checks depend on.
//!
//! Manifests are deleted before the files they reference, so a reader that
//! can still list a version can still read it. Individual file deletions are
//! best effort and only logged on failure.

use crate::table::tags::list_tags;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tessel_concurrency::CommitCoordinator;
use tessel_core::{Manifest, Result, RowIdMeta};
use tessel_durability::read_manifest;
use tessel_storage::{ObjectStore, TablePaths};
use tracing::{info, warn};

/// What [`cleanup_old_versions`] removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Manifests deleted
    pub versions_removed: usize,
    /// Data files deleted
    pub data_files_removed: usize,
    /// Deletion files deleted
    pub deletion_files_removed: usize,
    /// External row-id files deleted
    pub row_id_files_removed: usize,
    /// Index objects deleted
    pub index_files_removed: usize,
}

#[derive(Debug, Default)]
struct Referenced {
    data: BTreeSet<String>,
    deletions: BTreeSet<String>,
    row_ids: BTreeSet<String>,
    index_dirs: BTreeSet<String>,
}

impl Referenced {
    fn add(&mut self, paths: &TablePaths, manifest: &Manifest) {
        for fragment in &manifest.fragments {
            for file in &fragment.files {
                self.data.insert(paths.data_file(&file.path));
            }
            if let Some(deletion) = &fragment.deletion_file {
                self.deletions
                    .insert(paths.deletion_file(fragment.id, deletion));
            }
            if let Some(RowIdMeta::External(file)) = &fragment.row_id_meta {
                self.row_ids.insert(file.path.clone());
            }
        }
        for index in &manifest.indices {
            self.index_dirs
                .insert(format!("{}/", paths.index_dir(&index.uuid)));
        }
    }
}

/// Delete versions older than `before`, with the files only they reference.
pub fn cleanup_old_versions(
    coordinator: &CommitCoordinator,
    before: DateTime<Utc>,
) -> Result<CleanupStats> {
    let store = &**coordinator.store();
    let paths = coordinator.paths();
    let locations = coordinator.handler().list_versions(store, paths)?;
    let Some(latest) = locations.last().map(|l| l.version) else {
        return Ok(CleanupStats::default());
    };
    let tagged: BTreeSet<u64> = list_tags(store, paths)?.into_values().collect();

    let mut keep = Referenced::default();
    let mut drop = Referenced::default();
    let mut doomed = Vec::new();
    for location in &locations {
        let manifest = read_manifest(store, &location.path)?;
        let removable = location.version != latest
            && !tagged.contains(&location.version)
            && manifest.timestamp < before;
        if removable {
            drop.add(paths, &manifest);
            doomed.push(location.path.clone());
        } else {
            keep.add(paths, &manifest);
        }
    }

    let mut stats = CleanupStats::default();
    for path in &doomed {
        if delete_logged(store, path) {
            stats.versions_removed += 1;
        }
    }
    stats.data_files_removed = delete_unreferenced(store, &drop.data, &keep.data);
    stats.deletion_files_removed = delete_unreferenced(store, &drop.deletions, &keep.deletions);
    stats.row_id_files_removed = delete_unreferenced(store, &drop.row_ids, &keep.row_ids);
    for dir in drop.index_dirs.difference(&keep.index_dirs) {
        match store.list(dir) {
            Ok(objects) => {
                for object in objects {
                    if delete_logged(store, &object) {
                        stats.index_files_removed += 1;
                    }
                }
            }
            Err(e) => warn!(target: "tessel::cleanup", dir = %dir, error = %e, "Failed to list index files"),
        }
    }

    info!(
        target: "tessel::cleanup",
        versions = stats.versions_removed,
        data_files = stats.data_files_removed,
        deletion_files = stats.deletion_files_removed,
        "Cleaned up old versions"
    );
    Ok(stats)
}

fn delete_unreferenced(
    store: &dyn ObjectStore,
    dropped: &BTreeSet<String>,
    kept: &BTreeSet<String>,
) -> usize {
    dropped
        .difference(kept)
        .filter(|path| delete_logged(store, path))
        .count()
}

fn delete_logged(store: &dyn ObjectStore, path: &str) -> bool {
    match store.delete(path) {
        Ok(()) => true,
        Err(e) => {
            warn!(target: "tessel::cleanup", path = %path, error = %e, "Failed to delete file");
            false
        }
    }
}
