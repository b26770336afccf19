//! Compaction and cleanup against an on-disk store
//!
//! Data files are real objects here, so cleanup can be checked by looking
//! at what is left in the store.

use crate::common::*;
use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tessel::engine::{RewriteInput, RewrittenFragment};
use tessel::{CompactionOptions, FragmentRewriter, OffsetFilter, Result};

/// Writes one placeholder object per output fragment
#[derive(Debug)]
struct StoreRewriter {
    store: Arc<dyn ObjectStore>,
}

impl FragmentRewriter for StoreRewriter {
    fn rewrite(&self, input: &RewriteInput<'_>) -> Result<Vec<RewrittenFragment>> {
        let live: u64 = input
            .fragments
            .iter()
            .zip(input.deletions)
            .map(|(f, dv)| f.physical_rows - dv.len() as u64)
            .sum();
        let name = format!("compacted-{}.lance", uuid::Uuid::new_v4());
        self.store
            .put(&TablePaths::root().data_file(&name), &live.to_le_bytes())?;
        Ok(vec![RewrittenFragment {
            files: vec![DataFile::new(name, vec![0, 1])],
            physical_rows: live,
        }])
    }
}

fn written_fragment(store: &dyn ObjectStore, rows: u64) -> Fragment {
    let fragment = staged(rows);
    let path = TablePaths::root().data_file(&fragment.files[0].path);
    store.put(&path, &rows.to_le_bytes()).unwrap();
    fragment
}

fn data_objects(store: &dyn ObjectStore) -> BTreeSet<String> {
    store
        .list(&TablePaths::root().data_prefix())
        .unwrap()
        .into_iter()
        .collect()
}

fn local_store() -> (tempfile::TempDir, Arc<dyn ObjectStore>) {
    let dir = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()).unwrap());
    (dir, store)
}

#[test]
fn compaction_then_cleanup_removes_replaced_files() {
    init_tracing();
    let (_dir, store) = local_store();
    let fragments: Vec<Fragment> = (0..3).map(|_| written_fragment(&*store, 50)).collect();
    let mut table =
        Table::create(Arc::clone(&store), schema(), fragments, TableConfig::default()).unwrap();
    let before = data_objects(&*store);
    assert_eq!(before.len(), 3);

    let first = table.manifest().fragments[0].id;
    table
        .delete(&OffsetFilter::new().with_offsets(first, 0..10))
        .unwrap();
    assert_eq!(table.count_rows(), 140);

    let rewriter = StoreRewriter {
        store: Arc::clone(&store),
    };
    let metrics = table
        .compact_files(
            Some(&CompactionOptions::default().with_target_rows_per_fragment(500)),
            &rewriter,
        )
        .unwrap();
    assert_eq!(metrics.fragments_removed, 3);
    assert_eq!(metrics.fragments_added, 1);
    assert_eq!(table.version(), 3);
    assert_eq!(table.count_rows(), 140);
    assert_eq!(data_objects(&*store).len(), 4);

    // Old versions still read their own files until cleanup
    assert_eq!(table.checkout_version(1).unwrap().count_rows(), 150);

    let stats = table
        .cleanup_old_versions(Utc::now() + Duration::seconds(60))
        .unwrap();
    assert_eq!(stats.versions_removed, 2);
    assert_eq!(stats.data_files_removed, 3);
    assert_eq!(stats.deletion_files_removed, 1);

    let after = data_objects(&*store);
    assert_eq!(after.len(), 1);
    assert!(after.is_disjoint(&before));
    assert_eq!(table.versions().unwrap().len(), 1);
    assert_eq!(table.count_rows(), 140);
    assert!(store
        .list(&TablePaths::root().deletions_prefix())
        .unwrap()
        .is_empty());
}

#[test]
fn transaction_files_survive_cleanup() {
    let (_dir, store) = local_store();
    let mut table = Table::create(
        Arc::clone(&store),
        schema(),
        vec![written_fragment(&*store, 5)],
        TableConfig::default(),
    )
    .unwrap();
    table.append(vec![written_fragment(&*store, 5)]).unwrap();

    let prefix = TablePaths::root().transactions_prefix();
    let before = store.list(&prefix).unwrap().len();
    assert_eq!(before, 2);
    table
        .cleanup_old_versions(Utc::now() + Duration::seconds(60))
        .unwrap();
    assert_eq!(store.list(&prefix).unwrap().len(), before);

    // Files still referenced by the latest version are kept
    assert_eq!(data_objects(&*store).len(), 2);
}

#[test]
fn compaction_defaults_come_from_config() {
    let config = TableConfig::default().with_compaction(
        CompactionOptions::default()
            .with_target_rows_per_fragment(30)
            .with_max_rows_per_group(30),
    );
    let mut table = Table::create(
        Arc::new(MemoryObjectStore::new()),
        schema(),
        (0..6).map(|_| staged(10)).collect(),
        config,
    )
    .unwrap();

    let metrics = table
        .compact_files(None, &tessel::MetadataOnlyRewriter)
        .unwrap();
    assert_eq!(metrics.fragments_removed, 6);
    assert_eq!(metrics.fragments_added, 2);
    assert!(table
        .manifest()
        .fragments
        .iter()
        .all(|f| f.physical_rows == 30));

    let ids: Vec<u64> = table.scan(&Default::default()).unwrap().iter().map(|r| r.row_id).collect();
    assert_eq!(ids, (0..60).collect::<Vec<_>>());
}
