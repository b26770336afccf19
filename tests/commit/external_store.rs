//! Commits through an external manifest store
//!
//! Stores without conditional put publish by recording the manifest path
//! in a CAS store. A writer that crashes between recording a staged path
//! and finalizing it leaves the work for the next reader.

use crate::common::*;
use std::sync::Arc;
use std::thread;

fn external_table(
    store: &Arc<dyn ObjectStore>,
    external: &Arc<MemoryExternalStore>,
) -> tessel::TableBuilder {
    Table::builder(Arc::clone(store)).with_external_store(external.clone())
}

#[test]
fn interrupted_commit_is_finalized_by_next_reader() {
    init_tracing();
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::without_conditional_put());
    let external = Arc::new(MemoryExternalStore::new());
    let mut table = external_table(&store, &external)
        .create(schema(), vec![staged(4)])
        .unwrap();
    table.append(vec![staged(4)]).unwrap();

    // Rewind version 2 to the state a crashed writer leaves behind: the
    // external store points at a staged copy, the canonical name is absent
    let paths = TablePaths::root();
    let canonical = paths.manifest(ManifestNamingScheme::V2, 2);
    let staged_path = format!("{}-{}", canonical, uuid::Uuid::new_v4());
    let bytes = store.get(&canonical).unwrap();
    store.put(&staged_path, &bytes).unwrap();
    store.delete(&canonical).unwrap();
    external
        .put_if_exists(&store.uri(), 2, &staged_path)
        .unwrap();

    let first = external_table(&store, &external).open().unwrap();
    assert_eq!(first.version(), 2);
    assert_eq!(first.count_rows(), 8);
    assert!(store.exists(&canonical).unwrap());
    assert!(!store.exists(&staged_path).unwrap());
    assert_eq!(
        external.get(&store.uri(), 2).unwrap().as_deref(),
        Some(canonical.as_str())
    );

    // Second reader sees the canonical path directly
    let second = external_table(&store, &external).open().unwrap();
    assert_eq!(second.manifest(), first.manifest());
}

#[test]
fn external_store_serializes_concurrent_writers() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::without_conditional_put());
    let external = Arc::new(MemoryExternalStore::new());
    external_table(&store, &external)
        .create(schema(), vec![])
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let external = Arc::clone(&external);
            thread::spawn(move || {
                let mut table = external_table(&store, &external).open().unwrap();
                for _ in 0..3 {
                    table.append(vec![staged(1)]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let table = external_table(&store, &external).open().unwrap();
    assert_eq!(table.version(), 13);
    assert_eq!(table.count_rows(), 12);
    let versions: Vec<u64> = table.versions().unwrap().iter().map(|v| v.version).collect();
    assert_eq!(versions, (1..=13).collect::<Vec<_>>());
}

#[test]
fn tables_under_one_store_are_independent() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::without_conditional_put());
    let external = Arc::new(MemoryExternalStore::new());
    let mut left = external_table(&store, &external)
        .with_base_path("left")
        .create(schema(), vec![staged(1)])
        .unwrap();
    external_table(&store, &external)
        .with_base_path("right")
        .create(schema(), vec![staged(2)])
        .unwrap();
    left.append(vec![staged(1)]).unwrap();

    let right = external_table(&store, &external)
        .with_base_path("right")
        .open()
        .unwrap();
    assert_eq!(right.version(), 1);
    assert_eq!(right.count_rows(), 2);
    assert_eq!(left.version(), 2);
}
