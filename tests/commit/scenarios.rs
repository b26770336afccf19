//! Reference commit scenarios
//!
//! Each test walks one concrete sequence of reads and commits and checks
//! the published manifests.

use crate::common::*;
use std::sync::Arc;
use tessel::durability::{read_transaction, DataReplacementGroup};
use tessel::engine::mark_deleted;
use tessel::{FnFilter, OffsetFilter};

// ============================================================================
// Append vs Append
// ============================================================================

#[test]
fn append_vs_append_both_publish() {
    init_tracing();
    let local = LocalTable::create(&[10]);
    let mut setup = local.open();
    setup.append(vec![staged(10)]).unwrap();
    setup.append(vec![staged(10)]).unwrap();
    assert_eq!(setup.version(), 3);

    // Both writers read version 3
    let mut a = local.open();
    let mut b = local.open();
    assert_eq!(a.append(vec![staged(1)]).unwrap(), 4);
    assert_eq!(b.append(vec![staged(2)]).unwrap(), 5);

    let latest = local.open();
    assert_eq!(latest.version(), 5);
    assert_eq!(fragment_ids(&latest), vec![1, 2, 3, 4, 5]);
    assert_eq!(latest.manifest().max_fragment_id, 5);
    assert_eq!(latest.count_rows(), 33);
}

// ============================================================================
// Fully deleted fragment
// ============================================================================

#[test]
fn deleting_every_row_removes_the_fragment() {
    init_tracing();
    let mut table = memory_table(&[4, 4]);
    let target = table.manifest().fragments[0].id;

    // The overlay itself reports removal rather than a full deletion file
    let fragment = table.manifest().fragments[0].clone();
    let store = Arc::clone(table.coordinator().store());
    let outcome = mark_deleted(
        &*store,
        table.coordinator().paths(),
        &fragment,
        table.version(),
        &[0, 1, 2, 3],
        table.config().sparse_deletion_max,
    )
    .unwrap();
    assert!(outcome.is_none());

    let deleted = table
        .delete(&FnFilter::new("a >= 2", move |f, _| f.id == target))
        .unwrap();
    assert_eq!(deleted, 4);

    let txn_path = table.manifest().transaction_file.clone().unwrap();
    let txn = read_transaction(&*store, &txn_path).unwrap();
    match txn.operation {
        Operation::Delete {
            updated_fragments,
            deleted_fragment_ids,
            predicate,
        } => {
            assert!(updated_fragments.is_empty());
            assert_eq!(deleted_fragment_ids, vec![target]);
            assert_eq!(predicate, "a >= 2");
        }
        other => panic!("unexpected operation {}", other.name()),
    }
    assert!(table.manifest().fragment(target).is_none());
    assert_eq!(table.manifest().max_fragment_id, 2);
}

// ============================================================================
// V2 naming order
// ============================================================================

#[test]
fn v2_manifests_list_newest_first() {
    let mut table = memory_table(&[1]);
    table.append(vec![staged(1)]).unwrap();

    let store = Arc::clone(table.coordinator().store());
    let paths = table.coordinator().paths().clone();
    let mut names: Vec<String> = store
        .list(&paths.versions_prefix())
        .unwrap()
        .into_iter()
        .filter(|p| p.ends_with(".manifest"))
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            paths.manifest(ManifestNamingScheme::V2, 2),
            paths.manifest(ManifestNamingScheme::V2, 1),
        ]
    );
}

// ============================================================================
// Delete vs Append
// ============================================================================

#[test]
fn delete_and_append_on_disjoint_fragments_both_commit() {
    init_tracing();
    let local = LocalTable::create(&[10; 7]);
    let mut setup = local.open();
    for _ in 0..4 {
        setup.append(vec![staged(10)]).unwrap();
    }
    assert_eq!(setup.version(), 5);
    assert!(setup.manifest().fragment(7).is_some());

    let mut x = local.open();
    let mut y = local.open();
    let deleted = x
        .delete(&OffsetFilter::new().with_offsets(7, [0, 1, 2]))
        .unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(x.version(), 6);
    assert_eq!(y.append(vec![staged(10)]).unwrap(), 7);

    let v7 = local.open();
    assert_eq!(v7.version(), 7);
    assert_eq!(v7.manifest().fragments.last().map(|f| f.id), Some(12));
    let seventh = v7.manifest().fragment(7).unwrap();
    assert_eq!(seventh.num_deleted_rows(), 3);
    assert_eq!(seventh.current_rows(), 7);
    assert_eq!(v7.count_rows(), 117);
}

// ============================================================================
// Update vs DataReplacement
// ============================================================================

#[test]
fn update_rebased_over_replacement_keeps_both_columns() {
    init_tracing();
    let mut table = Table::create(
        Arc::new(MemoryObjectStore::new()),
        schema(),
        vec![Fragment::staged(
            vec![
                DataFile::new("a.lance", vec![0]),
                DataFile::new("b.lance", vec![1]),
            ],
            8,
        )],
        TableConfig::default(),
    )
    .unwrap();
    let snapshot = table.manifest().fragments[0].clone();
    let id = snapshot.id;

    table
        .commit(
            Operation::DataReplacement {
                replacements: vec![DataReplacementGroup {
                    fragment_id: id,
                    new_file: DataFile::new("b2.lance", vec![1]),
                }],
            },
            1,
        )
        .unwrap();

    // Rewrites column a from what it saw at version 1
    let version = table
        .commit(
            Operation::Update {
                removed_fragment_ids: vec![],
                updated_fragments: vec![snapshot.with_file(DataFile::new("a2.lance", vec![0]))],
                new_fragments: vec![],
                fields_modified: vec![0],
            },
            1,
        )
        .unwrap();
    assert_eq!(version, 3);

    let fragment = table.manifest().fragment(id).unwrap();
    assert_eq!(fragment.file_for_field(0).unwrap().path, "a2.lance");
    assert_eq!(fragment.file_for_field(1).unwrap().path, "b2.lance");
    let paths: Vec<&str> = fragment.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["b2.lance", "a2.lance"]);
    assert_eq!(table.count_rows(), 8);
}
