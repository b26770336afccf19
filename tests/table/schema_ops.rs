//! Schema evolution through Merge, Project and DataReplacement

use crate::common::*;
use tessel::durability::DataReplacementGroup;

fn with_column_c() -> Schema {
    Schema::new(vec![
        Field::new(0, "a", "int64"),
        Field::new(1, "b", "utf8"),
        Field::new(2, "c", "float64"),
    ])
    .unwrap()
}

#[test]
fn merge_adds_a_column_to_every_fragment() {
    let mut table = memory_table(&[4, 6]);
    let fragments: Vec<Fragment> = table
        .manifest()
        .fragments
        .iter()
        .map(|f| {
            f.clone()
                .with_file(DataFile::new(format!("c-{}.lance", f.id), vec![2]))
        })
        .collect();

    table.merge(fragments, with_column_c()).unwrap();
    assert!(table.schema().contains(2));
    for fragment in &table.manifest().fragments {
        assert!(fragment.file_for_field(2).is_some());
    }
    assert_eq!(table.count_rows(), 10);
}

#[test]
fn merge_must_cover_every_fragment() {
    let mut table = memory_table(&[4, 6]);
    let first = table.manifest().fragments[0].clone();
    let err = table
        .merge(
            vec![first.with_file(DataFile::new("c.lance", vec![2]))],
            with_column_c(),
        )
        .unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {}", err);
    assert_eq!(table.version(), 1);
}

#[test]
fn dropping_a_column_drops_indices_on_it() {
    let mut table = memory_table(&[4]);
    table.create_index("by_b", &[1]).unwrap();
    table.create_index("by_a", &[0]).unwrap();

    table.drop_columns(&["b"]).unwrap();
    assert!(!table.schema().contains(1));
    assert!(table.manifest().index("by_b").is_none());
    assert!(table.manifest().index("by_a").is_some());
    assert_eq!(table.manifest().fragments[0].field_ids(), [0].into_iter().collect());

    table.drop_index("by_a").unwrap();
    assert!(table.manifest().indices.is_empty());
}

#[test]
fn replace_data_swaps_the_file_for_a_column() {
    let mut table = Table::create(
        std::sync::Arc::new(MemoryObjectStore::new()),
        schema(),
        vec![Fragment::staged(
            vec![
                DataFile::new("a.lance", vec![0]),
                DataFile::new("b.lance", vec![1]),
            ],
            3,
        )],
        TableConfig::default(),
    )
    .unwrap();
    let id = table.manifest().fragments[0].id;

    table
        .replace_data(vec![DataReplacementGroup {
            fragment_id: id,
            new_file: DataFile::new("b-v2.lance", vec![1]),
        }])
        .unwrap();
    let fragment = table.manifest().fragment(id).unwrap();
    assert_eq!(fragment.file_for_field(1).unwrap().path, "b-v2.lance");
    assert_eq!(fragment.file_for_field(0).unwrap().path, "a.lance");

    let err = table
        .replace_data(vec![DataReplacementGroup {
            fragment_id: id,
            new_file: DataFile::new("ab.lance", vec![0, 1]),
        }])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn overwrite_resets_fragments_but_not_ids() {
    let mut table = memory_table(&[4, 4]);
    table.overwrite(with_column_c(), vec![staged(2)]).unwrap();
    assert_eq!(table.count_rows(), 2);
    assert!(table.schema().contains(2));
    assert_eq!(fragment_ids(&table), vec![3]);
}
