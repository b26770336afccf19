//! Blob sub-table commits and tagged transactions

use crate::common::*;
use std::sync::Arc;

#[test]
fn blob_operation_commits_sibling_table_first() {
    init_tracing();
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let mut table =
        Table::create(Arc::clone(&store), schema(), vec![staged(2)], TableConfig::default())
            .unwrap();
    assert_eq!(table.manifest().blob_dataset_version, None);

    let blobs_schema = Schema::new(vec![Field::new(0, "blob", "binary")]).unwrap();
    let txn = Transaction::new(
        table.version(),
        Operation::Append {
            fragments: vec![staged(2)],
        },
    )
    .with_blobs_op(Operation::Overwrite {
        schema: blobs_schema,
        fragments: vec![Fragment::staged(vec![DataFile::new("blob-0.lance", vec![0])], 2)],
        config_upsert: None,
    });
    table.commit_transaction(txn).unwrap();
    assert_eq!(table.manifest().blob_dataset_version, Some(1));

    let blobs = Table::builder(Arc::clone(&store))
        .with_base_path(TablePaths::root().blobs().base())
        .open()
        .unwrap();
    assert_eq!(blobs.version(), 1);
    assert_eq!(blobs.count_rows(), 2);

    let txn = Transaction::new(
        table.version(),
        Operation::Append {
            fragments: vec![staged(1)],
        },
    )
    .with_blobs_op(Operation::Append {
        fragments: vec![Fragment::staged(vec![DataFile::new("blob-1.lance", vec![0])], 1)],
    });
    table.commit_transaction(txn).unwrap();
    assert_eq!(table.manifest().blob_dataset_version, Some(2));
    assert_eq!(table.count_rows(), 5);
}

#[test]
fn tagged_transaction_binds_its_version() {
    let mut table = memory_table(&[3]);
    let txn = Transaction::new(
        table.version(),
        Operation::Append {
            fragments: vec![staged(3)],
        },
    )
    .with_tag("nightly");
    let version = table.commit_transaction(txn).unwrap();

    assert_eq!(table.tag_version("nightly").unwrap(), version);
    assert_eq!(table.manifest().tag.as_deref(), Some("nightly"));

    // A taken tag is refused before anything is published
    let txn = Transaction::new(
        table.version(),
        Operation::Append {
            fragments: vec![staged(1)],
        },
    )
    .with_tag("nightly");
    assert!(matches!(
        table.commit_transaction(txn),
        Err(Error::TagExists(_))
    ));
    assert_eq!(table.version(), version);
}
