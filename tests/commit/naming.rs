//! Manifest naming schemes
//!
//! A table directory holds manifests of exactly one naming scheme.

use crate::common::*;
use std::sync::Arc;

fn table_with_scheme(store: Arc<dyn ObjectStore>, scheme: ManifestNamingScheme) -> Table {
    Table::create(
        store,
        schema(),
        vec![staged(3)],
        TableConfig::default().with_naming_scheme(scheme),
    )
    .unwrap()
}

#[test]
fn v1_table_keeps_v1_names() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let mut table = table_with_scheme(Arc::clone(&store), ManifestNamingScheme::V1);
    table.append(vec![staged(1)]).unwrap();

    let paths = TablePaths::root();
    assert!(store.exists(&paths.manifest(ManifestNamingScheme::V1, 2)).unwrap());
    assert!(!store.exists(&paths.manifest(ManifestNamingScheme::V2, 2)).unwrap());
}

#[test]
fn existing_table_scheme_wins_over_config() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    table_with_scheme(Arc::clone(&store), ManifestNamingScheme::V1);

    // The configured scheme only applies when a table is created
    let mut reopened = Table::open(
        Arc::clone(&store),
        TableConfig::default().with_naming_scheme(ManifestNamingScheme::V2),
    )
    .unwrap();
    reopened.append(vec![staged(1)]).unwrap();
    assert_eq!(reopened.manifest().naming_scheme, ManifestNamingScheme::V1);
    assert!(store
        .exists(&TablePaths::root().manifest(ManifestNamingScheme::V1, 2))
        .unwrap());
}

#[test]
fn mixed_directory_is_rejected_on_open() {
    let local = LocalTable::create(&[3]);
    let paths = TablePaths::root();
    let bytes = local
        .store
        .get(&paths.manifest(ManifestNamingScheme::V2, 1))
        .unwrap();
    local
        .store
        .put(&paths.manifest(ManifestNamingScheme::V1, 2), &bytes)
        .unwrap();

    let err = Table::open(Arc::clone(&local.store), TableConfig::default()).unwrap_err();
    assert!(matches!(err, Error::NamingSchemeConflict { .. }));
}
