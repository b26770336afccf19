//! Shared test utilities for all integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::{Arc, Once};
use tempfile::TempDir;
pub use tessel::storage::{
    ExternalManifestStore, LocalObjectStore, MemoryExternalStore, MemoryObjectStore, ObjectStore,
    TablePaths,
};
pub use tessel::{
    DataFile, Error, Field, Fragment, ManifestNamingScheme, Operation, RowAddress, Schema,
    Table, TableConfig, Transaction,
};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness so failing tests show
/// the commit log.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Fixtures
// ============================================================================

/// Two-column schema used by every suite
pub fn schema() -> Schema {
    Schema::new(vec![Field::new(0, "a", "int64"), Field::new(1, "b", "utf8")])
        .expect("valid schema")
}

/// A staged fragment with one data file of `rows` rows
pub fn staged(rows: u64) -> Fragment {
    Fragment::staged(
        vec![DataFile::new(
            format!("{}.lance", uuid::Uuid::new_v4()),
            vec![0, 1],
        )],
        rows,
    )
}

/// In-memory table with one fragment per entry of `rows`
pub fn memory_table(rows: &[u64]) -> Table {
    Table::create(
        Arc::new(MemoryObjectStore::new()),
        schema(),
        rows.iter().map(|r| staged(*r)).collect(),
        TableConfig::default(),
    )
    .expect("create table")
}

/// On-disk table; keep the `TempDir` alive for the test's duration
pub struct LocalTable {
    pub table: Table,
    pub store: Arc<dyn ObjectStore>,
    pub dir: TempDir,
}

impl LocalTable {
    pub fn create(rows: &[u64]) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store: Arc<dyn ObjectStore> =
            Arc::new(LocalObjectStore::new(dir.path()).expect("local store"));
        let table = Table::create(
            Arc::clone(&store),
            schema(),
            rows.iter().map(|r| staged(*r)).collect(),
            TableConfig::default(),
        )
        .expect("create table");
        LocalTable { table, store, dir }
    }

    /// A fresh handle with its own commit coordinator
    pub fn open(&self) -> Table {
        Table::open(Arc::clone(&self.store), TableConfig::default()).expect("open table")
    }
}

/// Fragment ids of the handle's manifest, in manifest order
pub fn fragment_ids(table: &Table) -> Vec<u64> {
    table.manifest().fragments.iter().map(|f| f.id).collect()
}
