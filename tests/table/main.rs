//! Table Integration Tests
//!
//! Schema evolution, maintenance (compaction, cleanup) and the blob
//! sub-table, exercised against real on-disk stores.

#[path = "../common/mod.rs"]
mod common;

mod blobs;
mod maintenance;
mod schema_ops;
