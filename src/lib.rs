//! Tessel - versioned, concurrently-writable tables on object storage
//!
//! A Tessel table is a sequence of immutable manifests. Each manifest lists
//! the fragments (row groups) of one version together with their deletion
//! overlays and stable row ids. Writers commit optimistically: they build an
//! operation against the version they read, and the commit coordinator
//! rebases it onto whatever was published in between or reports a conflict.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tessel::{DataFile, Field, Fragment, Schema, Table, TableConfig};
//! use tessel::storage::LocalObjectStore;
//!
//! let store = Arc::new(LocalObjectStore::new("/data/events")?);
//! let schema = Schema::new(vec![Field::new(0, "id", "int64")])?;
//!
//! // Version 1
//! let mut table = Table::create(store, schema, vec![], TableConfig::default())?;
//!
//! // Version 2: fragment files are written first, then committed
//! let fragment = Fragment::staged(vec![DataFile::new("part-0.lance", vec![0])], 1024);
//! table.append(vec![fragment])?;
//! ```
//!
//! # Architecture
//!
//! | Crate | Role |
//! |-------|------|
//! | [`core`](crate::core_types) | Table model, errors, row ids, deletion vectors |
//! | [`storage`] | Object stores, path layout, external manifest stores |
//! | [`durability`] | Manifest/transaction files, commit handlers |
//! | [`concurrency`] | Conflict matrix, manifest building, commit retry loop |
//! | [`engine`] | `Table` handle, compaction, cleanup, readers |

pub use tessel_concurrency as concurrency;
pub use tessel_core as core_types;
pub use tessel_durability as durability;
pub use tessel_engine as engine;
pub use tessel_storage as storage;

pub use tessel_core::{
    DataFile, DeletionFile, DeletionVector, Error, Field, Fragment, IndexMetadata, Manifest,
    ManifestNamingScheme, Result, RowAddress, RowIdSequence, Schema,
};
pub use tessel_durability::{Operation, Transaction};
pub use tessel_engine::{
    CleanupStats, CompactionMetrics, CompactionOptions, FnFilter, FragmentRewriter,
    MetadataOnlyRewriter, OffsetFilter, RowFilter, RowIdIndex, ScanOptions, ScanRow, Table,
    TableBuilder, TableConfig, VersionInfo,
};
