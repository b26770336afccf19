//! Table engine for Tessel
//!
//! This crate puts the lower layers together behind a [`Table`] handle:
//! - Table: open/create, checkout, every commit operation
//! - Deletion overlay: turning row selections into deletion files
//! - Row id index: stable row id to physical address lookup
//! - Compaction: planning and committing fragment rewrites
//! - Cleanup: removing versions nobody references
//! - Scan/take: row-level readers over one version
//!
//! The engine is the only component that knows about:
//! - Which commit handler a store needs
//! - Writer configuration (`tessel.toml`)
//! - How row filters become deletion vectors

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod compaction;
pub mod deletion;
pub mod filter;
pub mod row_id_index;
pub mod scan;
pub mod table;

pub use cleanup::{cleanup_old_versions, CleanupStats};
pub use compaction::{
    plan_compaction, CompactionMetrics, CompactionOptions, CompactionPlan, CompactionTask,
    FragmentRewriter, MetadataOnlyRewriter, RewriteInput, RewrittenFragment,
};
pub use deletion::{apply_deletions, deleted_rows, mark_deleted, DeletionOutcome};
pub use filter::{FnFilter, OffsetFilter, RowFilter};
pub use row_id_index::RowIdIndex;
pub use scan::{scan, take_rows, ScanOptions, ScanRow};
pub use table::{ConfigError, Table, TableBuilder, TableConfig, VersionInfo, CONFIG_FILE_NAME};
