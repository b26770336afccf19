//! Storage layer for Tessel
//!
//! This crate provides the I/O substrate the commit engine runs on:
//! - ObjectStore: get/put/put-if-absent/list over `/`-separated paths
//! - LocalObjectStore: filesystem store with write-fsync-rename and
//!   hard-link based create-if-absent
//! - MemoryObjectStore: in-memory store, optionally without conditional put
//! - TablePaths: the table directory layout
//! - Manifest naming schemes (V1 ascending, V2 descending)
//! - ExternalManifestStore: CAS side channel for stores without
//!   conditional put

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod external;
pub mod local;
pub mod memory;
pub mod naming;
pub mod object_store;
pub mod paths;

pub use external::{ExternalManifestStore, MemoryExternalStore};
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use naming::{
    check_manifest_version, detect_naming_scheme, manifest_file_name, parse_manifest_file_name,
    staged_manifest_name, MAX_V1_VERSION,
};
pub use object_store::ObjectStore;
pub use paths::TablePaths;
