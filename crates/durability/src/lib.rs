//! Durability layer for Tessel
//!
//! This crate handles everything that is written to the object store:
//!
//! - Binary formats for manifests, transactions and deletion files
//! - Transaction log entries (`Transaction`, `Operation`)
//! - Side files: deletion vectors, external row-id sequences
//! - Manifest publication through conditional put or an external CAS store
//! - Version listing and resolution across naming schemes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit_handler;
pub mod files;
pub mod format;
pub mod transaction_log;

pub use commit_handler::{
    list_manifests, CommitHandler, ConditionalPutCommitHandler, ExternalManifestCommitHandler,
    ManifestLocation,
};
pub use files::{
    bind_tag, claim_tag, read_deletion_vector, read_manifest, read_row_ids, read_tag,
    read_tag_marker, read_transaction, release_tag, validate_tag, write_deletion_file,
    write_row_ids, write_tag, write_transaction,
};
pub use format::FormatError;
pub use transaction_log::{
    DataReplacementGroup, Operation, RewriteGroup, RewrittenIndex, Transaction,
};
