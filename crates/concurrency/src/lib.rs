//! Concurrency layer for Tessel
//!
//! This crate implements optimistic concurrency control over an object store:
//! - Conflict detection between an operation and concurrently committed ones
//! - ManifestBuilder: applying (and rebasing) an operation onto a manifest
//! - CommitCoordinator: the bounded read / check / build / publish loop
//!
//! There is no in-process lock. The only serialization point is the atomic
//! publish of the next manifest.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod conflict;
pub mod manager;

pub use builder::ManifestBuilder;
pub use conflict::{check_conflict, ConflictReason};
pub use manager::{CommitConfig, CommitCoordinator, DEFAULT_COMMIT_TIMEOUT, DEFAULT_MAX_RETRIES};
