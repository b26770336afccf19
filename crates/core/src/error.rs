//! Error types for the table commit engine
//!
//! Every fallible operation in the workspace returns [`Result`]. Errors are
//! typed so callers can tell a retryable conflict apart from corruption or
//! an unsupported on-disk feature. We use `thiserror` for `Display` and
//! `Error` implementations.

use std::io;
use thiserror::Error;

/// Result type alias for table operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the table commit engine
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, object store access)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error outside of manifest or transaction files
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A concurrently committed transaction touched overlapping state
    #[error("Commit conflict: transaction read at version {read_version} conflicts with version {conflicting_version}: {message}")]
    Conflict {
        /// Version the failing transaction was built against
        read_version: u64,
        /// Version whose transaction caused the conflict
        conflicting_version: u64,
        /// Human readable reason
        message: String,
    },

    /// The commit retry budget (attempts or wall clock) was exhausted
    #[error("Commit failed after {attempts} attempts: {reason}")]
    CommitExhausted {
        /// Number of publish attempts made
        attempts: u32,
        /// Why the loop stopped
        reason: String,
    },

    /// A manifest declares feature flags this build does not understand
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Manifest file could not be decoded
    #[error("Corrupt manifest at '{path}': {message}")]
    CorruptManifest {
        /// Object store path of the manifest
        path: String,
        /// Decode failure detail
        message: String,
    },

    /// Transaction file could not be decoded
    #[error("Corrupt transaction at '{path}': {message}")]
    CorruptTransaction {
        /// Object store path of the transaction file
        path: String,
        /// Decode failure detail
        message: String,
    },

    /// External manifest store and object store disagree and resync failed
    #[error("External manifest store out of sync at version {version}: {message}")]
    ExternalStoreDesync {
        /// Version whose entry could not be reconciled
        version: u64,
        /// Resync failure detail
        message: String,
    },

    /// An operation references a fragment that does not exist in its target version
    #[error("Fragment {fragment_id} does not exist in version {version}")]
    StaleFragmentReference {
        /// Missing fragment id
        fragment_id: u64,
        /// Version the operation was applied against
        version: u64,
    },

    /// The version directory contains manifests from more than one naming scheme
    #[error("Table at '{path}' mixes manifest naming schemes")]
    NamingSchemeConflict {
        /// Versions directory path
        path: String,
    },

    /// Requested version has no manifest
    #[error("Version {0} not found")]
    VersionNotFound(u64),

    /// Object does not exist
    #[error("Object not found: {path}")]
    NotFound {
        /// Object store path
        path: String,
    },

    /// Conditional put found an existing object
    #[error("Object already exists: {path}")]
    AlreadyExists {
        /// Object store path
        path: String,
    },

    /// Tag name is not bound to any version
    #[error("Tag not found: {0}")]
    TagNotFound(String),

    /// Tag name is already bound to a version
    #[error("Tag already exists: {0}")]
    TagExists(String),

    /// Caller supplied invalid arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an [`Error::InvalidInput`]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }

    /// Build an [`Error::Internal`]
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    /// Build an [`Error::CorruptManifest`]
    pub fn corrupt_manifest(path: impl Into<String>, message: impl ToString) -> Self {
        Error::CorruptManifest {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Build an [`Error::CorruptTransaction`]
    pub fn corrupt_transaction(path: impl Into<String>, message: impl ToString) -> Self {
        Error::CorruptTransaction {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Build an [`Error::NotFound`]
    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound { path: path.into() }
    }

    /// True if this error means a concurrent writer got there first.
    ///
    /// Stale fragment references are always conflicts: the fragment was
    /// removed by someone else between read and commit.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Conflict { .. } | Error::StaleFragmentReference { .. }
        )
    }

    /// True if the caller may rebuild its operation and try again.
    pub fn is_retryable(&self) -> bool {
        self.is_conflict() || matches!(self, Error::CommitExhausted { .. })
    }

    /// True if the error came from missing data rather than a failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } | Error::VersionNotFound(_) | Error::TagNotFound(_) => true,
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
