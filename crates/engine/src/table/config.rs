//! Table configuration via `tessel.toml`
//!
//! Settings that shape how this process writes a table: manifest naming for
//! new tables, stable row ids, commit retry bounds, side-file thresholds and
//! compaction defaults. Settings stored inside the table live in the
//! manifest's config map instead.

use crate::compaction::CompactionOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tessel_concurrency::CommitConfig;
use tessel_core::{ManifestNamingScheme, BITMAP_THRESHOLD};
use thiserror::Error;

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "tessel.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Naming scheme is not `"v1"` or `"v2"`
    #[error("Invalid naming scheme '{0}'. Expected \"v1\" or \"v2\".")]
    InvalidNamingScheme(String),

    /// A numeric setting is out of range
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        /// Setting name
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// Config file could not be read or written
    #[error("Config file '{path}': {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    Parse(String),
}

impl From<ConfigError> for tessel_core::Error {
    fn from(e: ConfigError) -> Self {
        tessel_core::Error::InvalidInput(e.to_string())
    }
}

fn default_naming_scheme() -> String {
    "v2".to_string()
}

fn default_stable_row_ids() -> bool {
    true
}

fn default_max_commit_retries() -> u32 {
    tessel_concurrency::DEFAULT_MAX_RETRIES
}

fn default_commit_timeout_ms() -> u64 {
    30_000
}

fn default_inline_row_id_limit() -> usize {
    200 * 1024
}

fn default_sparse_deletion_max() -> usize {
    BITMAP_THRESHOLD
}

/// Table writer configuration loaded from `tessel.toml`.
///
/// # Example
///
/// ```toml
/// naming_scheme = "v2"
/// stable_row_ids = true
/// max_commit_retries = 20
///
/// [compaction]
/// target_rows_per_fragment = 1048576
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Manifest naming for new tables: `"v1"` or `"v2"`.
    #[serde(default = "default_naming_scheme")]
    pub naming_scheme: String,
    /// Track stable row ids in new tables.
    #[serde(default = "default_stable_row_ids")]
    pub stable_row_ids: bool,
    /// Publish retries after losing a race.
    #[serde(default = "default_max_commit_retries")]
    pub max_commit_retries: u32,
    /// Wall-clock budget for one commit, in milliseconds.
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,
    /// Row-id sequences larger than this are written to `_rowids/`.
    #[serde(default = "default_inline_row_id_limit")]
    pub inline_row_id_limit_bytes: usize,
    /// Most deleted rows a sparse-array deletion file may hold.
    #[serde(default = "default_sparse_deletion_max")]
    pub sparse_deletion_max: usize,
    /// Defaults for `compact_files`.
    #[serde(default)]
    pub compaction: CompactionOptions,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            naming_scheme: default_naming_scheme(),
            stable_row_ids: default_stable_row_ids(),
            max_commit_retries: default_max_commit_retries(),
            commit_timeout_ms: default_commit_timeout_ms(),
            inline_row_id_limit_bytes: default_inline_row_id_limit(),
            sparse_deletion_max: default_sparse_deletion_max(),
            compaction: CompactionOptions::default(),
        }
    }
}

impl TableConfig {
    /// Use the given naming scheme for new tables (builder pattern)
    pub fn with_naming_scheme(mut self, scheme: ManifestNamingScheme) -> Self {
        self.naming_scheme = match scheme {
            ManifestNamingScheme::V1 => "v1",
            ManifestNamingScheme::V2 => "v2",
        }
        .to_string();
        self
    }

    /// Enable or disable stable row ids for new tables (builder pattern)
    pub fn with_stable_row_ids(mut self, enabled: bool) -> Self {
        self.stable_row_ids = enabled;
        self
    }

    /// Set the commit retry count (builder pattern)
    pub fn with_max_commit_retries(mut self, retries: u32) -> Self {
        self.max_commit_retries = retries;
        self
    }

    /// Set the commit timeout (builder pattern)
    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the inline row-id limit (builder pattern)
    pub fn with_inline_row_id_limit(mut self, bytes: usize) -> Self {
        self.inline_row_id_limit_bytes = bytes;
        self
    }

    /// Set the sparse deletion file limit (builder pattern)
    pub fn with_sparse_deletion_max(mut self, rows: usize) -> Self {
        self.sparse_deletion_max = rows;
        self
    }

    /// Set compaction defaults (builder pattern)
    pub fn with_compaction(mut self, options: CompactionOptions) -> Self {
        self.compaction = options;
        self
    }

    /// Parse the naming scheme string.
    pub fn manifest_naming_scheme(&self) -> Result<ManifestNamingScheme, ConfigError> {
        match self.naming_scheme.as_str() {
            "v1" => Ok(ManifestNamingScheme::V1),
            "v2" => Ok(ManifestNamingScheme::V2),
            other => Err(ConfigError::InvalidNamingScheme(other.to_string())),
        }
    }

    /// Commit loop bounds
    pub fn commit_config(&self) -> CommitConfig {
        CommitConfig::default()
            .with_max_retries(self.max_commit_retries)
            .with_timeout(Duration::from_millis(self.commit_timeout_ms))
    }

    /// Check every setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.manifest_naming_scheme()?;
        if self.commit_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "commit_timeout_ms",
                message: "must be positive".to_string(),
            });
        }
        if self.inline_row_id_limit_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "inline_row_id_limit_bytes",
                message: "must be positive".to_string(),
            });
        }
        self.compaction.validate()
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tessel table configuration
#
# Manifest naming for new tables: "v2" (default) or "v1"
#   "v2" = names sort newest first, latest version found with one list call
#   "v1" = {version}.manifest, for readers that predate v2
naming_scheme = "v2"

# Track stable row ids that survive compaction (default: true)
stable_row_ids = true

# Commit retry bounds
max_commit_retries = 20
commit_timeout_ms = 30000

# Row-id sequences larger than this many bytes go to _rowids/
inline_row_id_limit_bytes = 204800

# Deletion files with more rows than this use a bitmap
sparse_deletion_max = 5000

[compaction]
target_rows_per_fragment = 1048576
materialize_deletions = true
materialize_deletions_threshold = 0.1
# max_rows_per_group = 4194304
"#
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TableConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}
