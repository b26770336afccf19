//! Reader and writer feature flags
//!
//! A manifest advertises which on-disk features it relies on. A process that
//! finds a bit it does not know must refuse to read (reader flags) or write
//! (writer flags) rather than guess.

use crate::error::{Error, Result};
use crate::manifest::Manifest;

/// Fragments may carry deletion files
pub const FLAG_DELETION_FILES: u64 = 1;
/// Fragments carry stable row-id sequences
pub const FLAG_STABLE_ROW_IDS: u64 = 2;
/// Manifest carries a table config map
pub const FLAG_TABLE_CONFIG: u64 = 4;

/// Every bit this build understands
pub const FLAG_KNOWN: u64 = FLAG_DELETION_FILES | FLAG_STABLE_ROW_IDS | FLAG_TABLE_CONFIG;

/// Recompute flags from manifest contents.
///
/// The stable row-id bit is sticky: once a table tracks row ids it keeps
/// doing so for its whole history.
pub fn apply_feature_flags(manifest: &mut Manifest, enable_stable_row_ids: bool) -> Result<()> {
    let mut reader = 0;
    let mut writer = 0;

    if manifest
        .fragments
        .iter()
        .any(|f| f.deletion_file.is_some())
    {
        reader |= FLAG_DELETION_FILES;
        writer |= FLAG_DELETION_FILES;
    }

    let stable = enable_stable_row_ids || manifest.uses_stable_row_ids();
    if stable {
        if let Some(frag) = manifest.fragments.iter().find(|f| f.row_id_meta.is_none()) {
            return Err(Error::internal(format!(
                "fragment {} has no row id sequence in a table with stable row ids",
                frag.id
            )));
        }
        reader |= FLAG_STABLE_ROW_IDS;
        writer |= FLAG_STABLE_ROW_IDS;
    }

    if !manifest.config.is_empty() {
        writer |= FLAG_TABLE_CONFIG;
    }

    manifest.reader_feature_flags = reader;
    manifest.writer_feature_flags = writer;
    Ok(())
}

fn check(flags: u64, what: &str) -> Result<()> {
    let unknown = flags & !FLAG_KNOWN;
    if unknown != 0 {
        return Err(Error::UnsupportedFeature(format!(
            "{} flags contain unknown bits {:#x}",
            what, unknown
        )));
    }
    Ok(())
}

/// Fail unless every reader flag is understood
pub fn can_read(manifest: &Manifest) -> Result<()> {
    check(manifest.reader_feature_flags, "reader")
}

/// Fail unless every writer flag is understood
pub fn can_write(manifest: &Manifest) -> Result<()> {
    check(manifest.writer_feature_flags, "writer")
}
