//! Manifest file naming schemes
//!
//! - V1: `{version}.manifest`
//! - V2: `{u64::MAX - version:020}.manifest`
//!
//! V2 names are fixed width and count down, so an ascending listing of
//! `_versions/` yields the newest version first. A table uses exactly one
//! scheme; a directory mixing both is rejected. Staged manifests written by
//! the external-store commit path (`{name}.manifest-{uuid}`) are never
//! treated as versions.
//!
//! Scheme detection goes by stem width: 20 digits is V2, anything shorter is
//! V1. A V1 version therefore has at most 19 digits, and
//! [`check_manifest_version`] refuses to name one above [`MAX_V1_VERSION`].

use tessel_core::{Error, ManifestNamingScheme, Result};

/// Manifest file extension
pub const MANIFEST_EXTENSION: &str = "manifest";

/// Width of a V2 manifest stem
const V2_WIDTH: usize = 20;

/// Largest version a V1 table can publish
pub const MAX_V1_VERSION: u64 = 9_999_999_999_999_999_999;

/// Reject versions the scheme cannot name unambiguously
pub fn check_manifest_version(scheme: ManifestNamingScheme, version: u64) -> Result<()> {
    if scheme == ManifestNamingScheme::V1 && version > MAX_V1_VERSION {
        return Err(Error::invalid_input(format!(
            "version {} exceeds the V1 naming limit {}",
            version, MAX_V1_VERSION
        )));
    }
    Ok(())
}

/// File name (without directory) of the manifest for `version`
pub fn manifest_file_name(scheme: ManifestNamingScheme, version: u64) -> String {
    match scheme {
        ManifestNamingScheme::V1 => format!("{}.{}", version, MANIFEST_EXTENSION),
        ManifestNamingScheme::V2 => {
            format!("{:020}.{}", u64::MAX - version, MANIFEST_EXTENSION)
        }
    }
}

/// Parse a manifest file name into its version and scheme.
///
/// Returns `None` for anything that is not a finalized manifest.
pub fn parse_manifest_file_name(name: &str) -> Option<(u64, ManifestNamingScheme)> {
    let stem = name.strip_suffix(".manifest")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u64 = stem.parse().ok()?;
    if stem.len() == V2_WIDTH {
        Some((u64::MAX - n, ManifestNamingScheme::V2))
    } else {
        Some((n, ManifestNamingScheme::V1))
    }
}

/// Detect the scheme used by a set of `_versions/` file names.
///
/// Returns `None` for an empty directory and [`Error::NamingSchemeConflict`]
/// when both schemes are present.
pub fn detect_naming_scheme<'a>(
    versions_dir: &str,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<Option<ManifestNamingScheme>> {
    let mut found: Option<ManifestNamingScheme> = None;
    for name in names {
        if let Some((_, scheme)) = parse_manifest_file_name(name) {
            match found {
                None => found = Some(scheme),
                Some(existing) if existing != scheme => {
                    return Err(Error::NamingSchemeConflict {
                        path: versions_dir.to_string(),
                    })
                }
                Some(_) => {}
            }
        }
    }
    Ok(found)
}

/// Name of a staged manifest for the external-store commit path
pub fn staged_manifest_name(canonical: &str, id: &uuid::Uuid) -> String {
    format!("{}-{}", canonical, id)
}
