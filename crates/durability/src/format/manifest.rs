//! Manifest file format
//!
//! Envelope with magic `TSLM` around a MessagePack-encoded
//! [`tessel_core::Manifest`]. Decoding does not check feature flags; callers
//! decide whether they are reading or writing and check the matching set.

use super::{decode_envelope, encode_envelope, FormatError};
use tessel_core::{Error, Manifest, Result};

/// Manifest magic bytes: "TSLM"
pub const MANIFEST_MAGIC: [u8; 4] = *b"TSLM";

/// Current manifest format version
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Serialize a manifest
pub fn encode_manifest(manifest: &Manifest) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(manifest)
        .map_err(|e| Error::Serialization(format!("manifest encode: {}", e)))?;
    Ok(encode_envelope(
        MANIFEST_MAGIC,
        MANIFEST_FORMAT_VERSION,
        &payload,
    ))
}

/// Deserialize a manifest read from `path`
pub fn decode_manifest(path: &str, bytes: &[u8]) -> Result<Manifest> {
    let (_, payload) = decode_envelope(MANIFEST_MAGIC, MANIFEST_FORMAT_VERSION, bytes)
        .map_err(|e| Error::corrupt_manifest(path, e))?;
    rmp_serde::from_slice(payload)
        .map_err(|e| Error::corrupt_manifest(path, FormatError::Payload(e.to_string())))
}
