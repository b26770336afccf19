//! On-disk byte formats for manifests, transactions and deletion files.
//!
//! Manifest and transaction files share one envelope:
//!
//! ```text
//! +------------------+
//! | Magic            | 4 bytes
//! | Format Version   | 4 bytes (u32 LE)
//! | Payload Length   | 4 bytes (u32 LE)
//! | Payload          | variable (MessagePack)
//! | CRC32            | 4 bytes (u32 LE, over all preceding bytes)
//! +------------------+
//! ```
//!
//! # Module Structure
//!
//! - `manifest`: manifest files in `_versions/`
//! - `transaction`: transaction files in `_transactions/`
//! - `deletion`: sparse-array and bitmap deletion files in `_deletions/`

pub mod deletion;
pub mod manifest;
pub mod transaction;

pub use deletion::{
    decode_deletion_file, encode_deletion_file, BITMAP_MAGIC, SPARSE_ARRAY_MAGIC,
};
pub use manifest::{decode_manifest, encode_manifest, MANIFEST_FORMAT_VERSION, MANIFEST_MAGIC};
pub use transaction::{
    decode_transaction, encode_transaction, TRANSACTION_FORMAT_VERSION, TRANSACTION_MAGIC,
};

/// magic + version + length
const HEADER_SIZE: usize = 12;
const CRC_SIZE: usize = 4;

/// Envelope decode failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// Fewer bytes than the fixed header and trailer
    #[error("file too short: {0} bytes")]
    TooShort(usize),

    /// Magic bytes do not match the expected file type
    #[error("invalid magic bytes {found:?}, expected {expected:?}")]
    InvalidMagic {
        /// Expected magic
        expected: [u8; 4],
        /// Magic found in the file
        found: [u8; 4],
    },

    /// Format version newer than this build
    #[error("unsupported format version {found} (max supported {max})")]
    UnsupportedVersion {
        /// Version found in the file
        found: u32,
        /// Highest version this build reads
        max: u32,
    },

    /// Payload length field disagrees with the file size
    #[error("payload length {declared} does not match file size")]
    LengthMismatch {
        /// Declared payload length
        declared: u32,
    },

    /// Checksum mismatch
    #[error("checksum mismatch: stored {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// CRC stored in the file
        expected: u32,
        /// CRC computed over the content
        computed: u32,
    },

    /// Payload could not be encoded or decoded
    #[error("payload codec error: {0}")]
    Payload(String),
}

/// Wrap a payload in the shared envelope
pub(crate) fn encode_envelope(magic: [u8; 4], version: u32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    bytes.extend_from_slice(&magic);
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(payload);
    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes
}

/// Validate the envelope and return `(version, payload)`
pub(crate) fn decode_envelope(
    magic: [u8; 4],
    max_version: u32,
    bytes: &[u8],
) -> Result<(u32, &[u8]), FormatError> {
    if bytes.len() < HEADER_SIZE + CRC_SIZE {
        return Err(FormatError::TooShort(bytes.len()));
    }
    let found = read_array::<4>(bytes, 0);
    if found != magic {
        return Err(FormatError::InvalidMagic {
            expected: magic,
            found,
        });
    }

    let body = &bytes[..bytes.len() - CRC_SIZE];
    let expected = u32::from_le_bytes(read_array::<4>(bytes, bytes.len() - CRC_SIZE));
    let computed = crc32fast::hash(body);
    if expected != computed {
        return Err(FormatError::ChecksumMismatch { expected, computed });
    }

    let version = u32::from_le_bytes(read_array::<4>(bytes, 4));
    if version == 0 || version > max_version {
        return Err(FormatError::UnsupportedVersion {
            found: version,
            max: max_version,
        });
    }

    let declared = u32::from_le_bytes(read_array::<4>(bytes, 8));
    if declared as usize != body.len() - HEADER_SIZE {
        return Err(FormatError::LengthMismatch { declared });
    }
    Ok((version, &body[HEADER_SIZE..]))
}

/// Copy `N` bytes at `offset`. Callers check bounds first.
fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}
