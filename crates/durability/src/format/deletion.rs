//! Deletion file formats
//!
//! Both encodings use the shared envelope:
//!
//! - Sparse array (`TSDA`, `.arrow`): `[count: u32 LE] [offset: u32 LE]...`,
//!   offsets strictly ascending
//! - Bitmap (`TSDB`, `.bin`): roaring bitmap portable serialization

use super::{decode_envelope, encode_envelope, FormatError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use roaring::RoaringBitmap;
use std::collections::HashSet;
use std::io::Cursor;
use tessel_core::{DeletionFileType, DeletionVector, Error, Result};

/// Sparse array deletion file magic: "TSDA"
pub const SPARSE_ARRAY_MAGIC: [u8; 4] = *b"TSDA";

/// Bitmap deletion file magic: "TSDB"
pub const BITMAP_MAGIC: [u8; 4] = *b"TSDB";

const DELETION_FORMAT_VERSION: u32 = 1;

/// Serialize a deletion vector in the given encoding
pub fn encode_deletion_file(file_type: DeletionFileType, dv: &DeletionVector) -> Result<Vec<u8>> {
    match file_type {
        DeletionFileType::SparseArray => {
            let offsets = dv.to_sorted_vec();
            let mut payload = Vec::with_capacity(4 + offsets.len() * 4);
            payload.write_u32::<LittleEndian>(offsets.len() as u32)?;
            for offset in offsets {
                payload.write_u32::<LittleEndian>(offset)?;
            }
            Ok(encode_envelope(
                SPARSE_ARRAY_MAGIC,
                DELETION_FORMAT_VERSION,
                &payload,
            ))
        }
        DeletionFileType::Bitmap => {
            let bitmap = dv.to_bitmap();
            let mut payload = Vec::with_capacity(bitmap.serialized_size());
            bitmap.serialize_into(&mut payload)?;
            Ok(encode_envelope(BITMAP_MAGIC, DELETION_FORMAT_VERSION, &payload))
        }
    }
}

/// Deserialize a deletion file read from `path`
pub fn decode_deletion_file(
    path: &str,
    file_type: DeletionFileType,
    bytes: &[u8],
) -> Result<DeletionVector> {
    let corrupt = |e: FormatError| Error::Serialization(format!("deletion file '{}': {}", path, e));
    match file_type {
        DeletionFileType::SparseArray => {
            let (_, payload) =
                decode_envelope(SPARSE_ARRAY_MAGIC, DELETION_FORMAT_VERSION, bytes)
                    .map_err(corrupt)?;
            let mut cursor = Cursor::new(payload);
            let io_err = |e: std::io::Error| corrupt(FormatError::Payload(e.to_string()));
            let count = cursor.read_u32::<LittleEndian>().map_err(io_err)? as usize;
            if payload.len() != 4 + count * 4 {
                return Err(corrupt(FormatError::Payload(format!(
                    "expected {} offsets, payload holds {} bytes",
                    count,
                    payload.len()
                ))));
            }
            let mut set = HashSet::with_capacity(count);
            let mut prev: Option<u32> = None;
            for _ in 0..count {
                let offset = cursor.read_u32::<LittleEndian>().map_err(io_err)?;
                if prev.is_some_and(|p| p >= offset) {
                    return Err(corrupt(FormatError::Payload(
                        "offsets are not strictly ascending".to_string(),
                    )));
                }
                prev = Some(offset);
                set.insert(offset);
            }
            if set.is_empty() {
                Ok(DeletionVector::NoDeletions)
            } else if set.len() > tessel_core::BITMAP_THRESHOLD {
                Ok(DeletionVector::Bitmap(set.into_iter().collect()))
            } else {
                Ok(DeletionVector::Set(set))
            }
        }
        DeletionFileType::Bitmap => {
            let (_, payload) =
                decode_envelope(BITMAP_MAGIC, DELETION_FORMAT_VERSION, bytes).map_err(corrupt)?;
            let bitmap = RoaringBitmap::deserialize_from(payload)
                .map_err(|e| corrupt(FormatError::Payload(e.to_string())))?;
            Ok(DeletionVector::from(bitmap))
        }
    }
}
