//! Transaction file format
//!
//! Envelope with magic `TSLT` around a MessagePack-encoded
//! [`crate::transaction_log::Transaction`]. The operation is an externally
//! tagged enum, so a file written by a newer build with an unknown
//! operation fails to decode here.

use super::{decode_envelope, encode_envelope, FormatError};
use crate::transaction_log::Transaction;
use tessel_core::{Error, Result};

/// Transaction magic bytes: "TSLT"
pub const TRANSACTION_MAGIC: [u8; 4] = *b"TSLT";

/// Current transaction format version
pub const TRANSACTION_FORMAT_VERSION: u32 = 1;

/// Serialize a transaction
pub fn encode_transaction(txn: &Transaction) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(txn)
        .map_err(|e| Error::Serialization(format!("transaction encode: {}", e)))?;
    Ok(encode_envelope(
        TRANSACTION_MAGIC,
        TRANSACTION_FORMAT_VERSION,
        &payload,
    ))
}

/// Deserialize a transaction read from `path`
pub fn decode_transaction(path: &str, bytes: &[u8]) -> Result<Transaction> {
    let (_, payload) = decode_envelope(TRANSACTION_MAGIC, TRANSACTION_FORMAT_VERSION, bytes)
        .map_err(|e| Error::corrupt_transaction(path, e))?;
    rmp_serde::from_slice(payload)
        .map_err(|e| Error::corrupt_transaction(path, FormatError::Payload(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction_log::{Operation, RewriteGroup, RewrittenIndex};
    use serde::Serialize;
    use tessel_core::{DataFile, Fragment};
    use uuid::Uuid;

    #[test]
    fn test_rewrite_transaction_file() {
        let txn = Transaction::new(
            3,
            Operation::Rewrite {
                groups: vec![RewriteGroup {
                    old_fragments: vec![Fragment::new(1).with_physical_rows(5)],
                    new_fragments: vec![Fragment::staged(
                        vec![DataFile::new("n.lance", vec![0])],
                        5,
                    )],
                }],
                rewritten_indices: vec![RewrittenIndex {
                    old_id: Uuid::new_v4(),
                    new_id: Uuid::new_v4(),
                }],
            },
        )
        .with_tag("compacted");
        let bytes = encode_transaction(&txn).unwrap();
        let decoded = decode_transaction("_transactions/3-x.txn", &bytes).unwrap();
        assert_eq!(decoded, txn);
    }

    #[test]
    fn test_unknown_operation_is_corrupt() {
        #[derive(Serialize)]
        enum FutureOperation {
            Vacuum { aggressive: bool },
        }
        #[derive(Serialize)]
        struct FutureTransaction {
            read_version: u64,
            uuid: Uuid,
            operation: FutureOperation,
            tag: Option<String>,
            blobs_op: Option<FutureOperation>,
        }
        let future = FutureTransaction {
            read_version: 1,
            uuid: Uuid::new_v4(),
            operation: FutureOperation::Vacuum { aggressive: true },
            tag: None,
            blobs_op: None,
        };
        let payload = rmp_serde::to_vec_named(&future).unwrap();
        let bytes =
            crate::format::encode_envelope(TRANSACTION_MAGIC, TRANSACTION_FORMAT_VERSION, &payload);
        assert!(matches!(
            decode_transaction("p", &bytes),
            Err(Error::CorruptTransaction { .. })
        ));
    }
}
