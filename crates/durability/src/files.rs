//! Reading and writing the table's immutable side files
//!
//! Transaction files, deletion files and external row-id sequences are all
//! written once under a fresh name and never modified. Manifests are
//! published through a [`crate::commit_handler::CommitHandler`] instead.

use crate::format::{
    decode_deletion_file, decode_manifest, decode_transaction, encode_deletion_file,
    encode_transaction,
};
use crate::transaction_log::Transaction;
use rand::Rng;
use tessel_core::{
    preferred_file_type, DeletionFile, DeletionVector, Error, ExternalFile, Fragment, Manifest,
    Result, RowIdMeta, RowIdSequence,
};
use tessel_storage::{ObjectStore, TablePaths};
use tracing::debug;
use uuid::Uuid;

/// Read and decode a manifest
pub fn read_manifest(store: &dyn ObjectStore, path: &str) -> Result<Manifest> {
    let bytes = store.get(path)?;
    decode_manifest(path, &bytes)
}

/// Write a transaction file and return its path
pub fn write_transaction(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    txn: &Transaction,
) -> Result<String> {
    let path = paths.transaction(txn.read_version, &txn.uuid);
    let bytes = encode_transaction(txn)?;
    store.put(&path, &bytes)?;
    debug!(target: "tessel::txn", path = %path, op = txn.operation.name(), "Wrote transaction file");
    Ok(path)
}

/// Read and decode a transaction file
pub fn read_transaction(store: &dyn ObjectStore, path: &str) -> Result<Transaction> {
    let bytes = store.get(path)?;
    decode_transaction(path, &bytes)
}

/// Persist a deletion vector for a fragment.
///
/// Returns `None` when the vector is empty. The caller is responsible for
/// dropping fragments whose rows are all deleted before calling this.
pub fn write_deletion_file(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    fragment: &Fragment,
    read_version: u64,
    dv: &DeletionVector,
    sparse_max: usize,
) -> Result<Option<DeletionFile>> {
    if dv.is_empty() {
        return Ok(None);
    }
    if let Some(max) = dv.max() {
        if max as u64 >= fragment.physical_rows {
            return Err(Error::invalid_input(format!(
                "deleted offset {} is out of range for fragment {} with {} rows",
                max, fragment.id, fragment.physical_rows
            )));
        }
    }
    let file_type = preferred_file_type(dv.len(), fragment.physical_rows, sparse_max);
    let deletion = DeletionFile {
        file_type,
        read_version,
        id: rand::thread_rng().gen(),
        num_deleted_rows: dv.len() as u64,
    };
    let path = paths.deletion_file(fragment.id, &deletion);
    store.put(&path, &encode_deletion_file(file_type, dv)?)?;
    debug!(
        target: "tessel::deletion",
        fragment_id = fragment.id,
        deleted = deletion.num_deleted_rows,
        encoding = ?file_type,
        "Wrote deletion file"
    );
    Ok(Some(deletion))
}

/// Load the deletion vector of a fragment
pub fn read_deletion_vector(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    fragment: &Fragment,
) -> Result<DeletionVector> {
    let Some(deletion) = &fragment.deletion_file else {
        return Ok(DeletionVector::NoDeletions);
    };
    let path = paths.deletion_file(fragment.id, deletion);
    let bytes = store.get(&path)?;
    let dv = decode_deletion_file(&path, deletion.file_type, &bytes)?;
    if dv.len() as u64 != deletion.num_deleted_rows {
        return Err(Error::Serialization(format!(
            "deletion file '{}' holds {} offsets but the manifest records {}",
            path,
            dv.len(),
            deletion.num_deleted_rows
        )));
    }
    Ok(dv)
}

/// Store a row-id sequence inline, or externally once it exceeds `inline_limit` bytes
pub fn write_row_ids(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    sequence: &RowIdSequence,
    inline_limit: usize,
) -> Result<RowIdMeta> {
    let encoded = sequence.encode();
    if encoded.len() <= inline_limit {
        return Ok(RowIdMeta::Inline(encoded));
    }
    let path = paths.row_ids(&Uuid::new_v4());
    store.put(&path, &encoded)?;
    Ok(RowIdMeta::External(ExternalFile {
        path,
        offset: 0,
        size: encoded.len() as u64,
    }))
}

/// Decode a fragment's row-id sequence
pub fn read_row_ids(store: &dyn ObjectStore, meta: &RowIdMeta) -> Result<RowIdSequence> {
    match meta {
        RowIdMeta::Inline(bytes) => RowIdSequence::decode(bytes),
        RowIdMeta::External(file) => {
            let bytes = store.get_range(&file.path, file.offset..file.offset + file.size)?;
            RowIdSequence::decode(&bytes)
        }
    }
}

/// Body of a tag marker claimed by a commit that has not published yet
const PENDING_TAG: &str = "pending";

fn create_tag_marker(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    tag: &str,
    body: &str,
) -> Result<()> {
    validate_tag(tag)?;
    let path = paths.tag(tag);
    let written = if store.supports_conditional_put() {
        store.put_if_absent(&path, body.as_bytes())
    } else if store.exists(&path)? {
        Err(Error::AlreadyExists { path })
    } else {
        store.put(&path, body.as_bytes())
    };
    written.map_err(|e| match e {
        Error::AlreadyExists { .. } => Error::TagExists(tag.to_string()),
        other => other,
    })
}

/// Bind `tag` to `version` with a create-if-absent marker
pub fn write_tag(store: &dyn ObjectStore, paths: &TablePaths, tag: &str, version: u64) -> Result<()> {
    create_tag_marker(store, paths, tag, &version.to_string())
}

/// Reserve `tag` for a commit whose version is not known yet.
///
/// The marker is created with create-if-absent, so at most one writer
/// holds the claim. Finish with [`bind_tag`] once the version is
/// published, or [`release_tag`] if the commit fails.
pub fn claim_tag(store: &dyn ObjectStore, paths: &TablePaths, tag: &str) -> Result<()> {
    create_tag_marker(store, paths, tag, PENDING_TAG)
}

/// Point a claimed tag at its published version
pub fn bind_tag(store: &dyn ObjectStore, paths: &TablePaths, tag: &str, version: u64) -> Result<()> {
    store.put(&paths.tag(tag), version.to_string().as_bytes())
}

/// Drop a claim taken by [`claim_tag`]
pub fn release_tag(store: &dyn ObjectStore, paths: &TablePaths, tag: &str) -> Result<()> {
    store.delete(&paths.tag(tag))
}

/// Version a tag points at, or `None` while its commit is in flight
pub fn read_tag_marker(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    tag: &str,
) -> Result<Option<u64>> {
    let path = paths.tag(tag);
    let bytes = store.get(&path).map_err(|e| {
        if e.is_not_found() {
            Error::TagNotFound(tag.to_string())
        } else {
            e
        }
    })?;
    let body = std::str::from_utf8(&bytes).map(str::trim).ok();
    if body == Some(PENDING_TAG) {
        return Ok(None);
    }
    body.and_then(|s| s.parse().ok())
        .map(Some)
        .ok_or_else(|| Error::Serialization(format!("tag marker '{}' is not a version", path)))
}

/// Version a tag points at.
///
/// A tag still claimed by an unpublished commit reads as not found.
pub fn read_tag(store: &dyn ObjectStore, paths: &TablePaths, tag: &str) -> Result<u64> {
    read_tag_marker(store, paths, tag)?.ok_or_else(|| Error::TagNotFound(tag.to_string()))
}

/// Tag names become object names, so keep them to a safe alphabet
pub fn validate_tag(tag: &str) -> Result<()> {
    let valid = !tag.is_empty()
        && !tag.starts_with('.')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_input(format!("invalid tag name '{}'", tag)))
    }
}
