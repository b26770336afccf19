//! Unreadable history forces conflicts
//!
//! A writer that cannot read the transaction of an intervening version
//! must fail instead of assuming the versions are compatible.

use crate::common::*;

fn break_latest_transaction(local: &LocalTable, contents: Option<&[u8]>) -> u64 {
    let mut other = local.open();
    other.append(vec![staged(5)]).unwrap();
    let path = other.manifest().transaction_file.clone().unwrap();
    match contents {
        Some(bytes) => local.store.put(&path, bytes).unwrap(),
        None => local.store.delete(&path).unwrap(),
    }
    other.version()
}

#[test]
fn missing_transaction_file_is_a_conflict() {
    init_tracing();
    let local = LocalTable::create(&[5]);
    let mut stale = local.open();
    let broken = break_latest_transaction(&local, None);

    let err = stale.append(vec![staged(1)]).unwrap_err();
    match err {
        Error::Conflict {
            read_version,
            conflicting_version,
            ..
        } => {
            assert_eq!(read_version, 1);
            assert_eq!(conflicting_version, broken);
        }
        other => panic!("expected conflict, got {}", other),
    }
    assert_eq!(stale.version(), 1);
}

#[test]
fn corrupt_transaction_file_is_a_conflict() {
    let local = LocalTable::create(&[5]);
    let mut stale = local.open();
    break_latest_transaction(&local, Some(b"not a transaction"));

    let err = stale.append(vec![staged(1)]).unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {}", err);
}

#[test]
fn writer_at_latest_is_unaffected_by_broken_history() {
    let local = LocalTable::create(&[5]);
    break_latest_transaction(&local, None);

    // Nothing committed after this handle's read version, so nothing to check
    let mut fresh = local.open();
    assert_eq!(fresh.append(vec![staged(1)]).unwrap(), 3);
}

#[test]
fn stale_fragment_reference_is_rejected() {
    let local = LocalTable::create(&[5, 5]);
    let mut compactor = local.open();
    let mut deleter = local.open();
    let doomed = compactor.manifest().fragments[0].id;

    // Fragment 1 disappears before the deleter commits
    compactor
        .delete(&tessel::OffsetFilter::new().with_offsets(doomed, 0..5))
        .unwrap();
    let err = deleter
        .delete(&tessel::OffsetFilter::new().with_offsets(doomed, [0]))
        .unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {}", err);
}
