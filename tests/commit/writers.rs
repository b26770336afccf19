//! Concurrent writer threads
//!
//! Every thread opens its own handle, as separate processes would, and
//! races the others to publish.

use crate::common::*;
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

fn race<F, T>(writers: usize, f: F) -> Vec<T>
where
    F: Fn(usize) -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    let barrier = Arc::new(Barrier::new(writers));
    let f = Arc::new(f);
    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let f = Arc::clone(&f);
            thread::spawn(move || {
                barrier.wait();
                f(i)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn racing_appends_get_distinct_consecutive_versions() {
    init_tracing();
    let local = LocalTable::create(&[10]);
    let store = Arc::clone(&local.store);

    let versions = race(6, move |i| {
        let mut table = Table::open(Arc::clone(&store), TableConfig::default()).unwrap();
        table.append(vec![staged(i as u64 + 1)]).unwrap()
    });
    let versions: BTreeSet<u64> = versions.into_iter().collect();
    assert_eq!(versions, (2..=7).collect());

    let latest = local.open();
    assert_eq!(latest.count_rows(), 10 + (1..=6).sum::<u64>());
    assert_eq!(latest.manifest().max_fragment_id, 7);
    let ids: BTreeSet<u64> = fragment_ids(&latest).into_iter().collect();
    assert_eq!(ids.len(), 7);

    // Stable row ids never collide across racing appends
    let rows = latest.scan(&Default::default()).unwrap();
    let row_ids: BTreeSet<u64> = rows.iter().map(|r| r.row_id).collect();
    assert_eq!(row_ids.len(), rows.len());
    assert_eq!(latest.manifest().next_row_id, rows.len() as u64);
}

#[test]
fn versions_stay_gapless_over_many_rounds() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    Table::create(Arc::clone(&store), schema(), vec![], TableConfig::default()).unwrap();

    let shared = Arc::clone(&store);
    let published = race(4, move |_| {
        let mut table = Table::open(Arc::clone(&shared), TableConfig::default()).unwrap();
        (0..5)
            .map(|_| table.append(vec![staged(1)]).unwrap())
            .collect::<Vec<u64>>()
    });

    for own in &published {
        assert!(own.windows(2).all(|w| w[0] < w[1]));
    }
    let all: BTreeSet<u64> = published.into_iter().flatten().collect();
    assert_eq!(all, (2..=21).collect());

    let table = Table::open(store, TableConfig::default()).unwrap();
    let versions: Vec<u64> = table.versions().unwrap().iter().map(|v| v.version).collect();
    assert_eq!(versions, (1..=21).collect::<Vec<_>>());
}

#[test]
fn racing_deletes_of_one_fragment_have_one_winner() {
    let local = LocalTable::create(&[8, 8]);
    let target = local.table.manifest().fragments[0].id;

    // Every writer reads version 1 before anyone commits
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4u32)
        .map(|i| {
            let mut table = local.open();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                table.delete(&tessel::OffsetFilter::new().with_offsets(target, [i]))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for err in results.into_iter().filter_map(|r| r.err()) {
        assert!(err.is_conflict(), "unexpected error: {}", err);
    }
    assert_eq!(local.open().count_rows(), 15);
}
