//! Row id → row address index
//!
//! Rebuilt from the row-id sequences stored on each fragment; nothing here is
//! persisted. Contiguous runs of ids (the common case after an append) are
//! kept as range chunks in a `BTreeMap` keyed by their first id, so a freshly
//! written fragment of any size costs one entry. Ids that do not form runs
//! go into a hash map.
//!
//! Tables without stable row ids use the row address itself as the row id,
//! and the index degenerates to one identity chunk per fragment.

use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use tessel_core::{Error, Fragment, Result, RowAddress, RowIdSequence, U64Segment};
use tessel_durability::read_row_ids;
use tessel_storage::ObjectStore;
use tracing::debug;

/// Runs shorter than this are stored id by id
const MIN_CHUNK_LEN: u64 = 8;

#[derive(Debug, Clone, Copy)]
struct RangeChunk {
    /// Exclusive end row id
    end: u64,
    fragment_id: u32,
    start_offset: u32,
}

/// Pending run of consecutive ids at consecutive offsets
#[derive(Debug, Clone, Copy)]
struct Run {
    start_id: u64,
    len: u64,
    fragment_id: u32,
    start_offset: u32,
}

/// Lookup table from stable row id to current physical location
#[derive(Debug, Clone, Default)]
pub struct RowIdIndex {
    ranges: BTreeMap<u64, RangeChunk>,
    scattered: FxHashMap<u64, RowAddress>,
    len: u64,
    fragment_ids: BTreeSet<u64>,
}

impl RowIdIndex {
    /// Build the index for a list of fragments.
    ///
    /// With `stable_row_ids` every fragment must carry a row-id sequence;
    /// external sequences are read through `store`.
    ///
    /// # Errors
    /// - [`Error::CorruptManifest`] if a fragment lacks its sequence, the
    ///   sequence length disagrees with `physical_rows`, or two rows share an id
    pub fn build(
        store: &dyn ObjectStore,
        fragments: &[Fragment],
        stable_row_ids: bool,
    ) -> Result<Self> {
        if !stable_row_ids {
            return Self::identity(fragments);
        }
        let mut sequences = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let meta = fragment.row_id_meta.as_ref().ok_or_else(|| {
                Error::corrupt_manifest(
                    "row id index",
                    format!("fragment {} has no row id sequence", fragment.id),
                )
            })?;
            sequences.push((fragment.id, read_row_ids(store, meta)?));
        }
        Self::from_sequences(sequences.iter().map(|(id, seq)| (*id, seq)))
    }

    /// Build from already-decoded sequences, in fragment order.
    pub fn from_sequences<'a>(
        sequences: impl IntoIterator<Item = (u64, &'a RowIdSequence)>,
    ) -> Result<Self> {
        let mut runs = Vec::new();
        let mut singles = Vec::new();
        let mut fragment_ids = BTreeSet::new();
        let mut len = 0u64;

        for (fragment_id, sequence) in sequences {
            let frag = to_u32(fragment_id)?;
            fragment_ids.insert(fragment_id);
            let mut offset: u64 = 0;
            for segment in sequence.segments() {
                match segment {
                    U64Segment::Range(range) => {
                        runs.push(Run {
                            start_id: range.start,
                            len: range.end - range.start,
                            fragment_id: frag,
                            start_offset: to_u32(offset)?,
                        });
                        offset += range.end - range.start;
                    }
                    other => {
                        let mut current: Option<Run> = None;
                        for id in other.iter() {
                            let off = to_u32(offset)?;
                            current = match current {
                                Some(mut run) if run.start_id + run.len == id => {
                                    run.len += 1;
                                    Some(run)
                                }
                                Some(run) => {
                                    split_run(run, &mut runs, &mut singles);
                                    Some(Run {
                                        start_id: id,
                                        len: 1,
                                        fragment_id: frag,
                                        start_offset: off,
                                    })
                                }
                                None => Some(Run {
                                    start_id: id,
                                    len: 1,
                                    fragment_id: frag,
                                    start_offset: off,
                                }),
                            };
                            offset += 1;
                        }
                        if let Some(run) = current {
                            split_run(run, &mut runs, &mut singles);
                        }
                    }
                }
            }
            len += offset;
        }

        let mut index = RowIdIndex {
            ranges: BTreeMap::new(),
            scattered: FxHashMap::default(),
            len,
            fragment_ids,
        };
        // Ranges first so every single can be checked against all of them
        for run in runs {
            index.insert_run(run)?;
        }
        for (id, addr) in singles {
            if index.range_lookup(id).is_some() || index.scattered.insert(id, addr).is_some() {
                return Err(duplicate(id));
            }
        }
        debug!(
            target: "tessel::rowids",
            rows = index.len,
            ranges = index.ranges.len(),
            scattered = index.scattered.len(),
            "Built row id index"
        );
        Ok(index)
    }

    fn identity(fragments: &[Fragment]) -> Result<Self> {
        let mut index = RowIdIndex::default();
        for fragment in fragments {
            let start = RowAddress::try_new(fragment.id, 0)?.as_u64();
            index.fragment_ids.insert(fragment.id);
            index.len += fragment.physical_rows;
            if fragment.physical_rows == 0 {
                continue;
            }
            index.insert_run(Run {
                start_id: start,
                len: fragment.physical_rows,
                fragment_id: to_u32(fragment.id)?,
                start_offset: 0,
            })?;
        }
        Ok(index)
    }

    fn insert_run(&mut self, run: Run) -> Result<()> {
        let end = run.start_id + run.len;
        let overlaps_prev = self
            .ranges
            .range(..end)
            .next_back()
            .is_some_and(|(_, chunk)| chunk.end > run.start_id);
        if overlaps_prev {
            return Err(duplicate(run.start_id));
        }
        self.ranges.insert(
            run.start_id,
            RangeChunk {
                end,
                fragment_id: run.fragment_id,
                start_offset: run.start_offset,
            },
        );
        Ok(())
    }

    fn range_lookup(&self, row_id: u64) -> Option<RowAddress> {
        let (start, chunk) = self.ranges.range(..=row_id).next_back()?;
        if row_id >= chunk.end {
            return None;
        }
        let offset = chunk.start_offset as u64 + (row_id - start);
        Some(RowAddress::new(chunk.fragment_id, offset as u32))
    }

    /// Current address of a row id
    pub fn get(&self, row_id: u64) -> Option<RowAddress> {
        self.range_lookup(row_id)
            .or_else(|| self.scattered.get(&row_id).copied())
    }

    /// Number of indexed rows, deleted rows included
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if no rows are indexed
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fragments the index was built from
    pub fn fragment_ids(&self) -> &BTreeSet<u64> {
        &self.fragment_ids
    }
}

fn split_run(run: Run, runs: &mut Vec<Run>, singles: &mut Vec<(u64, RowAddress)>) {
    if run.len >= MIN_CHUNK_LEN {
        runs.push(run);
    } else {
        for i in 0..run.len {
            singles.push((
                run.start_id + i,
                RowAddress::new(run.fragment_id, run.start_offset + i as u32),
            ));
        }
    }
}

fn to_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        Error::corrupt_manifest(
            "row id index",
            format!("{} does not fit in a row address", value),
        )
    })
}

fn duplicate(row_id: u64) -> Error {
    Error::corrupt_manifest(
        "row id index",
        format!("row id {} appears in more than one row", row_id),
    )
}
