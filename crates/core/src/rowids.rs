//! Row-id sequences
//!
//! Every fragment carries the ordered list of stable row ids for its
//! physical rows. Freshly written fragments hold one contiguous range, so
//! the sequence is a list of segments that special-case ranges.
//!
//! ## Encoding (version 0x01)
//!
//! ```text
//! [Version: u8]
//! [Segment Count: u32 LE]
//! For each segment:
//!   [Tag: u8]  0 = Range, 1 = RangeWithHoles, 2 = Array
//!   Range:          [start: u64 LE] [end: u64 LE]
//!   RangeWithHoles: [start: u64 LE] [end: u64 LE] [hole count: u32 LE] [holes: u64 LE...]
//!   Array:          [count: u32 LE] [ids: u64 LE...]
//! ```

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use std::ops::Range;

/// Row-id sequence encoding version
pub const ROW_ID_FORMAT_VERSION: u8 = 0x01;

/// Shortest run of consecutive ids stored as a range instead of an array
const MIN_RANGE_RUN: usize = 8;

const TAG_RANGE: u8 = 0;
const TAG_RANGE_WITH_HOLES: u8 = 1;
const TAG_ARRAY: u8 = 2;

/// One run of row ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum U64Segment {
    /// Every id in `start..end`
    Range(Range<u64>),
    /// Every id in `range` except the sorted `holes`
    RangeWithHoles {
        /// Covered range
        range: Range<u64>,
        /// Missing ids, sorted ascending, all inside `range`
        holes: Vec<u64>,
    },
    /// Arbitrary ids in stored order
    Array(Vec<u64>),
}

impl U64Segment {
    /// Number of ids in the segment
    pub fn len(&self) -> usize {
        match self {
            U64Segment::Range(r) => (r.end - r.start) as usize,
            U64Segment::RangeWithHoles { range, holes } => {
                (range.end - range.start) as usize - holes.len()
            }
            U64Segment::Array(ids) => ids.len(),
        }
    }

    /// True if the segment holds no ids
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate ids in stored order
    pub fn iter(&self) -> Box<dyn Iterator<Item = u64> + '_> {
        match self {
            U64Segment::Range(r) => Box::new(r.clone()),
            U64Segment::RangeWithHoles { range, holes } => Box::new(
                range
                    .clone()
                    .filter(move |id| holes.binary_search(id).is_err()),
            ),
            U64Segment::Array(ids) => Box::new(ids.iter().copied()),
        }
    }

    /// The id at `offset` within this segment
    pub fn get(&self, offset: usize) -> Option<u64> {
        if offset >= self.len() {
            return None;
        }
        match self {
            U64Segment::Range(r) => Some(r.start + offset as u64),
            U64Segment::RangeWithHoles { range, holes } => {
                let mut id = range.start + offset as u64;
                for &hole in holes {
                    if hole <= id {
                        id += 1;
                    } else {
                        break;
                    }
                }
                Some(id)
            }
            U64Segment::Array(ids) => ids.get(offset).copied(),
        }
    }
}

/// Ordered row ids of one fragment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowIdSequence(Vec<U64Segment>);

impl RowIdSequence {
    /// Empty sequence
    pub fn new() -> Self {
        RowIdSequence(Vec::new())
    }

    /// Sequence covering one contiguous range
    pub fn from_range(range: Range<u64>) -> Self {
        if range.is_empty() {
            return Self::new();
        }
        RowIdSequence(vec![U64Segment::Range(range)])
    }

    /// Build a compact sequence from ids in stored order.
    ///
    /// Runs of at least eight consecutive ids become ranges; everything else
    /// is grouped into arrays.
    pub fn from_ids(ids: &[u64]) -> Self {
        let mut seq = RowIdSequence::new();
        let mut pending: Vec<u64> = Vec::new();
        let mut i = 0;
        while i < ids.len() {
            let start = i;
            while i + 1 < ids.len() && ids[i].checked_add(1) == Some(ids[i + 1]) {
                i += 1;
            }
            if i - start + 1 >= MIN_RANGE_RUN {
                if !pending.is_empty() {
                    seq.push(U64Segment::Array(std::mem::take(&mut pending)));
                }
                seq.push(U64Segment::Range(ids[start]..ids[i] + 1));
            } else {
                pending.extend_from_slice(&ids[start..=i]);
            }
            i += 1;
        }
        if !pending.is_empty() {
            seq.push(U64Segment::Array(pending));
        }
        seq
    }

    /// Segments in stored order
    pub fn segments(&self) -> &[U64Segment] {
        &self.0
    }

    /// Total number of ids
    pub fn len(&self) -> u64 {
        self.0.iter().map(|s| s.len() as u64).sum()
    }

    /// True if the sequence holds no ids
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|s| s.is_empty())
    }

    /// Iterate ids in stored order
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().flat_map(|s| s.iter())
    }

    /// The id at a fragment-local offset
    pub fn get(&self, mut offset: usize) -> Option<u64> {
        for segment in &self.0 {
            let len = segment.len();
            if offset < len {
                return segment.get(offset);
            }
            offset -= len;
        }
        None
    }

    /// Append another sequence, merging adjacent ranges.
    pub fn extend(&mut self, other: RowIdSequence) {
        for segment in other.0 {
            self.push(segment);
        }
    }

    fn push(&mut self, segment: U64Segment) {
        if segment.is_empty() {
            return;
        }
        if let (Some(U64Segment::Range(last)), U64Segment::Range(next)) =
            (self.0.last_mut(), &segment)
        {
            if last.end == next.start {
                last.end = next.end;
                return;
            }
        }
        self.0.push(segment);
    }

    /// Keep the ids whose fragment-local offset satisfies `keep`.
    ///
    /// Ranges that lose only a few ids become ranges with holes; heavier
    /// losses fall back to compaction through [`RowIdSequence::from_ids`].
    pub fn filter_offsets(&self, keep: impl Fn(u32) -> bool) -> RowIdSequence {
        let mut out = RowIdSequence::new();
        let mut offset: u32 = 0;
        for segment in &self.0 {
            let mut survivors = Vec::with_capacity(segment.len());
            let mut dropped = Vec::new();
            for id in segment.iter() {
                if keep(offset) {
                    survivors.push(id);
                } else {
                    dropped.push(id);
                }
                offset += 1;
            }
            match segment {
                _ if dropped.is_empty() => out.push(segment.clone()),
                U64Segment::Range(_) | U64Segment::RangeWithHoles { .. }
                    if !survivors.is_empty() && dropped.len() * 4 <= survivors.len() =>
                {
                    let first = survivors[0];
                    let last = survivors[survivors.len() - 1];
                    let survivor_set = &survivors;
                    let holes: Vec<u64> = (first..=last)
                        .filter(|id| survivor_set.binary_search(id).is_err())
                        .collect();
                    if holes.is_empty() {
                        out.push(U64Segment::Range(first..last + 1));
                    } else {
                        out.push(U64Segment::RangeWithHoles {
                            range: first..last + 1,
                            holes,
                        });
                    }
                }
                _ => out.extend(RowIdSequence::from_ids(&survivors)),
            }
        }
        out
    }

    /// Encode the sequence for inline or external storage
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + self.0.len() * 17);
        // Writes into a Vec cannot fail
        let _ = self.write_to(&mut buf);
        buf
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        buf.write_u8(ROW_ID_FORMAT_VERSION)?;
        buf.write_u32::<LittleEndian>(self.0.len() as u32)?;
        for segment in &self.0 {
            match segment {
                U64Segment::Range(r) => {
                    buf.write_u8(TAG_RANGE)?;
                    buf.write_u64::<LittleEndian>(r.start)?;
                    buf.write_u64::<LittleEndian>(r.end)?;
                }
                U64Segment::RangeWithHoles { range, holes } => {
                    buf.write_u8(TAG_RANGE_WITH_HOLES)?;
                    buf.write_u64::<LittleEndian>(range.start)?;
                    buf.write_u64::<LittleEndian>(range.end)?;
                    buf.write_u32::<LittleEndian>(holes.len() as u32)?;
                    for &hole in holes {
                        buf.write_u64::<LittleEndian>(hole)?;
                    }
                }
                U64Segment::Array(ids) => {
                    buf.write_u8(TAG_ARRAY)?;
                    buf.write_u32::<LittleEndian>(ids.len() as u32)?;
                    for &id in ids {
                        buf.write_u64::<LittleEndian>(id)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Decode a sequence produced by [`RowIdSequence::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let version = cursor.read_u8().map_err(truncated)?;
        if version != ROW_ID_FORMAT_VERSION {
            return Err(Error::Serialization(format!(
                "unsupported row id sequence version {}",
                version
            )));
        }
        let count = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let mut segments = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let tag = cursor.read_u8().map_err(truncated)?;
            let segment = match tag {
                TAG_RANGE => {
                    let start = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
                    let end = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
                    check_range(start, end)?;
                    U64Segment::Range(start..end)
                }
                TAG_RANGE_WITH_HOLES => {
                    let start = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
                    let end = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
                    check_range(start, end)?;
                    let n = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
                    let mut holes = Vec::with_capacity(n.min(1024) as usize);
                    for _ in 0..n {
                        holes.push(cursor.read_u64::<LittleEndian>().map_err(truncated)?);
                    }
                    if holes.windows(2).any(|w| w[0] >= w[1])
                        || holes.iter().any(|h| *h < start || *h >= end)
                    {
                        return Err(Error::Serialization(
                            "row id holes are unsorted or out of range".to_string(),
                        ));
                    }
                    U64Segment::RangeWithHoles {
                        range: start..end,
                        holes,
                    }
                }
                TAG_ARRAY => {
                    let n = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
                    let mut ids = Vec::with_capacity(n.min(1024) as usize);
                    for _ in 0..n {
                        ids.push(cursor.read_u64::<LittleEndian>().map_err(truncated)?);
                    }
                    U64Segment::Array(ids)
                }
                other => {
                    return Err(Error::Serialization(format!(
                        "unknown row id segment tag {}",
                        other
                    )))
                }
            };
            segments.push(segment);
        }
        if (cursor.position() as usize) != bytes.len() {
            return Err(Error::Serialization(
                "trailing bytes after row id sequence".to_string(),
            ));
        }
        Ok(RowIdSequence(segments))
    }
}

impl FromIterator<u64> for RowIdSequence {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        let ids: Vec<u64> = iter.into_iter().collect();
        RowIdSequence::from_ids(&ids)
    }
}

fn truncated(e: std::io::Error) -> Error {
    Error::Serialization(format!("truncated row id sequence: {}", e))
}

fn check_range(start: u64, end: u64) -> Result<()> {
    if start > end {
        return Err(Error::Serialization(format!(
            "invalid row id range {}..{}",
            start, end
        )));
    }
    Ok(())
}
