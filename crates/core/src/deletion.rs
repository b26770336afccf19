//! In-memory deletion vectors
//!
//! A deletion vector is the decoded form of a fragment's deletion file: the
//! set of fragment-local offsets that are soft-deleted. Small sets stay in a
//! hash set; larger ones are promoted to a roaring bitmap.

use crate::fragment::DeletionFileType;
use roaring::RoaringBitmap;
use std::collections::HashSet;

/// Size at which a [`DeletionVector::Set`] is promoted to a bitmap
pub const BITMAP_THRESHOLD: usize = 5_000;

/// Soft-deleted offsets within one fragment
#[derive(Debug, Clone, Default)]
pub enum DeletionVector {
    /// Nothing deleted
    #[default]
    NoDeletions,
    /// Small set of deleted offsets
    Set(HashSet<u32>),
    /// Dense set of deleted offsets
    Bitmap(RoaringBitmap),
}

impl DeletionVector {
    /// Number of deleted offsets
    pub fn len(&self) -> usize {
        match self {
            DeletionVector::NoDeletions => 0,
            DeletionVector::Set(set) => set.len(),
            DeletionVector::Bitmap(bitmap) => bitmap.len() as usize,
        }
    }

    /// True if nothing is deleted
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `offset` is deleted
    pub fn contains(&self, offset: u32) -> bool {
        match self {
            DeletionVector::NoDeletions => false,
            DeletionVector::Set(set) => set.contains(&offset),
            DeletionVector::Bitmap(bitmap) => bitmap.contains(offset),
        }
    }

    /// Mark one offset deleted, promoting to a bitmap when the set grows.
    pub fn insert(&mut self, offset: u32) {
        match self {
            DeletionVector::NoDeletions => {
                *self = DeletionVector::Set(HashSet::from([offset]));
            }
            DeletionVector::Set(set) => {
                set.insert(offset);
                if set.len() > BITMAP_THRESHOLD {
                    let bitmap: RoaringBitmap = set.iter().copied().collect();
                    *self = DeletionVector::Bitmap(bitmap);
                }
            }
            DeletionVector::Bitmap(bitmap) => {
                bitmap.insert(offset);
            }
        }
    }

    /// Deleted offsets in ascending order
    pub fn to_sorted_vec(&self) -> Vec<u32> {
        match self {
            DeletionVector::NoDeletions => Vec::new(),
            DeletionVector::Set(set) => {
                let mut values: Vec<u32> = set.iter().copied().collect();
                values.sort_unstable();
                values
            }
            DeletionVector::Bitmap(bitmap) => bitmap.iter().collect(),
        }
    }

    /// Convert into a roaring bitmap
    pub fn to_bitmap(&self) -> RoaringBitmap {
        match self {
            DeletionVector::NoDeletions => RoaringBitmap::new(),
            DeletionVector::Set(set) => set.iter().copied().collect(),
            DeletionVector::Bitmap(bitmap) => bitmap.clone(),
        }
    }

    /// Largest deleted offset
    pub fn max(&self) -> Option<u32> {
        match self {
            DeletionVector::NoDeletions => None,
            DeletionVector::Set(set) => set.iter().copied().max(),
            DeletionVector::Bitmap(bitmap) => bitmap.max(),
        }
    }
}

impl Extend<u32> for DeletionVector {
    fn extend<T: IntoIterator<Item = u32>>(&mut self, iter: T) {
        for offset in iter {
            self.insert(offset);
        }
    }
}

impl FromIterator<u32> for DeletionVector {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        let mut dv = DeletionVector::NoDeletions;
        dv.extend(iter);
        dv
    }
}

impl From<RoaringBitmap> for DeletionVector {
    fn from(bitmap: RoaringBitmap) -> Self {
        if bitmap.is_empty() {
            DeletionVector::NoDeletions
        } else {
            DeletionVector::Bitmap(bitmap)
        }
    }
}

impl PartialEq for DeletionVector {
    fn eq(&self, other: &Self) -> bool {
        self.to_sorted_vec() == other.to_sorted_vec()
    }
}

/// Pick the on-disk encoding for a deletion vector.
///
/// A sorted offset list costs four bytes per deleted row; a roaring bitmap
/// costs roughly one bit per row of the fragment once it gets dense. Both
/// encodings are readable at any cardinality.
pub fn preferred_file_type(
    num_deleted: usize,
    physical_rows: u64,
    sparse_max: usize,
) -> DeletionFileType {
    let dense = (num_deleted as u64).saturating_mul(32) >= physical_rows;
    if num_deleted <= sparse_max && !dense {
        DeletionFileType::SparseArray
    } else {
        DeletionFileType::Bitmap
    }
}
