//! Row selection for deletes and updates
//!
//! The engine never reads column values, so predicates are evaluated by the
//! caller's data layer. A [`RowFilter`] is the seam: given a fragment it
//! reports the fragment-local offsets that match.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fmt;
use tessel_core::{Fragment, Result, RowAddress};

/// Selects rows of a fragment by offset
pub trait RowFilter: Send + Sync + fmt::Debug {
    /// Offsets of matching rows in `fragment`, any order, may contain duplicates
    fn matching_offsets(&self, fragment: &Fragment) -> Result<Vec<u32>>;

    /// Predicate text recorded in the transaction log
    fn describe(&self) -> String;
}

/// Explicit offsets per fragment
#[derive(Debug, Clone, Default)]
pub struct OffsetFilter {
    offsets: BTreeMap<u64, Vec<u32>>,
}

impl OffsetFilter {
    /// Empty filter (matches nothing)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add offsets for one fragment (builder pattern)
    pub fn with_offsets(mut self, fragment_id: u64, offsets: impl IntoIterator<Item = u32>) -> Self {
        self.offsets.entry(fragment_id).or_default().extend(offsets);
        self
    }

    /// Group row addresses by fragment
    pub fn from_addresses(addresses: impl IntoIterator<Item = RowAddress>) -> Self {
        let mut by_fragment: FxHashMap<u64, Vec<u32>> = FxHashMap::default();
        for addr in addresses {
            by_fragment
                .entry(addr.fragment_id() as u64)
                .or_default()
                .push(addr.offset());
        }
        OffsetFilter {
            offsets: by_fragment.into_iter().collect(),
        }
    }

    /// True if no offsets were added
    pub fn is_empty(&self) -> bool {
        self.offsets.values().all(|v| v.is_empty())
    }
}

impl RowFilter for OffsetFilter {
    fn matching_offsets(&self, fragment: &Fragment) -> Result<Vec<u32>> {
        Ok(self.offsets.get(&fragment.id).cloned().unwrap_or_default())
    }

    fn describe(&self) -> String {
        let total: usize = self.offsets.values().map(Vec::len).sum();
        format!("{} rows in {} fragments", total, self.offsets.len())
    }
}

type RowPredicate = dyn Fn(&Fragment, u32) -> bool + Send + Sync;

/// Closure evaluated for every physical row of a fragment
pub struct FnFilter {
    description: String,
    predicate: Box<RowPredicate>,
}

impl FnFilter {
    /// Wrap a per-row predicate; `description` is recorded in the transaction log
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Fragment, u32) -> bool + Send + Sync + 'static,
    {
        FnFilter {
            description: description.into(),
            predicate: Box::new(predicate),
        }
    }
}

impl fmt::Debug for FnFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFilter")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl RowFilter for FnFilter {
    fn matching_offsets(&self, fragment: &Fragment) -> Result<Vec<u32>> {
        let rows = u32::try_from(fragment.physical_rows).map_err(|_| {
            tessel_core::Error::invalid_input(format!(
                "fragment {} has too many rows to address",
                fragment.id
            ))
        })?;
        Ok((0..rows).filter(|&o| (self.predicate)(fragment, o)).collect())
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}
