//! Physical row addresses
//!
//! A row address packs `(fragment_id, local_offset)` into a u64 with the
//! fragment id in the upper 32 bits. Addresses change whenever compaction
//! moves a row; stable row ids map onto them through the row-id index.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Fragment id + local offset packed into a u64
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowAddress(u64);

impl RowAddress {
    /// Number of addresses per fragment
    pub const FRAGMENT_SIZE: u64 = 1 << 32;

    /// Build an address from its parts
    pub fn new(fragment_id: u32, offset: u32) -> Self {
        RowAddress(((fragment_id as u64) << 32) | offset as u64)
    }

    /// Build an address from a 64-bit fragment id, rejecting ids that do not fit
    pub fn try_new(fragment_id: u64, offset: u32) -> Result<Self> {
        let frag = u32::try_from(fragment_id).map_err(|_| {
            Error::invalid_input(format!(
                "fragment id {} does not fit in a row address",
                fragment_id
            ))
        })?;
        Ok(Self::new(frag, offset))
    }

    /// Fragment id (upper 32 bits)
    pub fn fragment_id(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Offset within the fragment (lower 32 bits)
    pub fn offset(&self) -> u32 {
        self.0 as u32
    }

    /// Raw u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Address range covered by one fragment
    pub fn fragment_range(fragment_id: u32) -> Range<u64> {
        let start = (fragment_id as u64) << 32;
        start..start + Self::FRAGMENT_SIZE
    }
}

impl From<u64> for RowAddress {
    fn from(raw: u64) -> Self {
        RowAddress(raw)
    }
}

impl From<RowAddress> for u64 {
    fn from(addr: RowAddress) -> Self {
        addr.0
    }
}

impl fmt::Debug for RowAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowAddress({}, {})", self.fragment_id(), self.offset())
    }
}

impl fmt::Display for RowAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.fragment_id(), self.offset())
    }
}
