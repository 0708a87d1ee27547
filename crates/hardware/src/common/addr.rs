//! Physical address ranges.
//!
//! This module defines the contiguous address range type used everywhere a
//! component claims part of the physical address space. It provides:
//! 1. **Containment:** Single-address and whole-access checks for routing.
//! 2. **Overlap detection:** Used by configuration validation and topology build.
//! 3. **Serialization:** Ranges are written in JSON as `{ "base": .., "size": .. }`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A contiguous physical address range `[base, base + size)`.
///
/// Ranges are immutable once a component has been built around them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddrRange {
    /// First byte of the range.
    pub base: u64,
    /// Length of the range in bytes.
    pub size: u64,
}

impl AddrRange {
    /// Creates a range starting at `base` spanning `size` bytes.
    #[inline]
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// Returns the exclusive end address, saturating at `u64::MAX`.
    #[inline]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    /// Returns `true` if the range covers no bytes.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns `true` if `addr` lies inside the range.
    #[inline]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Returns `true` if every byte of `[addr, addr + len)` lies inside the range.
    ///
    /// A zero-length access is treated as a single-byte access at `addr`.
    pub const fn contains_access(&self, addr: u64, len: usize) -> bool {
        if !self.contains(addr) {
            return false;
        }
        let len = if len == 0 { 1 } else { len as u64 };
        match addr.checked_add(len) {
            Some(last) => last <= self.end(),
            None => false,
        }
    }

    /// Returns `true` if the two ranges share at least one byte.
    pub const fn overlaps(&self, other: &Self) -> bool {
        !self.is_empty() && !other.is_empty() && self.base < other.end() && other.base < self.end()
    }

    /// Returns the offset of `addr` from the start of the range.
    ///
    /// The caller must have checked containment.
    #[inline]
    pub const fn offset_of(&self, addr: u64) -> u64 {
        addr - self.base
    }
}

impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.base, self.end())
    }
}
