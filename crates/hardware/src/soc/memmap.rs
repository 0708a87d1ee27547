//! E820-style physical memory map.
//!
//! The map tells host software which ranges are usable RAM. With system memory
//! at address zero the classic PC layout is produced: low RAM up to 639 KiB, the
//! legacy hole, RAM from 1 MiB to the end of system memory, and the BIOS window
//! below 4 GiB. The expander range is always appended as RAM.

use crate::common::{AddrRange, KIB, MIB};
use serde::Serialize;
use std::fmt;

const LOW_RAM_SIZE: u64 = 639 * KIB;
const LEGACY_HOLE: AddrRange = AddrRange::new(0x9_FC00, 385 * KIB);
const BIOS_WINDOW: AddrRange = AddrRange::new(0xFFFF_0000, 64 * KIB);

/// Kind of an entry in the map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RegionKind {
    /// Usable memory (E820 type 1).
    Ram,
    /// Reserved for firmware or legacy devices (E820 type 2).
    Reserved,
}

impl RegionKind {
    /// Returns the numeric E820 type.
    pub const fn e820_type(self) -> u32 {
        match self {
            Self::Ram => 1,
            Self::Reserved => 2,
        }
    }
}

/// One entry of the memory map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MemoryMapEntry {
    /// Covered range.
    pub range: AddrRange,
    /// What the range is used for.
    pub kind: RegionKind,
}

impl fmt::Display for MemoryMapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RegionKind::Ram => "RAM",
            RegionKind::Reserved => "reserved",
        };
        write!(f, "{:#018x} - {:#018x}  {kind}", self.range.base, self.range.end())
    }
}

/// Builds the memory map for system memory and the expander range.
///
/// # Arguments
///
/// * `system` - Host system memory range.
/// * `expander` - Expander device range, reported as RAM.
///
/// # Returns
///
/// Entries sorted by base address.
pub fn build(system: AddrRange, expander: AddrRange) -> Vec<MemoryMapEntry> {
    let ram = |range| MemoryMapEntry { range, kind: RegionKind::Ram };
    let reserved = |range| MemoryMapEntry { range, kind: RegionKind::Reserved };

    let mut map = if system.base == 0 && system.size > MIB {
        vec![
            ram(AddrRange::new(0, LOW_RAM_SIZE)),
            reserved(LEGACY_HOLE),
            ram(AddrRange::new(MIB, system.size - MIB)),
            reserved(BIOS_WINDOW),
        ]
    } else {
        vec![ram(system), reserved(BIOS_WINDOW)]
    };
    map.push(ram(expander));
    map.sort_by_key(|e| e.range.base);
    map
}
