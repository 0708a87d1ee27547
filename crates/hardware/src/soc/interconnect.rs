//! Host-side interconnect.
//!
//! This module implements the fabric between the host and the first stage of each
//! memory path. It provides:
//! 1. **Route registration:** Targets are added by address range, kept sorted by
//!    base, and checked for overlap.
//! 2. **Address decode:** A whole access must fall inside one target's range.
//! 3. **Transit time:** `latency + ceil(bytes / width) * clock`, charged to packets as
//!    header delay rather than as a separate event.

use crate::common::{AddrRange, ConfigError, Tick};
use crate::soc::traits::ComponentId;

/// Address-decoding fabric between the host and the memory targets.
#[derive(Debug)]
pub struct Interconnect {
    routes: Vec<(AddrRange, ComponentId, String)>,
    /// Transfer width in bytes.
    pub width_bytes: u64,
    /// Fixed latency per transaction.
    pub latency: Tick,
    /// Duration of one transfer beat.
    pub clock: Tick,
    last_hit: usize,
}

impl Interconnect {
    /// Creates an interconnect with no routes.
    ///
    /// # Arguments
    ///
    /// * `width_bytes` - Transfer width in bytes.
    /// * `latency` - Fixed latency per transaction.
    /// * `clock` - Duration of one transfer beat.
    pub const fn new(width_bytes: u64, latency: Tick, clock: Tick) -> Self {
        Self { routes: Vec::new(), width_bytes, latency, clock, last_hit: 0 }
    }

    /// Routes `range` to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OverlappingRanges`] if `range` overlaps an existing route.
    pub fn add_route(&mut self, range: AddrRange, target: ComponentId, name: &str) -> Result<(), ConfigError> {
        if let Some((other, _, other_name)) = self.routes.iter().find(|(r, _, _)| r.overlaps(&range)) {
            return Err(ConfigError::OverlappingRanges {
                first: *other,
                first_owner: other_name.clone(),
                second: range,
                second_owner: name.to_string(),
            });
        }
        self.routes.push((range, target, name.to_string()));
        self.routes.sort_by_key(|(r, _, _)| r.base);
        self.last_hit = 0;
        Ok(())
    }

    /// Returns the target whose range holds all of `[addr, addr + size)`.
    pub fn route(&mut self, addr: u64, size: usize) -> Option<ComponentId> {
        if let Some((r, id, _)) = self.routes.get(self.last_hit) {
            if r.contains_access(addr, size) {
                return Some(*id);
            }
        }
        let idx = self.routes.iter().position(|(r, _, _)| r.contains_access(addr, size))?;
        self.last_hit = idx;
        Some(self.routes[idx].1)
    }

    /// Returns the registered routes in address order.
    pub fn routes(&self) -> impl Iterator<Item = (AddrRange, ComponentId)> + '_ {
        self.routes.iter().map(|(r, id, _)| (*r, *id))
    }

    /// Returns the time to move `bytes` across the interconnect.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Number of bytes to transfer; a header-only packet counts as one beat.
    ///
    /// # Returns
    ///
    /// The fixed latency plus one clock per `width_bytes` transferred.
    pub fn transit_time(&self, bytes: usize) -> Tick {
        let transfers = (bytes.max(1) as u64).div_ceil(self.width_bytes.max(1));
        self.latency + transfers * self.clock
    }
}
