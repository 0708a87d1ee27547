//! Timing media models.
//!
//! A media instance owns the bank, rank and data bus state of one channel and
//! turns a command into its earliest legal completion tick. It provides:
//! 1. **`MediaInterface`:** The contract the controller schedules against.
//! 2. **`DramMedia`:** DDR-style banks with activation, precharge, refresh,
//!    bank groups and power-down.
//! 3. **`NvmMedia`:** Non-volatile banks with a read buffer and long write occupancy.
//!
//! Every timing constraint is a lower bound; constraints are combined with
//! `max`, and only the strictly sequential steps (precharge, activate, column,
//! data) add.

/// DDR-style media.
pub mod dram;

/// Non-volatile media.
pub mod nvm;

pub use dram::{DramMedia, DramTiming};
pub use nvm::{NvmMedia, NvmTiming};

use super::mapping::MediaCoord;
use crate::common::{AccessKind, Tick};
use crate::stats::MediaStats;

/// Per-bank state, owned and mutated only by its media instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BankState {
    /// Row held in the row buffer, if any.
    pub open_row: Option<u64>,
    /// Tick of the most recent activate.
    pub last_activate: Option<Tick>,
    /// Tick of the most recent precharge.
    pub last_precharge: Option<Tick>,
    /// Start of the next refresh window.
    pub refresh_due: Tick,
    /// Earliest legal activate.
    pub act_allowed_at: Tick,
    /// Earliest legal column command.
    pub col_allowed_at: Tick,
    /// Earliest legal precharge.
    pub pre_allowed_at: Tick,
}

/// Result of one media command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MediaAccess {
    /// Activate tick, or `None` on a row hit.
    pub activated_at: Option<Tick>,
    /// Precharge tick, when a conflicting row had to be closed.
    pub precharged_at: Option<Tick>,
    /// Column command tick.
    pub issued_at: Tick,
    /// Tick at which the last beat of data has crossed the bus.
    pub ready_at: Tick,
    /// Whether the row was already open.
    pub row_hit: bool,
}

/// Media technology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    /// Volatile DRAM.
    Dram,
    /// Non-volatile memory.
    Nvm,
}

/// Timing contract of one media channel.
///
/// Implementors must be `Send` so a system can move between threads.
pub trait MediaInterface: Send {
    /// Returns the media technology.
    fn kind(&self) -> MediaKind;

    /// Issues a burst no earlier than `at` and returns its timing.
    ///
    /// Bank, rank and bus state are updated as if the command was issued.
    ///
    /// # Arguments
    ///
    /// * `coord` - Decoded rank, bank and row of the burst.
    /// * `kind` - Read or write.
    /// * `at` - Earliest tick the controller wants the command to start.
    ///
    /// # Returns
    ///
    /// The activate, precharge and column ticks and the completion tick.
    fn access(&mut self, coord: MediaCoord, kind: AccessKind, at: Tick) -> MediaAccess;

    /// Returns `true` if `coord`'s row is open in its bank.
    fn is_row_hit(&self, coord: MediaCoord) -> bool;

    /// Unloaded access latency: row open plus data access.
    fn static_latency(&self) -> Tick;

    /// Minimum spacing between two column commands on the data bus.
    fn command_slot(&self) -> Tick;

    /// Returns a copy of the counters.
    fn stats(&self) -> MediaStats;
}

/// Data bus turnaround penalties shared by both technologies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Turnaround {
    /// Write data to read command.
    pub t_wtr: Tick,
    /// Read data to write data.
    pub t_rtw: Tick,
    /// Rank to rank switch.
    pub t_cs: Tick,
}

/// Last burst on a channel's data bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LastBurst {
    pub rank: usize,
    pub group: u64,
    pub kind: AccessKind,
    pub data_start: Tick,
    pub data_end: Tick,
}

impl Turnaround {
    /// Gap required after `last` before a burst of `kind` on `rank`.
    ///
    /// When both the direction and the rank change, the larger penalty applies.
    pub(crate) fn gap(&self, last: &LastBurst, rank: usize, kind: AccessKind) -> Tick {
        let mut gap = 0;
        if last.rank != rank {
            gap = gap.max(self.t_cs);
        }
        match (last.kind, kind) {
            (AccessKind::Read, AccessKind::Write) => gap = gap.max(self.t_rtw),
            (AccessKind::Write, AccessKind::Read) => gap = gap.max(self.t_wtr),
            _ => {}
        }
        gap
    }
}
