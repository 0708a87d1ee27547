//! Non-volatile media timing.
//!
//! Each bank has a small read buffer holding the last row read from the array.
//! A read that hits the buffer skips the array read (tREAD) and only pays the
//! transfer to the interface (tSEND). Writes cross the data bus first and then
//! keep their bank busy for tWRITE. There is no refresh.

use super::{BankState, LastBurst, MediaAccess, MediaInterface, MediaKind, Turnaround};
use crate::common::{AccessKind, Tick};
use crate::soc::memory::mapping::{MediaCoord, MediaGeometry};
use crate::stats::MediaStats;
use serde::Serialize;
use tracing::trace;

/// Resolved NVM timing parameters, all in ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct NvmTiming {
    /// Array read into the bank buffer.
    pub t_read: Tick,
    /// Array write occupancy after the data burst.
    pub t_write: Tick,
    /// Bank buffer to interface transfer.
    pub t_send: Tick,
    /// Burst duration on the data bus.
    pub t_burst: Tick,
    /// Write to read turnaround.
    pub t_wtr: Tick,
    /// Read to write turnaround.
    pub t_rtw: Tick,
    /// Rank to rank switch.
    pub t_cs: Tick,
}

/// One NVM channel.
#[derive(Debug)]
pub struct NvmMedia {
    timing: NvmTiming,
    geometry: MediaGeometry,
    turnaround: Turnaround,
    banks: Vec<BankState>,
    last_burst: Option<LastBurst>,
    stats: MediaStats,
}

impl NvmMedia {
    /// Creates a channel with empty bank buffers.
    pub fn new(geometry: MediaGeometry, timing: NvmTiming) -> Self {
        let banks = (geometry.ranks_per_channel * geometry.banks_per_rank) as usize;
        Self {
            timing,
            geometry,
            turnaround: Turnaround { t_wtr: timing.t_wtr, t_rtw: timing.t_rtw, t_cs: timing.t_cs },
            banks: vec![BankState::default(); banks],
            last_burst: None,
            stats: MediaStats::default(),
        }
    }

    fn bank_index(&self, coord: MediaCoord) -> usize {
        let per_rank = self.geometry.banks_per_rank as usize;
        (coord.rank * per_rank + coord.bank % per_rank) % self.banks.len()
    }
}

impl MediaInterface for NvmMedia {
    fn kind(&self) -> MediaKind {
        MediaKind::Nvm
    }

    fn access(&mut self, coord: MediaCoord, kind: AccessKind, at: Tick) -> MediaAccess {
        let t = self.timing;
        let idx = self.bank_index(coord);
        let burst = self.geometry.burst_size();
        let bank = &mut self.banks[idx];
        let issued_at = at.max(bank.act_allowed_at);

        let (row_hit, activated_at, mut data_start) = match kind {
            AccessKind::Read => {
                let hit = bank.open_row == Some(coord.row);
                let mut ready = issued_at;
                let mut activated = None;
                if hit {
                    self.stats.row_hits += 1;
                } else {
                    ready += t.t_read;
                    bank.open_row = Some(coord.row);
                    bank.last_activate = Some(issued_at);
                    activated = Some(issued_at);
                    self.stats.activations += 1;
                }
                ready += t.t_send;
                bank.act_allowed_at = ready;
                (hit, activated, ready)
            }
            AccessKind::Write => (false, None, issued_at),
        };

        if let Some(last) = self.last_burst {
            let gap = self.turnaround.gap(&last, coord.rank, kind);
            if gap > 0 {
                self.stats.bus_turnarounds += 1;
            }
            data_start = data_start.max(last.data_start + t.t_burst).max(last.data_end + gap);
        }
        let ready_at = data_start + t.t_burst;
        self.last_burst = Some(LastBurst { rank: coord.rank, group: 0, kind, data_start, data_end: ready_at });

        match kind {
            AccessKind::Read => {
                self.stats.reads += 1;
                self.stats.bytes_read += burst;
            }
            AccessKind::Write => {
                self.banks[idx].act_allowed_at = ready_at + t.t_write;
                self.stats.writes += 1;
                self.stats.bytes_written += burst;
            }
        }

        trace!(bank = coord.bank, row = coord.row, ?kind, row_hit, issued_at, ready_at, "nvm burst");
        MediaAccess { activated_at, precharged_at: None, issued_at, ready_at, row_hit }
    }

    fn is_row_hit(&self, coord: MediaCoord) -> bool {
        self.banks[self.bank_index(coord)].open_row == Some(coord.row)
    }

    fn static_latency(&self) -> Tick {
        self.timing.t_read + self.timing.t_send
    }

    fn command_slot(&self) -> Tick {
        self.timing.t_burst
    }

    fn stats(&self) -> MediaStats {
        self.stats.clone()
    }
}
