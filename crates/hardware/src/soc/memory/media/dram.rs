//! DDR-style media timing.
//!
//! This module models one DRAM channel at command granularity. It performs:
//! 1. **Row management:** Hits skip activation; conflicts precharge (respecting tRAS,
//!    tRTP and tWR) and re-activate after tRP, then wait tRCD for the column.
//! 2. **Activation limits:** tRC per bank, tRRD / tRRD_L per rank, and at most
//!    `activation_limit` activates in any rolling tXAW window.
//! 3. **Refresh:** Every bank is unavailable for tRFC once per tREFI. Refresh is
//!    applied lazily when a command arrives and closes the open row.
//! 4. **Data bus:** tBURST spacing (tCCD_L inside a bank group) plus read/write and
//!    rank turnarounds.
//! 5. **Power-down:** A rank idle for `powerdown_idle` pays tXP on its next command.

use super::{BankState, LastBurst, MediaAccess, MediaInterface, MediaKind, Turnaround};
use crate::common::{AccessKind, Tick};
use crate::soc::memory::mapping::{MediaCoord, MediaGeometry};
use crate::stats::MediaStats;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::trace;

/// Resolved DRAM timing parameters, all in ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DramTiming {
    /// Clock period.
    pub t_ck: Tick,
    /// Burst duration on the data bus.
    pub t_burst: Tick,
    /// Column-to-column delay inside one bank group.
    pub t_ccd_l: Tick,
    /// Activate to column command.
    pub t_rcd: Tick,
    /// Column command to first data beat.
    pub t_cl: Tick,
    /// Precharge to activate.
    pub t_rp: Tick,
    /// Activate to precharge.
    pub t_ras: Tick,
    /// Activate to activate, different bank groups.
    pub t_rrd: Tick,
    /// Activate to activate, same bank group.
    pub t_rrd_l: Tick,
    /// Rolling activation window.
    pub t_xaw: Tick,
    /// Activates allowed inside one tXAW window.
    pub activation_limit: u32,
    /// Refresh cycle time.
    pub t_rfc: Tick,
    /// Refresh interval.
    pub t_refi: Tick,
    /// Write recovery: end of write data to precharge.
    pub t_wr: Tick,
    /// Write to read turnaround.
    pub t_wtr: Tick,
    /// Read to precharge.
    pub t_rtp: Tick,
    /// Read to write turnaround.
    pub t_rtw: Tick,
    /// Rank to rank switch.
    pub t_cs: Tick,
    /// Power-down exit.
    pub t_xp: Tick,
    /// Idle time after which a rank is considered powered down; zero disables power-down.
    pub powerdown_idle: Tick,
}

impl DramTiming {
    /// Row cycle time: activate to activate on one bank.
    pub const fn t_rc(&self) -> Tick {
        self.t_ras + self.t_rp
    }
}

#[derive(Clone, Debug, Default)]
struct RankState {
    last_act: Option<(Tick, u64)>,
    act_window: VecDeque<Tick>,
    last_activity: Tick,
}

/// One DRAM channel.
#[derive(Debug)]
pub struct DramMedia {
    timing: DramTiming,
    geometry: MediaGeometry,
    turnaround: Turnaround,
    banks: Vec<BankState>,
    ranks: Vec<RankState>,
    last_burst: Option<LastBurst>,
    stats: MediaStats,
}

impl DramMedia {
    /// Creates a channel with every bank precharged and the first refresh due at tREFI.
    pub fn new(geometry: MediaGeometry, timing: DramTiming) -> Self {
        let ranks = geometry.ranks_per_channel as usize;
        let banks = ranks * geometry.banks_per_rank as usize;
        let bank = BankState { refresh_due: timing.t_refi, ..BankState::default() };
        Self {
            timing,
            geometry,
            turnaround: Turnaround { t_wtr: timing.t_wtr, t_rtw: timing.t_rtw, t_cs: timing.t_cs },
            banks: vec![bank; banks],
            ranks: vec![RankState::default(); ranks],
            last_burst: None,
            stats: MediaStats::default(),
        }
    }

    /// Returns the timing parameters.
    pub const fn timing(&self) -> &DramTiming {
        &self.timing
    }

    /// Returns the state of one bank.
    pub fn bank(&self, rank: usize, bank: usize) -> Option<&BankState> {
        self.banks.get(rank * self.geometry.banks_per_rank as usize + bank)
    }

    fn bank_index(&self, coord: MediaCoord) -> usize {
        let banks = self.geometry.banks_per_rank as usize;
        (coord.rank % self.ranks.len()) * banks + coord.bank % banks
    }

    fn bank_group(&self, bank: usize) -> u64 {
        bank as u64 / self.geometry.banks_per_group().max(1)
    }

    /// Pushes `at` past any refresh window of bank `idx` that has started by then.
    fn settle_refresh(&mut self, idx: usize, at: Tick) -> Tick {
        let t = self.timing;
        let bank = &mut self.banks[idx];
        let mut now = at;
        while t.t_refi > 0 && now >= bank.refresh_due {
            let missed = (now - bank.refresh_due) / t.t_refi;
            let start = bank.refresh_due + missed * t.t_refi;
            let end = start + t.t_rfc;
            self.stats.refreshes += missed + 1;
            bank.open_row = None;
            bank.act_allowed_at = bank.act_allowed_at.max(end);
            bank.refresh_due = start + t.t_refi;
            if now < end {
                now = end;
                self.stats.refresh_stalls += 1;
            }
        }
        now
    }

    /// Earliest activate at or after `earliest` allowed by tRRD and the activation window.
    ///
    /// Returns the tick and whether the activation window delayed it.
    fn activate_bound(&self, rank: usize, group: u64, earliest: Tick) -> (Tick, bool) {
        let t = self.timing;
        let state = &self.ranks[rank];
        let mut act = earliest;
        if let Some((last, last_group)) = state.last_act {
            act = act.max(last + if last_group == group { t.t_rrd_l } else { t.t_rrd });
        }
        let limit = t.activation_limit as usize;
        if limit > 0 && state.act_window.len() >= limit {
            let window_start = state.act_window[state.act_window.len() - limit];
            if act < window_start + t.t_xaw {
                return (window_start + t.t_xaw, true);
            }
        }
        (act, false)
    }

    fn record_activate(&mut self, rank: usize, group: u64, act: Tick) {
        let limit = self.timing.activation_limit as usize;
        let state = &mut self.ranks[rank];
        if limit > 0 {
            state.act_window.push_back(act);
            while state.act_window.len() > limit {
                let _ = state.act_window.pop_front();
            }
        }
        state.last_act = Some((act, group));
    }

    /// Schedules precharge, activate and column for a burst starting no earlier than `now`
    /// without touching any state.
    fn plan(&self, idx: usize, rank: usize, group: u64, row: u64, kind: AccessKind, mut now: Tick) -> Plan {
        let t = self.timing;
        let bank = &self.banks[idx];
        let row_hit = bank.open_row == Some(row);
        let mut precharged_at = None;
        let mut activated_at = None;
        let mut window_stall = false;
        let mut col_allowed = bank.col_allowed_at;
        if !row_hit {
            let mut act_allowed = bank.act_allowed_at;
            if bank.open_row.is_some() {
                let pre = now.max(bank.pre_allowed_at);
                act_allowed = act_allowed.max(pre + t.t_rp);
                precharged_at = Some(pre);
                now = pre + t.t_rp;
            }
            let (act, stalled) = self.activate_bound(rank, group, now.max(act_allowed));
            activated_at = Some(act);
            window_stall = stalled;
            col_allowed = col_allowed.max(act + t.t_rcd);
            now = act + t.t_rcd;
        }

        let mut data_start = now.max(col_allowed) + t.t_cl;
        let mut turnaround = false;
        if let Some(last) = self.last_burst {
            let spacing = if last.rank == rank && last.group == group { t.t_ccd_l } else { t.t_burst };
            let gap = self.turnaround.gap(&last, rank, kind);
            turnaround = gap > 0;
            data_start = data_start.max(last.data_start + spacing).max(last.data_end + gap);
        }
        Plan { row_hit, precharged_at, activated_at, window_stall, issued_at: data_start - t.t_cl, turnaround }
    }
}

/// Command ticks chosen for one burst before they are committed.
#[derive(Clone, Copy, Debug)]
struct Plan {
    row_hit: bool,
    precharged_at: Option<Tick>,
    activated_at: Option<Tick>,
    window_stall: bool,
    issued_at: Tick,
    turnaround: bool,
}

impl Plan {
    /// First command tick at or after `due`, in issue order.
    fn first_at_or_after(&self, due: Tick) -> Option<Tick> {
        [self.precharged_at, self.activated_at, Some(self.issued_at)].into_iter().flatten().find(|&c| c >= due)
    }
}

/// Reschedules allowed when a planned command runs into a refresh window.
const MAX_REFRESH_REPLANS: u32 = 8;

impl MediaInterface for DramMedia {
    fn kind(&self) -> MediaKind {
        MediaKind::Dram
    }

    fn access(&mut self, coord: MediaCoord, kind: AccessKind, at: Tick) -> MediaAccess {
        let t = self.timing;
        let idx = self.bank_index(coord);
        let rank = coord.rank % self.ranks.len();
        let group = self.bank_group(coord.bank);
        let mut now = at;

        if t.powerdown_idle > 0 && now >= self.ranks[rank].last_activity.saturating_add(t.powerdown_idle) {
            now += t.t_xp;
            self.stats.powerdown_exits += 1;
        }
        // A command at or past the next refresh start runs after that refresh, which
        // closes the row; settle it and plan again from there.
        let mut replans = 0;
        let plan = loop {
            now = self.settle_refresh(idx, now);
            let plan = self.plan(idx, rank, group, coord.row, kind, now);
            match plan.first_at_or_after(self.banks[idx].refresh_due) {
                Some(tick) if t.t_refi > 0 && replans < MAX_REFRESH_REPLANS => {
                    now = tick;
                    replans += 1;
                }
                _ => break plan,
            }
        };

        let Plan { row_hit, precharged_at, activated_at, window_stall, issued_at, turnaround } = plan;
        if row_hit {
            self.stats.row_hits += 1;
        }
        if let Some(pre) = precharged_at {
            let bank = &mut self.banks[idx];
            bank.open_row = None;
            bank.last_precharge = Some(pre);
            bank.act_allowed_at = bank.act_allowed_at.max(pre + t.t_rp);
            self.stats.precharges += 1;
        }
        if let Some(act) = activated_at {
            self.record_activate(rank, group, act);
            let bank = &mut self.banks[idx];
            bank.open_row = Some(coord.row);
            bank.last_activate = Some(act);
            bank.act_allowed_at = act + t.t_rc();
            bank.pre_allowed_at = bank.pre_allowed_at.max(act + t.t_ras);
            self.stats.activations += 1;
            if window_stall {
                self.stats.activation_window_stalls += 1;
            }
        }
        if turnaround {
            self.stats.bus_turnarounds += 1;
        }

        let data_start = issued_at + t.t_cl;
        let ready_at = data_start + t.t_burst;
        self.last_burst = Some(LastBurst { rank, group, kind, data_start, data_end: ready_at });

        let burst = self.geometry.burst_size();
        let bank = &mut self.banks[idx];
        bank.col_allowed_at = issued_at + t.t_ccd_l;
        match kind {
            AccessKind::Read => {
                bank.pre_allowed_at = bank.pre_allowed_at.max(issued_at + t.t_rtp);
                self.stats.reads += 1;
                self.stats.bytes_read += burst;
            }
            AccessKind::Write => {
                bank.pre_allowed_at = bank.pre_allowed_at.max(ready_at + t.t_wr);
                self.stats.writes += 1;
                self.stats.bytes_written += burst;
            }
        }
        let activity = &mut self.ranks[rank].last_activity;
        *activity = (*activity).max(ready_at);

        trace!(
            rank,
            bank = coord.bank,
            row = coord.row,
            ?kind,
            row_hit,
            issued_at,
            ready_at,
            "dram burst"
        );
        MediaAccess { activated_at, precharged_at, issued_at, ready_at, row_hit }
    }

    fn is_row_hit(&self, coord: MediaCoord) -> bool {
        self.banks[self.bank_index(coord)].open_row == Some(coord.row)
    }

    fn static_latency(&self) -> Tick {
        self.timing.t_rcd + self.timing.t_cl
    }

    fn command_slot(&self) -> Tick {
        self.timing.t_burst
    }

    fn stats(&self) -> MediaStats {
        self.stats.clone()
    }
}
