//! Media Timing Unit Tests.
//!
//! Verifies the DRAM bank state machine (row hits and conflicts, refresh,
//! power-down, activation limits, bus turnarounds) and the NVM read buffer.

use cxlsim_core::common::{AccessKind, NS, Tick};
use cxlsim_core::config::{MediaConfig, MediaProfile, MediaTiming};
use cxlsim_core::soc::memory::mapping::{MediaCoord, MediaGeometry};
use cxlsim_core::soc::memory::media::{DramMedia, DramTiming, MediaInterface, NvmMedia, NvmTiming};
use proptest::prelude::*;

fn ddr4() -> (MediaGeometry, DramTiming) {
    let cfg: MediaConfig = MediaProfile::Ddr4_2400_16x4.baseline();
    match cfg.timing {
        MediaTiming::Dram(t) => (cfg.geometry, t),
        MediaTiming::Nvm(_) => unreachable!("DDR4 profile carries DRAM timing"),
    }
}

fn nvm() -> (MediaGeometry, NvmTiming) {
    let cfg = MediaProfile::Nvm_2400_1x64.baseline();
    match cfg.timing {
        MediaTiming::Nvm(t) => (cfg.geometry, t),
        MediaTiming::Dram(_) => unreachable!("NVM profile carries NVM timing"),
    }
}

fn at(rank: usize, bank: usize, row: u64) -> MediaCoord {
    MediaCoord { channel: 0, rank, bank, row, column: 0 }
}

// ══════════════════════════════════════════════════════════
// 1. DRAM: cold access and row-buffer scenarios
// ══════════════════════════════════════════════════════════

#[test]
fn cold_read_pays_activate_and_column() {
    let (g, t) = ddr4();
    let mut dram = DramMedia::new(g, t);
    let a = dram.access(at(0, 0, 0), AccessKind::Read, 0);
    assert!(!a.row_hit);
    assert_eq!(a.activated_at, Some(0));
    assert_eq!(a.issued_at, t.t_rcd);
    assert_eq!(a.ready_at, t.t_rcd + t.t_cl + t.t_burst);
    assert_eq!(a.ready_at, 31_652);
}

#[test]
fn same_bank_different_row_pays_precharge_and_activate() {
    let (g, t) = ddr4();
    let mut dram = DramMedia::new(g, t);
    let first = dram.access(at(0, 0, 0), AccessKind::Read, 0);
    let second = dram.access(at(0, 0, 1), AccessKind::Read, first.ready_at);

    let access_delay = t.t_cl + t.t_burst;
    assert!(!second.row_hit);
    assert!(second.ready_at >= first.ready_at + t.t_rp + t.t_rcd + access_delay);
    // Precharge waits for tRAS, activate for tRC.
    assert_eq!(second.precharged_at, Some(t.t_ras));
    assert_eq!(second.activated_at, Some(t.t_rc()));
    assert_eq!(second.ready_at, 77_812);
}

#[test]
fn same_bank_same_row_is_a_row_hit() {
    let (g, t) = ddr4();
    let mut dram = DramMedia::new(g, t);
    let first = dram.access(at(0, 0, 0), AccessKind::Read, 0);
    assert!(dram.is_row_hit(at(0, 0, 0)));
    let second = dram.access(at(0, 0, 0), AccessKind::Read, first.ready_at);

    assert!(second.row_hit);
    assert_eq!(second.activated_at, None);
    assert!(second.ready_at >= first.ready_at + t.t_cl + t.t_burst);
    assert_eq!(second.ready_at, 49_144);

    let mut conflict = DramMedia::new(g, t);
    let c1 = conflict.access(at(0, 0, 0), AccessKind::Read, 0);
    let c2 = conflict.access(at(0, 0, 1), AccessKind::Read, c1.ready_at);
    assert!(second.ready_at < c2.ready_at);
}

#[test]
fn hit_stats_are_counted() {
    let (g, t) = ddr4();
    let mut dram = DramMedia::new(g, t);
    let mut now = 0;
    for _ in 0..4 {
        now = dram.access(at(0, 3, 7), AccessKind::Read, now).ready_at;
    }
    let s = dram.stats();
    assert_eq!(s.reads, 4);
    assert_eq!(s.row_hits, 3);
    assert_eq!(s.activations, 1);
    assert_eq!(s.bytes_read, 4 * 64);
    assert!((s.row_hit_rate() - 0.75).abs() < f64::EPSILON);
}

// ══════════════════════════════════════════════════════════
// 2. DRAM: refresh and power-down
// ══════════════════════════════════════════════════════════

#[test]
fn refresh_closes_row_and_stalls_until_trfc() {
    let (g, t) = ddr4();
    let mut dram = DramMedia::new(g, t);
    let _ = dram.access(at(0, 0, 0), AccessKind::Read, 0);
    let a = dram.access(at(0, 0, 0), AccessKind::Read, t.t_refi);

    assert!(!a.row_hit);
    assert_eq!(a.activated_at, Some(t.t_refi + t.t_rfc));
    let s = dram.stats();
    assert_eq!(s.refreshes, 1);
    assert_eq!(s.refresh_stalls, 1);
    assert_eq!(s.powerdown_exits, 1);
    assert_eq!(dram.bank(0, 0).map(|b| b.refresh_due), Some(2 * t.t_refi));
}

#[test]
fn command_landing_in_a_refresh_window_waits_for_it() {
    let (g, mut t) = ddr4();
    t.powerdown_idle = 0;
    let mut dram = DramMedia::new(g, t);

    // Activate would fit before the refresh, the column command would not.
    let a = dram.access(at(0, 0, 0), AccessKind::Read, t.t_refi - 10_000);
    let end = t.t_refi + t.t_rfc;
    assert_eq!(a.activated_at, Some(end));
    assert_eq!(a.issued_at, end + t.t_rcd);

    let b = dram.access(at(0, 0, 1), AccessKind::Read, t.t_refi - 5_000);
    assert_eq!(b.precharged_at, Some(end + t.t_ras));
    let s = dram.stats();
    assert_eq!(s.refreshes, 1);
    assert_eq!(s.refresh_stalls, 1);
}

#[test]
fn precharge_held_past_refresh_start_is_replaced_by_the_refresh() {
    let (g, mut t) = ddr4();
    t.powerdown_idle = 0;
    let mut dram = DramMedia::new(g, t);
    let a = dram.access(at(0, 0, 0), AccessKind::Read, t.t_refi - 20_000);
    assert_eq!(a.activated_at, Some(t.t_refi - 20_000));

    // tRAS holds the precharge until after the refresh starts; the refresh closes the row instead.
    let b = dram.access(at(0, 0, 1), AccessKind::Read, t.t_refi - 19_000);
    assert_eq!(b.precharged_at, None);
    assert_eq!(b.activated_at, Some(t.t_refi + t.t_rfc));
    assert_eq!(dram.stats().refresh_stalls, 1);
}

#[test]
fn powerdown_disabled_with_zero_idle() {
    let (g, mut t) = ddr4();
    t.powerdown_idle = 0;
    let mut dram = DramMedia::new(g, t);
    let _ = dram.access(at(0, 0, 0), AccessKind::Read, 0);
    let _ = dram.access(at(0, 1, 0), AccessKind::Read, 5_000 * NS);
    assert_eq!(dram.stats().powerdown_exits, 0);
}

#[test]
fn idle_rank_pays_exit_latency() {
    let (g, t) = ddr4();
    let mut dram = DramMedia::new(g, t);
    let first = dram.access(at(0, 0, 0), AccessKind::Read, 0);
    let start = first.ready_at + t.powerdown_idle;
    let a = dram.access(at(0, 1, 0), AccessKind::Read, start);
    assert_eq!(a.activated_at, Some(start + t.t_xp));
}

// ══════════════════════════════════════════════════════════
// 3. DRAM: activation limits and bus turnaround
// ══════════════════════════════════════════════════════════

#[test]
fn fifth_activate_waits_for_the_window() {
    let (g, mut t) = ddr4();
    t.t_xaw = 20 * NS;
    let mut dram = DramMedia::new(g, t);
    // Banks 0, 4, 8, 12 sit in different bank groups; bank 1 shares group 0.
    let acts: Vec<Tick> = [0, 4, 8, 12, 1]
        .iter()
        .map(|&b| dram.access(at(0, b, 0), AccessKind::Read, 0).activated_at.unwrap())
        .collect();
    assert_eq!(&acts[..4], &[0, t.t_rrd, 2 * t.t_rrd, 3 * t.t_rrd]);
    assert_eq!(acts[4], t.t_xaw);
    assert_eq!(dram.stats().activation_window_stalls, 1);
}

#[test]
fn same_group_activates_use_trrd_l() {
    let (g, t) = ddr4();
    let mut dram = DramMedia::new(g, t);
    let _ = dram.access(at(0, 0, 0), AccessKind::Read, 0);
    let a = dram.access(at(0, 1, 0), AccessKind::Read, 0);
    assert_eq!(a.activated_at, Some(t.t_rrd_l));
}

#[test]
fn write_to_read_turnaround() {
    let (g, t) = ddr4();
    let mut dram = DramMedia::new(g, t);
    let w = dram.access(at(0, 0, 0), AccessKind::Write, 0);
    let r = dram.access(at(0, 0, 0), AccessKind::Read, 0);
    assert!(r.row_hit);
    assert_eq!(r.ready_at, w.ready_at + t.t_wtr + t.t_burst);
    assert_eq!(dram.stats().bus_turnarounds, 1);
}

#[test]
fn write_recovery_delays_precharge() {
    let (g, t) = ddr4();
    let mut dram = DramMedia::new(g, t);
    let w = dram.access(at(0, 0, 0), AccessKind::Write, 0);
    let r = dram.access(at(0, 0, 1), AccessKind::Read, w.ready_at);
    assert_eq!(r.precharged_at, Some(w.ready_at + t.t_wr));
}

proptest! {
    #[test]
    fn activates_respect_trc_and_window(
        ops in prop::collection::vec((0usize..6, 0u64..4, any::<bool>(), 0u64..20_000), 1..64)
    ) {
        let (g, t) = ddr4();
        let mut dram = DramMedia::new(g, t);
        let mut now = 0;
        let mut per_bank: Vec<Vec<Tick>> = vec![Vec::new(); 16];
        let mut all = Vec::new();
        for (bank, row, write, gap) in ops {
            now += gap;
            let kind = if write { AccessKind::Write } else { AccessKind::Read };
            let a = dram.access(at(0, bank, row), kind, now);
            prop_assert!(a.ready_at > now);
            if let Some(act) = a.activated_at {
                per_bank[bank].push(act);
                all.push(act);
            }
        }
        for acts in &per_bank {
            for w in acts.windows(2) {
                prop_assert!(w[1] >= w[0] + t.t_rc(), "tRC violated: {:?}", w);
            }
        }
        let limit = t.activation_limit as usize;
        for i in limit..all.len() {
            prop_assert!(all[i] >= all[i - limit] + t.t_xaw, "window violated at {}", i);
        }
    }
}

proptest! {
    #[test]
    fn no_command_issues_inside_a_refresh_window(
        ops in prop::collection::vec((0usize..6, 0u64..4, any::<bool>(), 0u64..200_000), 1..64)
    ) {
        let (g, mut t) = ddr4();
        t.t_refi = 400 * NS;
        t.t_rfc = 100 * NS;
        let mut dram = DramMedia::new(g, t);
        let mut now = 0;
        for (bank, row, write, gap) in ops {
            now += gap;
            let kind = if write { AccessKind::Write } else { AccessKind::Read };
            let a = dram.access(at(0, bank, row), kind, now);
            for tick in [a.precharged_at, a.activated_at, Some(a.issued_at)].into_iter().flatten() {
                prop_assert!(
                    tick < t.t_refi || tick % t.t_refi >= t.t_rfc,
                    "command at {} inside refresh window", tick
                );
            }
        }
    }
}

// ══════════════════════════════════════════════════════════
// 4. NVM
// ══════════════════════════════════════════════════════════

#[test]
fn nvm_read_miss_then_buffer_hit() {
    let (g, t) = nvm();
    let mut media = NvmMedia::new(g, t);
    let miss = media.access(at(0, 0, 0), AccessKind::Read, 0);
    assert!(!miss.row_hit);
    assert_eq!(miss.ready_at, t.t_read + t.t_send + t.t_burst);
    assert_eq!(media.static_latency(), t.t_read + t.t_send);

    let hit = media.access(at(0, 0, 0), AccessKind::Read, miss.ready_at);
    assert!(hit.row_hit);
    assert_eq!(hit.ready_at, miss.ready_at + t.t_send + t.t_burst);
}

#[test]
fn nvm_write_keeps_bank_busy() {
    let (g, t) = nvm();
    let mut media = NvmMedia::new(g, t);
    let w = media.access(at(0, 2, 0), AccessKind::Write, 0);
    assert!(!w.row_hit);
    assert_eq!(w.ready_at, t.t_burst);
    let r = media.access(at(0, 2, 0), AccessKind::Read, w.ready_at);
    assert_eq!(r.issued_at, w.ready_at + t.t_write);
    assert_eq!(media.stats().writes, 1);
}
