//! Memory Controller Unit Tests.
//!
//! Verifies admission and backpressure, write buffering, FR-FCFS scheduling with
//! starvation promotion, bus direction switching, and response timing.

use crate::common::harness::Bench;
use crate::common::mocks::media::open_row_media;
use cxlsim_core::common::{AccessKind, AddrRange, MIB, MemCmd, Packet, Tick};
use cxlsim_core::config::{ControllerConfig, ControllerParams, MediaProfile};
use cxlsim_core::soc::memory::buffer::BackingStore;
use cxlsim_core::soc::memory::controller::{BusState, MemCtrl};
use cxlsim_core::soc::memory::media::MediaInterface;
use cxlsim_core::soc::traits::{AtomicHop, Delivery, SimObject};
use cxlsim_core::stats::{CtrlStats, SimStats};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

const SIZE: u64 = MIB;

fn ctrl_with(params: &ControllerParams) -> MemCtrl {
    let media = MediaProfile::Ddr4_2400_16x4.baseline();
    let cfg = ControllerConfig::resolve(params, &media).unwrap();
    let store = Arc::new(BackingStore::new(SIZE).unwrap());
    MemCtrl::from_config("mem-ctrl", AddrRange::new(0, SIZE), &cfg, &media, store).unwrap()
}

fn ctrl() -> MemCtrl {
    ctrl_with(&ControllerParams::default())
}

fn ctrl_stats(ctrl: &MemCtrl) -> CtrlStats {
    let mut stats = SimStats::default();
    ctrl.report(&mut stats);
    stats.controller.unwrap()
}

// ══════════════════════════════════════════════════════════
// 1. Read timing
// ══════════════════════════════════════════════════════════

#[test]
fn single_read_adds_frontend_and_backend() {
    let mut bench = Bench::new(ctrl());
    assert_eq!(bench.send(Packet::read(1, 0, 64, 0)), Delivery::Accepted);
    bench.run();

    assert_eq!(bench.responses.len(), 1);
    let (at, pkt) = &bench.responses[0];
    assert_eq!(*at, 51_652);
    assert_eq!(pkt.cmd, MemCmd::ReadResp);
    assert_eq!(pkt.data.len(), 64);
}

#[test]
fn header_delay_is_charged_on_the_response() {
    let mut bench = Bench::new(ctrl());
    let mut pkt = Packet::read(1, 0, 64, 0);
    pkt.header_delay = 5_000;
    let _ = bench.send(pkt);
    bench.run();
    assert_eq!(bench.responses[0].0, 56_652);
}

#[test]
fn multi_burst_read_answers_once_after_the_last_burst() {
    let mut bench = Bench::new(ctrl());
    let _ = bench.send(Packet::read(1, 0, 128, 0));
    bench.run();

    assert_eq!(bench.responses.len(), 1);
    assert_eq!(bench.responses[0].0, 56_652);
    assert_eq!(bench.responses[0].1.data.len(), 128);
    let s = ctrl_stats(&bench.dut);
    assert_eq!(s.read_reqs, 1);
    assert_eq!(s.read_bursts, 2);
    assert_eq!(s.row_hits, 1);
}

#[test]
fn out_of_range_request_is_unroutable() {
    let mut bench = Bench::new(ctrl());
    let d = bench.send(Packet::read(1, SIZE - 32, 64, 0));
    assert!(matches!(d, Delivery::Unroutable(_)));
}

// ══════════════════════════════════════════════════════════
// 2. Write buffering
// ══════════════════════════════════════════════════════════

#[test]
fn writes_are_posted_and_merged() {
    let mut bench = Bench::new(ctrl());
    assert_eq!(bench.send(Packet::write(1, 0x40, vec![0x11; 64], 0)), Delivery::Accepted);
    assert_eq!(bench.send(Packet::write(2, 0x40, vec![0x22; 64], 0)), Delivery::Accepted);
    assert_eq!(bench.dut.write_queue_len(), 1);

    bench.run();
    let acks: Vec<(Tick, MemCmd)> = bench.responses.iter().map(|(t, p)| (*t, p.cmd)).collect();
    assert_eq!(acks, vec![(10_000, MemCmd::WriteResp), (10_000, MemCmd::WriteResp)]);

    let s = ctrl_stats(&bench.dut);
    assert_eq!(s.write_reqs, 2);
    assert_eq!(s.merged_writes, 1);
    assert_eq!(s.write_bursts, 1);
}

#[test]
fn read_covered_by_write_queue_skips_media() {
    let mut bench = Bench::new(ctrl());
    let _ = bench.send(Packet::write(1, 0x40, vec![0xAB; 64], 0));
    let _ = bench.send(Packet::read(2, 0x40, 64, 0));
    assert_eq!(bench.dut.read_queue_len(), 0);
    bench.run();

    let (at, read) = bench.responses.iter().find(|(_, p)| p.id == 2).unwrap();
    assert_eq!(*at, 10_000);
    assert_eq!(read.data, vec![0xAB; 64]);
    let s = ctrl_stats(&bench.dut);
    assert_eq!(s.reads_from_write_queue, 1);
    assert_eq!(s.read_bursts, 0);
}

#[test]
fn read_sees_latest_write_after_drain() {
    let mut bench = Bench::new(ctrl());
    let _ = bench.send(Packet::write(1, 0x80, vec![7; 64], 0));
    bench.run();
    assert_eq!(bench.dut.write_queue_len(), 0);

    let _ = bench.send(Packet::read(2, 0x80, 64, bench.now));
    bench.run();
    assert_eq!(bench.responses.last().unwrap().1.data, vec![7; 64]);
}

// ══════════════════════════════════════════════════════════
// 3. Scheduling
// ══════════════════════════════════════════════════════════

#[test]
fn row_hits_go_first_until_the_miss_starves() {
    let media = MediaProfile::Ddr4_2400_16x4.baseline();
    let cfg = ControllerConfig::resolve(&ControllerParams::default(), &media).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mock: Box<dyn MediaInterface> = Box::new(open_row_media(0, 1_000, Arc::clone(&log)));
    let store = Arc::new(BackingStore::new(SIZE).unwrap());
    let ctrl = MemCtrl::new("mem-ctrl", AddrRange::new(0, SIZE), cfg, media.geometry, vec![mock], store).unwrap();
    let row_stride = ctrl.decoder().row_stride();
    assert_eq!(ctrl.decoder().decode(row_stride).row, 1);

    let mut bench = Bench::new(ctrl);
    let _ = bench.send(Packet::read(0, row_stride, 64, 0));
    for i in 1..=20u64 {
        let _ = bench.send(Packet::read(i, i * 64, 64, 0));
    }
    bench.run();

    let rows: Vec<u64> = log.lock().unwrap().iter().map(|(row, _, _)| *row).collect();
    assert_eq!(rows.len(), 21);
    assert!(rows[..16].iter().all(|&r| r == 0));
    assert_eq!(rows[16], 1);
    assert!(ctrl_stats(&bench.dut).starvation_promotions >= 1);
    assert_eq!(bench.responses.len(), 21);
}

#[test]
fn row_conflict_costs_more_than_row_hit() {
    let second_completion = |addr: u64| {
        let mut bench = Bench::new(ctrl());
        let _ = bench.send(Packet::read(1, 0, 64, 0));
        let _ = bench.send(Packet::read(2, addr, 64, 0));
        bench.run();
        assert_eq!(bench.responses.len(), 2);
        (bench.responses[0].0, bench.responses[1].0)
    };
    let row_stride = ctrl().decoder().row_stride();

    let (first, conflict) = second_completion(row_stride);
    let (_, hit) = second_completion(64);
    assert!(conflict >= first + 14_160 + 14_160);
    assert!(hit >= first + 3_332);
    assert!(hit < conflict);
}

#[test]
fn reads_win_until_the_read_queue_empties() {
    let mut bench = Bench::new(ctrl());
    let _ = bench.send(Packet::write(1, 0x1000, vec![1; 64], 0));
    let _ = bench.send(Packet::read(2, 0, 64, 0));
    bench.run();

    let s = ctrl_stats(&bench.dut);
    assert_eq!(s.read_bursts, 1);
    assert_eq!(s.write_bursts, 1);
    assert_eq!(s.bus_turnarounds, 1);
    assert_eq!(s.reads_per_turnaround.samples(), 1);
    assert_eq!(bench.dut.bus_state(), BusState::Write);
}

// ══════════════════════════════════════════════════════════
// 4. Backpressure
// ══════════════════════════════════════════════════════════

#[test]
fn full_read_queue_refuses_then_retries() {
    let params = ControllerParams { read_buffer_size: Some(4), max_pending_reads: Some(4), ..Default::default() };
    let mut bench = Bench::new(ctrl_with(&params));
    for i in 0..4u64 {
        assert_eq!(bench.send(Packet::read(i, i * 64, 64, 0)), Delivery::Accepted);
    }
    let refused = bench.send(Packet::read(4, 4 * 64, 64, 0));
    assert!(matches!(refused, Delivery::Busy(_)));
    assert_eq!(ctrl_stats(&bench.dut).rejected_reads, 1);

    bench.run();
    assert_eq!(bench.upstream_retries, 1);
    assert_eq!(bench.dut.outstanding_reads(bench.now), 0);
    assert_eq!(bench.send(Packet::read(4, 4 * 64, 64, bench.now)), Delivery::Accepted);
}

#[test]
fn packet_wider_than_the_read_queue_is_refused_even_when_idle() {
    let params = ControllerParams { read_buffer_size: Some(2), max_pending_reads: Some(2), ..Default::default() };
    let mut bench = Bench::new(ctrl_with(&params));
    assert!(matches!(bench.send(Packet::read(1, 0, 256, 0)), Delivery::Busy(_)));
    assert_eq!(bench.dut.read_queue_len(), 0);
    assert_eq!(ctrl_stats(&bench.dut).rejected_reads, 1);

    assert_eq!(bench.send(Packet::read(2, 0, 128, 0)), Delivery::Accepted);
    assert_eq!(bench.dut.read_queue_len(), 2);
}

#[test]
fn refused_response_keeps_its_place() {
    let mut bench = Bench::new(ctrl());
    bench.refuse_upstream = true;
    let _ = bench.send(Packet::read(1, 0, 64, 0));
    let _ = bench.send(Packet::read(2, 64, 64, 0));
    bench.run();
    assert!(bench.responses.is_empty());

    bench.release_upstream();
    bench.run();
    let ids: Vec<u64> = bench.responses.iter().map(|(_, p)| p.id).collect();
    assert_eq!(ids, vec![1, 2]);
}

// ══════════════════════════════════════════════════════════
// 5. Atomic mode
// ══════════════════════════════════════════════════════════

#[test]
fn atomic_read_uses_static_latency() {
    let mut ctrl = ctrl();
    let mut pkt = Packet::read(1, 0x100, 64, 0);
    assert_eq!(ctrl.access_atomic(&mut pkt), AtomicHop::Complete(48_320));
    assert_eq!(pkt.cmd, MemCmd::ReadResp);
    assert_eq!(pkt.kind(), AccessKind::Read);
    assert_eq!(pkt.data.len(), 64);
}

#[test]
fn atomic_write_is_visible_to_timing_reads() {
    let mut ctrl = ctrl();
    let mut w = Packet::write(1, 0x200, vec![9; 16], 0);
    let _ = ctrl.access_atomic(&mut w);
    let mut bench = Bench::new(ctrl);
    let _ = bench.send(Packet::read(2, 0x200, 16, 0));
    bench.run();
    assert_eq!(bench.responses[0].1.data, vec![9; 16]);
}
