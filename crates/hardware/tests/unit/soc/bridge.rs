//! Protocol Bridge Unit Tests.
//!
//! Verifies address filtering, latency injection and message tagging, response
//! reservation, queue backpressure, and the atomic path.

use crate::common::harness::Bench;
use cxlsim_core::common::{AddrRange, CxlCmd, GIB, MIB, NS, Packet};
use cxlsim_core::config::BridgeConfig;
use cxlsim_core::soc::bridge::CxlBridge;
use cxlsim_core::soc::traits::{AtomicHop, Delivery, SimObject};
use cxlsim_core::stats::{BridgeStats, SimStats};
use pretty_assertions::assert_eq;

const CXL: AddrRange = AddrRange::new(0x1_0000_0000, 2 * GIB);
const MMIO: AddrRange = AddrRange::new(0x8000_0000, MIB);

fn bridge_with(req: usize, resp: usize) -> CxlBridge {
    let cfg = BridgeConfig { req_fifo_depth: req, resp_fifo_depth: resp, ranges: vec![MMIO, CXL], ..Default::default() };
    CxlBridge::new("cxl-bridge", cfg, CXL)
}

fn bridge() -> CxlBridge {
    bridge_with(48, 48)
}

fn bridge_stats(b: &CxlBridge) -> BridgeStats {
    let mut stats = SimStats::default();
    b.report(&mut stats);
    stats.bridge.unwrap()
}

fn answer(mut pkt: Packet) -> Packet {
    pkt.make_response(vec![0; pkt.size]);
    pkt
}

// ══════════════════════════════════════════════════════════
// 1. Forwarding and tagging
// ══════════════════════════════════════════════════════════

#[test]
fn expander_request_pays_protocol_latency_and_is_tagged() {
    let mut bench = Bench::new(bridge());
    assert_eq!(bench.send(Packet::read(1, CXL.base, 64, 0)), Delivery::Accepted);
    assert_eq!(bench.send(Packet::write(2, CXL.base + 64, vec![1; 64], 0)), Delivery::Accepted);
    bench.run();

    let fwd: Vec<_> = bench.forwarded.iter().map(|(t, p)| (*t, p.id, p.cxl_cmd)).collect();
    assert_eq!(fwd, vec![(64 * NS, 1, Some(CxlCmd::M2SReq)), (64 * NS, 2, Some(CxlCmd::M2SRwD))]);
}

#[test]
fn other_ranges_pass_untagged_with_bridge_latency() {
    let mut bench = Bench::new(bridge());
    let _ = bench.send(Packet::read(1, MMIO.base + 0x100, 8, 0));
    bench.run();
    assert_eq!(bench.forwarded[0].0, 50 * NS);
    assert_eq!(bench.forwarded[0].1.cxl_cmd, None);
}

#[test]
fn header_delay_is_folded_into_the_ready_tick() {
    let mut bench = Bench::new(bridge());
    let mut pkt = Packet::read(1, CXL.base, 64, 0);
    pkt.header_delay = 3_000;
    let _ = bench.send(pkt);
    bench.run();
    assert_eq!(bench.forwarded[0].0, 67_000);
    assert_eq!(bench.forwarded[0].1.header_delay, 0);
}

#[test]
fn unclaimed_address_is_unroutable() {
    let mut bench = Bench::new(bridge());
    assert!(matches!(bench.send(Packet::read(1, 0x1000, 64, 0)), Delivery::Unroutable(_)));
    assert!(matches!(bench.send(Packet::read(2, CXL.end() - 32, 64, 0)), Delivery::Unroutable(_)));
    assert_eq!(bridge_stats(&bench.dut).requests, 0);
}

#[test]
fn responses_return_after_the_same_delay() {
    let mut bench = Bench::new(bridge());
    let _ = bench.send(Packet::read(1, CXL.base, 64, 0));
    bench.run();
    let (_, pkt) = bench.forwarded.pop().unwrap();
    assert_eq!(bench.respond(answer(pkt)), Delivery::Accepted);
    let sent_at = bench.now;
    bench.run();

    assert_eq!(bench.responses.len(), 1);
    assert_eq!(bench.responses[0].0, sent_at + 64 * NS);
    assert_eq!(bench.dut.outstanding_responses(), 0);
}

// ══════════════════════════════════════════════════════════
// 2. Backpressure
// ══════════════════════════════════════════════════════════

#[test]
fn requests_are_refused_when_no_response_slot_is_free() {
    let mut bench = Bench::new(bridge_with(8, 2));
    let _ = bench.send(Packet::read(1, CXL.base, 64, 0));
    let _ = bench.send(Packet::read(2, CXL.base + 64, 64, 0));
    assert!(matches!(bench.send(Packet::read(3, CXL.base + 128, 64, 0)), Delivery::Busy(_)));
    bench.run();

    // Forwarded requests still hold their slots.
    assert_eq!(bench.dut.req_queue_len(), 0);
    assert!(matches!(bench.send(Packet::read(3, CXL.base + 128, 64, bench.now)), Delivery::Busy(_)));
    assert_eq!(bridge_stats(&bench.dut).resp_queue_full_events, 2);
    assert_eq!(bench.upstream_retries, 0);

    let pkts: Vec<Packet> = bench.forwarded.drain(..).map(|(_, p)| p).collect();
    for p in pkts {
        assert_eq!(bench.respond(answer(p)), Delivery::Accepted);
    }
    bench.run();
    assert_eq!(bench.responses.len(), 2);
    assert_eq!(bench.upstream_retries, 1);
    assert_eq!(bench.send(Packet::read(3, CXL.base + 128, 64, bench.now)), Delivery::Accepted);
}

#[test]
fn full_request_queue_and_downstream_refusal() {
    let mut bench = Bench::new(bridge_with(2, 48));
    bench.refuse_downstream = true;
    let _ = bench.send(Packet::read(1, CXL.base, 64, 0));
    let _ = bench.send(Packet::read(2, CXL.base + 64, 64, 0));
    assert!(matches!(bench.send(Packet::read(3, CXL.base + 128, 64, 0)), Delivery::Busy(_)));
    bench.run();
    assert!(bench.forwarded.is_empty());

    bench.release_downstream();
    bench.run();
    let ids: Vec<u64> = bench.forwarded.iter().map(|(_, p)| p.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(bench.upstream_retries, 1);

    let s = bridge_stats(&bench.dut);
    assert_eq!(s.req_queue_full_events, 1);
    assert_eq!(s.req_retry_counts, 1);
}

#[test]
fn refused_response_waits_for_retry() {
    let mut bench = Bench::new(bridge());
    let _ = bench.send(Packet::read(1, CXL.base, 64, 0));
    bench.run();
    let (_, pkt) = bench.forwarded.pop().unwrap();
    bench.refuse_upstream = true;
    let _ = bench.respond(answer(pkt));
    bench.run();
    assert!(bench.responses.is_empty());
    assert_eq!(bridge_stats(&bench.dut).resp_retry_counts, 1);

    bench.release_upstream();
    bench.run();
    assert_eq!(bench.responses.len(), 1);
}

// ══════════════════════════════════════════════════════════
// 3. Statistics and atomic mode
// ══════════════════════════════════════════════════════════

#[test]
fn response_interval_histogram() {
    let mut bench = Bench::new(bridge());
    for i in 0..2u64 {
        let _ = bench.send(Packet::read(i, CXL.base + i * 64, 64, 0));
    }
    bench.run();
    let mut pkts: Vec<Packet> = bench.forwarded.drain(..).map(|(_, p)| p).collect();
    let second = pkts.pop().unwrap();
    let first = pkts.pop().unwrap();

    let _ = bench.respond(answer(first));
    bench.run_until(bench.now + 100 * NS);
    let _ = bench.respond(answer(second));

    let h = bridge_stats(&bench.dut).io_to_bridge_rsp;
    assert_eq!(h.samples(), 1);
    assert_eq!(h.buckets()[10], 1);
}

#[test]
fn refused_response_is_not_sampled() {
    let mut bench = Bench::new(bridge_with(8, 1));
    bench.refuse_upstream = true;
    let _ = bench.send(Packet::read(1, CXL.base, 64, 0));
    bench.run();
    let (_, pkt) = bench.forwarded.pop().unwrap();
    assert_eq!(bench.respond(answer(pkt)), Delivery::Accepted);
    bench.run_until(bench.now + 100 * NS);

    let mut stray = answer(Packet::read(9, CXL.base + 64, 64, 0));
    stray.header_delay = 2_000;
    match bench.respond(stray) {
        Delivery::Busy(back) => assert_eq!(back.header_delay, 2_000),
        other => panic!("expected Busy, got {other:?}"),
    }

    let s = bridge_stats(&bench.dut);
    assert_eq!(s.responses, 1);
    assert_eq!(s.io_to_bridge_rsp.samples(), 0);
}

#[test]
fn atomic_hops() {
    let mut b = bridge();
    let mut pkt = Packet::write(1, CXL.base, vec![0; 64], 0);
    assert_eq!(b.access_atomic(&mut pkt), AtomicHop::Forward(64 * NS));
    assert_eq!(pkt.cxl_cmd, Some(CxlCmd::M2SRwD));

    let mut mmio = Packet::read(2, MMIO.base, 4, 0);
    assert_eq!(b.access_atomic(&mut mmio), AtomicHop::Forward(50 * NS));

    let mut stray = Packet::read(3, 0x10, 4, 0);
    assert_eq!(b.access_atomic(&mut stray), AtomicHop::Unroutable);
}
