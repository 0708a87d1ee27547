//! Statistics Unit Tests.

use crate::common::harness::{complete, submit, system};
use cxlsim_core::common::HostRequest;
use cxlsim_core::config::{Config, Topology};
use cxlsim_core::stats::{Histogram, HostStats, MediaStats};

#[test]
fn histogram_counts_underflow_and_overflow_separately() {
    let mut h = Histogram::new(10, 49, 10);
    assert_eq!(h.buckets().len(), 4);
    for v in [5, 10, 19, 45, 50, 400] {
        h.sample(v);
    }
    assert_eq!(h.buckets(), &[2, 0, 0, 1]);
    assert_eq!(h.overflows(), 2);
    assert_eq!(h.samples(), 6);
    assert!((h.mean() - 88.166_666).abs() < 1e-3);
}

#[test]
fn empty_rates_are_zero() {
    assert!(Histogram::new(0, 9, 1).mean().abs() < f64::EPSILON);
    assert!(HostStats::default().avg_latency().abs() < f64::EPSILON);
    assert!(MediaStats::default().row_hit_rate().abs() < f64::EPSILON);
}

#[test]
fn snapshot_serializes_per_stage() {
    let mut sys = system(&Config { topology: Topology::Direct, ..Config::default() });
    let id = submit(&mut sys, HostRequest::read(0x1_0000_0000, 64));
    let c = complete(&mut sys, id);

    let stats = sys.stats();
    assert!(stats.sim_ticks >= c.completed);
    assert!((stats.host.avg_latency() - c.latency() as f64).abs() < f64::EPSILON);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["host"]["completed"], 1);
    assert!(json["bridge"].is_null());
    assert_eq!(json["device"]["requests"], 1);
    assert_eq!(json["controller"]["read_bursts"], 1);
    assert_eq!(json["media"][0]["activations"], 1);
    assert_eq!(json["memory"]["reads"], 0);
}
