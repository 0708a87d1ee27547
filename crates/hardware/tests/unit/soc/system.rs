//! System Integration Tests.
//!
//! Drives assembled systems through the host port: end-to-end latency in timing
//! and atomic mode, data integrity, host backpressure, routing errors, topology
//! wiring errors, and functional access.

use crate::common::harness::{complete, submit, system};
use cxlsim_core::common::{AccessKind, AddrRange, ConfigError, HostRequest, MIB, SimError};
use cxlsim_core::config::{BridgeConfig, Config, ControllerParams, DeviceParams, MediaProfile, Topology};
use cxlsim_core::soc::devices::CxlMemory;
use cxlsim_core::soc::interconnect::Interconnect;
use cxlsim_core::soc::memmap::RegionKind;
use cxlsim_core::soc::memory::buffer::BackingStore;
use cxlsim_core::soc::memory::controller::MemCtrl;
use cxlsim_core::soc::{Admission, TopologyBuilder};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const DEV: u64 = 0x1_0000_0000;

fn config(topology: Topology) -> Config {
    Config { topology, ..Config::default() }
}

// ══════════════════════════════════════════════════════════
// 1. End-to-end latency
// ══════════════════════════════════════════════════════════

#[test]
fn bridged_read_crosses_every_stage() {
    let mut sys = system(&Config::default());
    let id = submit(&mut sys, HostRequest::read(DEV, 64));
    let c = complete(&mut sys, id);

    // 3 ns request transit, 64 ns bridge, 15 ns device, 31.652 ns media,
    // 20 ns controller, 15 ns device, 64 ns bridge, 6 ns response transit.
    assert_eq!(c.completed, 218_652);
    assert_eq!(c.kind, AccessKind::Read);
    assert_eq!(c.data.len(), 64);
    assert_eq!(c.latency(), 218_652);

    let s = sys.stats();
    assert_eq!(s.host.completed, 1);
    assert_eq!(s.bridge.as_ref().map(|b| b.requests), Some(1));
    assert_eq!(s.device.as_ref().map(|d| d.responses), Some(1));
    assert_eq!(s.controller.as_ref().map(|c| c.read_bursts), Some(1));
    assert_eq!(s.media.len(), 1);
}

#[test]
fn direct_topology_skips_the_bridge() {
    let mut sys = system(&config(Topology::Direct));
    let id = submit(&mut sys, HostRequest::read(DEV, 64));
    assert_eq!(complete(&mut sys, id).completed, 90_652);
    assert!(sys.stats().bridge.is_none());
}

#[test]
fn controller_topology_has_no_front_end() {
    let mut sys = system(&config(Topology::Controller));
    let id = submit(&mut sys, HostRequest::read(DEV, 64));
    assert_eq!(complete(&mut sys, id).completed, 60_652);
    let s = sys.stats();
    assert!(s.bridge.is_none());
    assert!(s.device.is_none());
}

#[test]
fn disabled_bridge_behaves_like_direct() {
    let cfg = Config { bridge: BridgeConfig { enabled: false, ..Default::default() }, ..Config::default() };
    let mut sys = system(&cfg);
    assert!(sys.config().bridge.is_none());
    let id = submit(&mut sys, HostRequest::read(DEV, 64));
    assert_eq!(complete(&mut sys, id).completed, 90_652);
}

#[test]
fn system_memory_has_fixed_latency() {
    let mut sys = system(&Config::default());
    let r = submit(&mut sys, HostRequest::read(0x1000, 64));
    assert_eq!(complete(&mut sys, r).completed, 39_000);
}

#[test]
fn atomic_read_sums_fixed_latencies() {
    let mut sys = system(&Config::default());
    let c = sys.access_atomic(HostRequest::read(DEV, 64)).unwrap();
    assert_eq!(c.completed, 151_320);
    assert!(sys.is_idle());
    assert_eq!(sys.stats().controller.map(|c| c.read_bursts), Some(0));
}

#[test]
fn nvm_media_is_slower_than_dram() {
    let dram = {
        let mut sys = system(&config(Topology::Direct));
        let id = submit(&mut sys, HostRequest::read(DEV, 64));
        complete(&mut sys, id).latency()
    };
    let mut cfg = config(Topology::Direct);
    cfg.media.profile = MediaProfile::Nvm_2400_1x64;
    let mut sys = system(&cfg);
    let id = submit(&mut sys, HostRequest::read(DEV, 64));
    assert!(complete(&mut sys, id).latency() > dram);
}

// ══════════════════════════════════════════════════════════
// 2. Data integrity
// ══════════════════════════════════════════════════════════

#[test]
fn read_returns_the_last_write() {
    let mut sys = system(&Config::default());
    let w = submit(&mut sys, HostRequest::write(DEV + 0x1000, vec![0x5A; 64]));
    let r = submit(&mut sys, HostRequest::read(DEV + 0x1000, 64));
    sys.run_until_idle().unwrap();
    let done = sys.take_completions();

    let write = done.iter().find(|c| c.id == w).unwrap();
    let read = done.iter().find(|c| c.id == r).unwrap();
    assert!(write.data.is_empty());
    assert_eq!(read.data, vec![0x5A; 64]);
    assert_eq!(sys.read_functional(DEV + 0x1000, 64).unwrap(), vec![0x5A; 64]);
}

#[test]
fn interleaved_traffic_keeps_every_value() {
    let mut sys = system(&Config::default());
    let addr = |i: u64| DEV + (i * 0x2_0040) % (64 * MIB);
    for i in 0..128u64 {
        let _ = submit(&mut sys, HostRequest::write(addr(i), vec![i as u8; 64]));
    }
    let reads: Vec<_> = (0..128u64).map(|i| (i, submit(&mut sys, HostRequest::read(addr(i), 64)))).collect();
    sys.run_until_idle().unwrap();
    let done = sys.take_completions();

    assert_eq!(done.len(), 256);
    for (i, id) in reads {
        let c = done.iter().find(|c| c.id == id).unwrap();
        assert_eq!(c.data, vec![i as u8; 64], "read {i}");
    }
    assert!(done.windows(2).all(|w| w[0].completed <= w[1].completed));
}

#[test]
fn loaded_bytes_are_visible_to_timed_reads() {
    let mut sys = system(&Config::default());
    sys.load_binary_at(b"expander", DEV + 0x40).unwrap();
    sys.load_binary_at(b"low-ram", 0x2000).unwrap();
    assert_eq!(sys.read_functional(0x2000, 7).unwrap(), b"low-ram".to_vec());

    let id = submit(&mut sys, HostRequest::read(DEV + 0x40, 8));
    assert_eq!(complete(&mut sys, id).data, b"expander".to_vec());
    assert!(sys.read_functional(0x1FFF_FFFC, 8).is_err());
}

// ══════════════════════════════════════════════════════════
// 3. Host port
// ══════════════════════════════════════════════════════════

#[test]
fn refused_request_leaves_no_trace() {
    let mut sys = system(&Config::default());
    for i in 0..48u64 {
        assert_eq!(sys.send_request(HostRequest::read(DEV + i * 64, 64)).unwrap(), Admission::Accepted(i));
    }
    let req = HostRequest::read(DEV + 48 * 64, 64);
    assert_eq!(sys.send_request(req.clone()).unwrap(), Admission::Retry(req.clone()));
    assert_eq!(sys.stats().host.issued, 48);
    assert_eq!(sys.stats().host.retried, 1);
    assert!(!sys.take_retry());

    assert_eq!(submit(&mut sys, req), 48);
    sys.run_until_idle().unwrap();
    assert_eq!(sys.take_completions().len(), 49);
    // Refused once here and once more by `submit` before the slot freed.
    assert_eq!(sys.stats().bridge.map(|b| b.resp_queue_full_events), Some(2));
}

#[test]
fn poll_returns_completions_in_order() {
    let mut sys = system(&Config::default());
    let a = submit(&mut sys, HostRequest::read(0x1000, 64));
    let b = submit(&mut sys, HostRequest::read(DEV, 64));

    let first = sys.poll_completions().unwrap();
    assert_eq!(first.iter().map(|c| c.id).collect::<Vec<_>>(), vec![a]);
    assert_eq!(sys.now(), 39_000);
    let second = sys.poll_completions().unwrap();
    assert_eq!(second.iter().map(|c| c.id).collect::<Vec<_>>(), vec![b]);
    assert!(sys.poll_completions().unwrap().is_empty());
}

#[test]
fn unmapped_address_is_a_routing_error() {
    let mut sys = system(&Config::default());
    let err = sys.send_request(HostRequest::read(0x8000_0000, 64)).unwrap_err();
    assert!(matches!(err, SimError::Routing { addr: 0x8000_0000, ref component } if component == "interconnect"));
    assert!(sys.access_atomic(HostRequest::read(DEV - 32, 64)).is_err());
}

#[test]
fn expander_access_wider_than_the_controller_queues_is_rejected() {
    let mut sys = system(&Config::default());
    let err = sys.send_request(HostRequest::read(DEV, 8192)).unwrap_err();
    assert!(matches!(err, SimError::RequestTooLarge { addr: DEV, size: 8192, limit: 4096 }));
    // Unaligned 4 KiB straddles 65 bursts.
    assert!(matches!(
        sys.access_atomic(HostRequest::read(DEV + 32, 4096)),
        Err(SimError::RequestTooLarge { .. })
    ));
    assert_eq!(sys.stats().host.issued, 0);

    let id = submit(&mut sys, HostRequest::read(DEV, 4096));
    let c = complete(&mut sys, id);
    assert!(c.latency() > 0);
}

// ══════════════════════════════════════════════════════════
// 4. Configuration and wiring
// ══════════════════════════════════════════════════════════

#[test]
fn memory_map_lists_the_expander_as_ram() {
    let sys = system(&Config::default());
    let map = sys.memory_map();
    assert_eq!(map.len(), 5);
    let last = map.last().unwrap();
    assert_eq!(last.range, AddrRange::new(DEV, 2 * 1024 * MIB));
    assert_eq!(last.kind, RegionKind::Ram);
    assert_eq!(last.kind.e820_type(), 1);
}

#[test]
fn overlapping_device_range_is_rejected() {
    let cfg = Config { device: DeviceParams { base: 0x1000_0000, size: 256 * MIB, ..Default::default() }, ..Config::default() };
    let err = cxlsim_core::System::new(&cfg).unwrap_err();
    assert!(matches!(err, SimError::Config(ConfigError::OverlappingRanges { .. })));
}

#[test]
fn bad_threshold_fails_before_time_advances() {
    let mut cfg = Config::default();
    cfg.controller = ControllerParams { write_low_threshold_perc: 90, ..Default::default() };
    let err = cxlsim_core::System::new(&cfg).unwrap_err();
    assert!(matches!(err, SimError::Config(ConfigError::Threshold { .. })));
}

fn small_ctrl() -> MemCtrl {
    let media = MediaProfile::Ddr4_2400_16x4.baseline();
    let cfg = cxlsim_core::config::ControllerConfig::resolve(&ControllerParams::default(), &media).unwrap();
    let store = Arc::new(BackingStore::new(MIB).unwrap());
    MemCtrl::from_config("mem-ctrl", AddrRange::new(DEV, MIB), &cfg, &media, store).unwrap()
}

fn small_device() -> CxlMemory {
    let params = DeviceParams { size: MIB, ..Default::default() };
    let store = Arc::new(BackingStore::new(MIB).unwrap());
    CxlMemory::new("cxl-device", cxlsim_core::config::DeviceConfig::resolve(&params), store)
}

#[test]
fn ports_connect_once() {
    let mut b = TopologyBuilder::new(Interconnect::new(16, 2_000, 1_000));
    let ctrl = b.add(Box::new(small_ctrl()));
    let dev = b.add(Box::new(small_device()));
    let other = b.add(Box::new(small_device()));
    b.connect(dev, ctrl).unwrap();

    let again = b.connect(dev, ctrl).unwrap_err();
    assert!(matches!(again, SimError::Config(ConfigError::AlreadyConnected { port: "request", .. })));
    let taken = b.connect(other, ctrl).unwrap_err();
    assert!(matches!(taken, SimError::Config(ConfigError::AlreadyConnected { port: "response", .. })));
    assert!(matches!(b.connect(dev, cxlsim_core::soc::traits::ComponentId(9)), Err(SimError::UnknownComponent(9))));
}

#[test]
fn unconnected_request_port_fails_the_build() {
    let mut b = TopologyBuilder::new(Interconnect::new(16, 2_000, 1_000));
    let dev = b.add(Box::new(small_device()));
    b.attach_to_host(dev, &[AddrRange::new(DEV, MIB)]).unwrap();
    let err = b.build().unwrap_err();
    assert!(matches!(err, ConfigError::MissingConnection { ref component } if component == "cxl-device"));
}

#[test]
fn host_routes_must_not_overlap() {
    let mut b = TopologyBuilder::new(Interconnect::new(16, 2_000, 1_000));
    let ctrl = b.add(Box::new(small_ctrl()));
    let dev = b.add(Box::new(small_device()));
    b.attach_to_host(ctrl, &[AddrRange::new(DEV, MIB)]).unwrap();
    let err = b.attach_to_host(dev, &[AddrRange::new(DEV + 0x1000, MIB)]).unwrap_err();
    assert!(matches!(err, SimError::Config(ConfigError::OverlappingRanges { .. })));
}
