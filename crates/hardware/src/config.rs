//! Configuration system for the expander model.
//!
//! This module defines every configuration structure used to build a system. It provides:
//! 1. **Defaults:** Baseline constants for system memory, the bridge, the device and the controller.
//! 2. **Profiles:** Built-in media (`DDR4_2400_16x4`, `DDR4_2400_8x8`, `DDR4_2400_4x16`,
//!    `NVM_2400_1x64`) and device (`Asic`, `Fpga`) parameter sets.
//! 3. **Overrides:** Every profile field can be overridden; a profile plus its overrides is
//!    resolved once into an immutable struct (`MediaConfig::resolve`, `DeviceConfig::resolve`).
//! 4. **Validation:** `Config::resolve` checks ranges, capacities and thresholds before any
//!    simulated time advances.
//!
//! Configuration is supplied as JSON (`Config::from_json`, `Config::from_file`) or built
//! with `Config::default()`. All latencies are in ticks (picoseconds).

use crate::common::{AddrRange, ConfigError, GIB, KIB, MIB, NS, Tick};
use crate::soc::memory::mapping::{AddressMapping, MediaGeometry};
use crate::soc::memory::media::{DramTiming, NvmTiming};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Default configuration constants.
mod defaults {
    use super::{GIB, MIB, NS, Tick};

    /// Base of ordinary system memory.
    pub const MEMORY_BASE: u64 = 0;

    /// Size of ordinary system memory (512 MiB).
    pub const MEMORY_SIZE: u64 = 512 * MIB;

    /// Fixed access latency of ordinary system memory.
    pub const MEMORY_LATENCY: Tick = 30 * NS;

    /// Host interconnect width in bytes per transfer.
    pub const BUS_WIDTH: u64 = 16;

    /// Host interconnect fixed latency per packet.
    pub const BUS_LATENCY: Tick = 2 * NS;

    /// Host interconnect clock period.
    pub const BUS_CLOCK: Tick = NS;

    /// Start of the PCI I/O hole; system memory must end below it.
    pub const IO_HOLE_BASE: u64 = 0xC000_0000;

    /// Size of the PCI I/O window reserved at the hole.
    pub const IO_HOLE_SIZE: u64 = 0x10_0000;

    /// Bridge forwarding latency.
    pub const BRIDGE_LAT: Tick = 50 * NS;

    /// Bridge protocol processing latency inside the expander range.
    pub const BRIDGE_PROTO_LAT: Tick = 14 * NS;

    /// Bridge request queue depth.
    pub const REQ_FIFO_DEPTH: usize = 48;

    /// Bridge response queue depth.
    pub const RESP_FIFO_DEPTH: usize = 48;

    /// Base of the expander range.
    pub const DEVICE_BASE: u64 = 0x1_0000_0000;

    /// Size of the expander range (2 GiB).
    pub const DEVICE_SIZE: u64 = 2 * GIB;

    /// Controller frontend pipeline latency.
    pub const FRONTEND_LATENCY: Tick = 10 * NS;

    /// Controller backend pipeline latency.
    pub const BACKEND_LATENCY: Tick = 10 * NS;

    /// Write queue occupancy (percent) that forces a switch to writes.
    pub const WRITE_HIGH_THRESHOLD_PERC: u32 = 85;

    /// Write queue occupancy (percent) below which writes yield to waiting reads.
    pub const WRITE_LOW_THRESHOLD_PERC: u32 = 50;

    /// Minimum writes served before turning back to reads.
    pub const MIN_WRITES_PER_SWITCH: u32 = 16;

    /// Minimum reads served before a forced switch to writes.
    pub const MIN_READS_PER_SWITCH: u32 = 16;

    /// Scheduling rounds after which a queued burst is promoted over row hits.
    pub const STARVATION_THRESHOLD: u32 = 16;

    /// Idle time after which a DRAM rank enters power-down.
    pub const POWERDOWN_IDLE: Tick = 1_000 * NS;
}

/// Topology assembled by [`System::new`](crate::soc::System::new).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum Topology {
    /// Host, bridge, device, controller, media.
    #[default]
    Bridged,
    /// Host, device, controller, media.
    Direct,
    /// Host, controller, media; the expander range is served by the controller alone.
    #[serde(alias = "ControllerOnly")]
    Controller,
}

/// Built-in media parameter sets.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum MediaProfile {
    /// DDR4-2400, x4 devices, 16 per rank, 2 ranks.
    #[default]
    #[serde(rename = "DDR4_2400_16x4", alias = "Ddr4_2400_16x4")]
    Ddr4_2400_16x4,
    /// DDR4-2400, x8 devices, 8 per rank, 2 ranks.
    #[serde(rename = "DDR4_2400_8x8", alias = "Ddr4_2400_8x8")]
    Ddr4_2400_8x8,
    /// DDR4-2400, x16 devices, 4 per rank, 1 rank, 2 bank groups.
    #[serde(rename = "DDR4_2400_4x16", alias = "Ddr4_2400_4x16")]
    Ddr4_2400_4x16,
    /// NVM-2400, one x64 device.
    #[serde(rename = "NVM_2400_1x64", alias = "Nvm_2400_1x64")]
    Nvm_2400_1x64,
}

impl MediaProfile {
    /// All built-in profiles.
    pub const ALL: [Self; 4] = [Self::Ddr4_2400_16x4, Self::Ddr4_2400_8x8, Self::Ddr4_2400_4x16, Self::Nvm_2400_1x64];

    /// Returns the profile's canonical name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ddr4_2400_16x4 => "DDR4_2400_16x4",
            Self::Ddr4_2400_8x8 => "DDR4_2400_8x8",
            Self::Ddr4_2400_4x16 => "DDR4_2400_4x16",
            Self::Nvm_2400_1x64 => "NVM_2400_1x64",
        }
    }

    /// Returns the profile's parameters before overrides.
    pub fn baseline(self) -> MediaConfig {
        match self {
            Self::Ddr4_2400_16x4 => ddr4_2400_16x4(),
            Self::Ddr4_2400_8x8 => {
                let mut cfg = ddr4_2400_16x4();
                cfg.geometry.device_bus_width = 8;
                cfg.geometry.device_rowbuffer_size = KIB;
                cfg.geometry.devices_per_rank = 8;
                if let MediaTiming::Dram(t) = &mut cfg.timing {
                    t.t_xaw = 21 * NS;
                }
                cfg
            }
            Self::Ddr4_2400_4x16 => {
                let mut cfg = ddr4_2400_16x4();
                cfg.geometry.device_bus_width = 16;
                cfg.geometry.device_rowbuffer_size = 2 * KIB;
                cfg.geometry.devices_per_rank = 4;
                cfg.geometry.ranks_per_channel = 1;
                cfg.geometry.bank_groups_per_rank = 2;
                cfg.geometry.banks_per_rank = 8;
                if let MediaTiming::Dram(t) = &mut cfg.timing {
                    t.t_rrd = 5_300;
                    t.t_rrd_l = 6_400;
                    t.t_xaw = 30 * NS;
                }
                cfg
            }
            Self::Nvm_2400_1x64 => MediaConfig {
                geometry: MediaGeometry {
                    device_size: 512 * GIB,
                    device_bus_width: 64,
                    burst_length: 8,
                    device_rowbuffer_size: 256,
                    devices_per_rank: 1,
                    ranks_per_channel: 1,
                    banks_per_rank: 16,
                    bank_groups_per_rank: 1,
                    channels: 1,
                },
                timing: MediaTiming::Nvm(NvmTiming {
                    t_read: 150 * NS,
                    t_write: 500 * NS,
                    t_send: 14_160,
                    t_burst: 3_332,
                    t_wtr: 1_666,
                    t_rtw: 1_666,
                    t_cs: 1_666,
                }),
                read_buffer_size: 64,
                write_buffer_size: 128,
                max_pending_reads: 64,
                max_pending_writes: 128,
            },
        }
    }
}

/// DDR4-2400 16x4: the base every DDR4 profile is layered on.
fn ddr4_2400_16x4() -> MediaConfig {
    MediaConfig {
        geometry: MediaGeometry {
            device_size: GIB,
            device_bus_width: 4,
            burst_length: 8,
            device_rowbuffer_size: 512,
            devices_per_rank: 16,
            ranks_per_channel: 2,
            banks_per_rank: 16,
            bank_groups_per_rank: 4,
            channels: 1,
        },
        timing: MediaTiming::Dram(DramTiming {
            t_ck: 833,
            t_burst: 3_332,
            t_ccd_l: 5_000,
            t_rcd: 14_160,
            t_cl: 14_160,
            t_rp: 14_160,
            t_ras: 32_000,
            t_rrd: 3_332,
            t_rrd_l: 4_900,
            t_xaw: 13_328,
            activation_limit: 4,
            t_rfc: 350 * NS,
            t_refi: 7_800 * NS,
            t_wr: 15 * NS,
            t_wtr: 5 * NS,
            t_rtp: 7_500,
            t_rtw: 1_666,
            t_cs: 1_666,
            t_xp: 6 * NS,
            powerdown_idle: defaults::POWERDOWN_IDLE,
        }),
        read_buffer_size: 64,
        write_buffer_size: 128,
        max_pending_reads: 64,
        max_pending_writes: 128,
    }
}

/// Built-in front-end device parameter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum DeviceProfile {
    /// ASIC front-end: 15 ns protocol latency, 48-entry buffers.
    #[default]
    #[serde(alias = "ASIC")]
    Asic,
    /// FPGA front-end: 60 ns protocol latency, 36-entry buffers.
    #[serde(alias = "FPGA")]
    Fpga,
}

impl DeviceProfile {
    /// All built-in profiles.
    pub const ALL: [Self; 2] = [Self::Asic, Self::Fpga];

    /// Returns `(proto_proc_lat, req_size, rsp_size)` for the profile.
    pub const fn parameters(self) -> (Tick, usize, usize) {
        match self {
            Self::Asic => (15 * NS, 48, 48),
            Self::Fpga => (60 * NS, 36, 36),
        }
    }
}

/// Ordinary system memory and host interconnect.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SystemConfig {
    /// Base of ordinary system memory.
    #[serde(default = "SystemConfig::default_memory_base")]
    pub memory_base: u64,

    /// Size of ordinary system memory.
    #[serde(default = "SystemConfig::default_memory_size")]
    pub memory_size: u64,

    /// Fixed access latency of ordinary system memory.
    #[serde(default = "SystemConfig::default_memory_latency")]
    pub memory_latency: Tick,

    /// Interconnect width in bytes per transfer.
    #[serde(default = "SystemConfig::default_bus_width")]
    pub bus_width: u64,

    /// Interconnect fixed latency per packet.
    #[serde(default = "SystemConfig::default_bus_latency")]
    pub bus_latency: Tick,

    /// Interconnect clock period.
    #[serde(default = "SystemConfig::default_bus_clock")]
    pub bus_clock: Tick,
}

impl SystemConfig {
    fn default_memory_base() -> u64 {
        defaults::MEMORY_BASE
    }

    fn default_memory_size() -> u64 {
        defaults::MEMORY_SIZE
    }

    fn default_memory_latency() -> Tick {
        defaults::MEMORY_LATENCY
    }

    fn default_bus_width() -> u64 {
        defaults::BUS_WIDTH
    }

    fn default_bus_latency() -> Tick {
        defaults::BUS_LATENCY
    }

    fn default_bus_clock() -> Tick {
        defaults::BUS_CLOCK
    }

    /// Range of ordinary system memory.
    pub const fn memory_range(&self) -> AddrRange {
        AddrRange::new(self.memory_base, self.memory_size)
    }

    /// Ranges that must stay free of memory: the PCI I/O window and the BIOS window.
    pub const fn reserved_ranges() -> [(AddrRange, &'static str); 2] {
        [
            (AddrRange::new(defaults::IO_HOLE_BASE, defaults::IO_HOLE_SIZE), "pci-io"),
            (AddrRange::new(0xFFFF_0000, 0x1_0000), "bios"),
        ]
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            memory_base: defaults::MEMORY_BASE,
            memory_size: defaults::MEMORY_SIZE,
            memory_latency: defaults::MEMORY_LATENCY,
            bus_width: defaults::BUS_WIDTH,
            bus_latency: defaults::BUS_LATENCY,
            bus_clock: defaults::BUS_CLOCK,
        }
    }
}

/// Protocol bridge parameters.
///
/// The legacy names `delay`, `req_size` and `resp_size` are accepted on load.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Whether a bridge sits in front of the device in the `Bridged` topology.
    #[serde(default = "BridgeConfig::default_enabled")]
    pub enabled: bool,

    /// Forwarding latency in each direction.
    #[serde(default = "BridgeConfig::default_bridge_lat", alias = "delay")]
    pub bridge_lat: Tick,

    /// Extra protocol processing latency for packets inside the expander range.
    #[serde(default = "BridgeConfig::default_proto_proc_lat")]
    pub proto_proc_lat: Tick,

    /// Request queue depth.
    #[serde(default = "BridgeConfig::default_req_fifo_depth", alias = "req_size")]
    pub req_fifo_depth: usize,

    /// Response queue depth; also the number of responses that can be reserved.
    #[serde(default = "BridgeConfig::default_resp_fifo_depth", alias = "resp_size")]
    pub resp_fifo_depth: usize,

    /// Address filter; empty means the expander range alone.
    #[serde(default)]
    pub ranges: Vec<AddrRange>,
}

impl BridgeConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_bridge_lat() -> Tick {
        defaults::BRIDGE_LAT
    }

    fn default_proto_proc_lat() -> Tick {
        defaults::BRIDGE_PROTO_LAT
    }

    fn default_req_fifo_depth() -> usize {
        defaults::REQ_FIFO_DEPTH
    }

    fn default_resp_fifo_depth() -> usize {
        defaults::RESP_FIFO_DEPTH
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bridge_lat: defaults::BRIDGE_LAT,
            proto_proc_lat: defaults::BRIDGE_PROTO_LAT,
            req_fifo_depth: defaults::REQ_FIFO_DEPTH,
            resp_fifo_depth: defaults::RESP_FIFO_DEPTH,
            ranges: Vec::new(),
        }
    }
}

/// PCI configuration-space identity of the front-end device.
///
/// Static metadata; nothing in the model reads it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PciIdentity {
    /// Vendor identifier.
    #[serde(default = "PciIdentity::default_vendor_id")]
    pub vendor_id: u16,
    /// Device identifier.
    #[serde(default = "PciIdentity::default_device_id")]
    pub device_id: u16,
    /// Class code (memory controller).
    #[serde(default = "PciIdentity::default_class_code")]
    pub class_code: u8,
    /// Legacy interrupt line.
    #[serde(default = "PciIdentity::default_interrupt_line")]
    pub interrupt_line: u8,
    /// Legacy interrupt pin.
    #[serde(default = "PciIdentity::default_interrupt_pin")]
    pub interrupt_pin: u8,
    /// Size of BAR0.
    #[serde(default = "PciIdentity::default_bar0_size")]
    pub bar0_size: u64,
}

impl PciIdentity {
    const fn default_vendor_id() -> u16 {
        0x8086
    }

    const fn default_device_id() -> u16 {
        0x7890
    }

    const fn default_class_code() -> u8 {
        0x05
    }

    const fn default_interrupt_line() -> u8 {
        0x1f
    }

    const fn default_interrupt_pin() -> u8 {
        0x01
    }

    const fn default_bar0_size() -> u64 {
        defaults::DEVICE_SIZE
    }
}

impl Default for PciIdentity {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            device_id: Self::default_device_id(),
            class_code: Self::default_class_code(),
            interrupt_line: Self::default_interrupt_line(),
            interrupt_pin: Self::default_interrupt_pin(),
            bar0_size: Self::default_bar0_size(),
        }
    }
}

/// Front-end device section: a profile plus optional overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceParams {
    /// Base profile.
    #[serde(default)]
    pub profile: DeviceProfile,
    /// Protocol processing latency override.
    #[serde(default)]
    pub proto_proc_lat: Option<Tick>,
    /// Request buffer depth override.
    #[serde(default)]
    pub req_size: Option<usize>,
    /// Response buffer depth override.
    #[serde(default)]
    pub rsp_size: Option<usize>,
    /// Base of the expander range.
    #[serde(default = "DeviceParams::default_base")]
    pub base: u64,
    /// Size of the expander range.
    #[serde(default = "DeviceParams::default_size")]
    pub size: u64,
    /// PCI identity.
    #[serde(default)]
    pub pci: PciIdentity,
}

impl DeviceParams {
    fn default_base() -> u64 {
        defaults::DEVICE_BASE
    }

    fn default_size() -> u64 {
        defaults::DEVICE_SIZE
    }
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            profile: DeviceProfile::default(),
            proto_proc_lat: None,
            req_size: None,
            rsp_size: None,
            base: defaults::DEVICE_BASE,
            size: defaults::DEVICE_SIZE,
            pci: PciIdentity::default(),
        }
    }
}

/// Resolved front-end device parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceConfig {
    /// Protocol processing latency, applied once per direction.
    pub proto_proc_lat: Tick,
    /// Request buffer depth.
    pub req_size: usize,
    /// Response buffer depth.
    pub rsp_size: usize,
    /// Expander range registered as system memory.
    pub range: AddrRange,
    /// PCI identity.
    pub pci: PciIdentity,
}

impl DeviceConfig {
    /// Applies the overrides in `params` to its profile.
    pub fn resolve(params: &DeviceParams) -> Self {
        let (lat, req, rsp) = params.profile.parameters();
        Self {
            proto_proc_lat: params.proto_proc_lat.unwrap_or(lat),
            req_size: params.req_size.unwrap_or(req),
            rsp_size: params.rsp_size.unwrap_or(rsp),
            range: AddrRange::new(params.base, params.size),
            pci: params.pci,
        }
    }
}

/// Media timing of either technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaTiming {
    /// DRAM timing.
    Dram(DramTiming),
    /// NVM timing.
    Nvm(NvmTiming),
}

/// Geometry overrides; `None` keeps the profile value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GeometryOverrides {
    /// Device capacity in bytes.
    pub device_size: Option<u64>,
    /// Data pins per device.
    pub device_bus_width: Option<u64>,
    /// Beats per burst.
    pub burst_length: Option<u64>,
    /// Device row buffer size.
    pub device_rowbuffer_size: Option<u64>,
    /// Devices per rank.
    pub devices_per_rank: Option<u64>,
    /// Ranks per channel.
    pub ranks_per_channel: Option<u64>,
    /// Banks per rank.
    pub banks_per_rank: Option<u64>,
    /// Bank groups per rank.
    pub bank_groups_per_rank: Option<u64>,
    /// Channels behind the controller.
    pub channels: Option<u64>,
}

impl GeometryOverrides {
    fn apply(&self, base: MediaGeometry) -> MediaGeometry {
        MediaGeometry {
            device_size: self.device_size.unwrap_or(base.device_size),
            device_bus_width: self.device_bus_width.unwrap_or(base.device_bus_width),
            burst_length: self.burst_length.unwrap_or(base.burst_length),
            device_rowbuffer_size: self.device_rowbuffer_size.unwrap_or(base.device_rowbuffer_size),
            devices_per_rank: self.devices_per_rank.unwrap_or(base.devices_per_rank),
            ranks_per_channel: self.ranks_per_channel.unwrap_or(base.ranks_per_channel),
            banks_per_rank: self.banks_per_rank.unwrap_or(base.banks_per_rank),
            bank_groups_per_rank: self.bank_groups_per_rank.unwrap_or(base.bank_groups_per_rank),
            channels: self.channels.unwrap_or(base.channels),
        }
    }
}

/// Timing overrides; fields that do not apply to the profile's technology are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingOverrides {
    /// Clock period.
    pub t_ck: Option<Tick>,
    /// Burst duration.
    pub t_burst: Option<Tick>,
    /// Same bank group column spacing.
    pub t_ccd_l: Option<Tick>,
    /// Activate to column.
    pub t_rcd: Option<Tick>,
    /// CAS latency.
    pub t_cl: Option<Tick>,
    /// Precharge.
    pub t_rp: Option<Tick>,
    /// Activate to precharge.
    pub t_ras: Option<Tick>,
    /// Activate to activate, other bank group.
    pub t_rrd: Option<Tick>,
    /// Activate to activate, same bank group.
    pub t_rrd_l: Option<Tick>,
    /// Activation window.
    pub t_xaw: Option<Tick>,
    /// Activates per window.
    pub activation_limit: Option<u32>,
    /// Refresh cycle time.
    pub t_rfc: Option<Tick>,
    /// Refresh interval.
    pub t_refi: Option<Tick>,
    /// Write recovery.
    pub t_wr: Option<Tick>,
    /// Write to read turnaround.
    pub t_wtr: Option<Tick>,
    /// Read to precharge.
    pub t_rtp: Option<Tick>,
    /// Read to write turnaround.
    pub t_rtw: Option<Tick>,
    /// Rank switch.
    pub t_cs: Option<Tick>,
    /// Power-down exit.
    pub t_xp: Option<Tick>,
    /// Power-down entry idle time.
    pub powerdown_idle: Option<Tick>,
    /// NVM array read.
    pub t_read: Option<Tick>,
    /// NVM array write.
    pub t_write: Option<Tick>,
    /// NVM buffer transfer.
    pub t_send: Option<Tick>,
}

impl TimingOverrides {
    fn apply(&self, base: MediaTiming) -> MediaTiming {
        match base {
            MediaTiming::Dram(t) => MediaTiming::Dram(DramTiming {
                t_ck: self.t_ck.unwrap_or(t.t_ck),
                t_burst: self.t_burst.unwrap_or(t.t_burst),
                t_ccd_l: self.t_ccd_l.unwrap_or(t.t_ccd_l),
                t_rcd: self.t_rcd.unwrap_or(t.t_rcd),
                t_cl: self.t_cl.unwrap_or(t.t_cl),
                t_rp: self.t_rp.unwrap_or(t.t_rp),
                t_ras: self.t_ras.unwrap_or(t.t_ras),
                t_rrd: self.t_rrd.unwrap_or(t.t_rrd),
                t_rrd_l: self.t_rrd_l.unwrap_or(t.t_rrd_l),
                t_xaw: self.t_xaw.unwrap_or(t.t_xaw),
                activation_limit: self.activation_limit.unwrap_or(t.activation_limit),
                t_rfc: self.t_rfc.unwrap_or(t.t_rfc),
                t_refi: self.t_refi.unwrap_or(t.t_refi),
                t_wr: self.t_wr.unwrap_or(t.t_wr),
                t_wtr: self.t_wtr.unwrap_or(t.t_wtr),
                t_rtp: self.t_rtp.unwrap_or(t.t_rtp),
                t_rtw: self.t_rtw.unwrap_or(t.t_rtw),
                t_cs: self.t_cs.unwrap_or(t.t_cs),
                t_xp: self.t_xp.unwrap_or(t.t_xp),
                powerdown_idle: self.powerdown_idle.unwrap_or(t.powerdown_idle),
            }),
            MediaTiming::Nvm(t) => MediaTiming::Nvm(NvmTiming {
                t_read: self.t_read.unwrap_or(t.t_read),
                t_write: self.t_write.unwrap_or(t.t_write),
                t_send: self.t_send.unwrap_or(t.t_send),
                t_burst: self.t_burst.unwrap_or(t.t_burst),
                t_wtr: self.t_wtr.unwrap_or(t.t_wtr),
                t_rtw: self.t_rtw.unwrap_or(t.t_rtw),
                t_cs: self.t_cs.unwrap_or(t.t_cs),
            }),
        }
    }
}

/// Media section: a profile plus optional overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MediaParams {
    /// Base profile.
    pub profile: MediaProfile,
    /// Geometry overrides.
    pub geometry: GeometryOverrides,
    /// Timing overrides.
    pub timing: TimingOverrides,
}

/// Resolved media parameters, including the controller buffer sizes the profile implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaConfig {
    /// Channel organisation.
    pub geometry: MediaGeometry,
    /// Timing parameters.
    pub timing: MediaTiming,
    /// Read queue capacity in bursts.
    pub read_buffer_size: usize,
    /// Write queue capacity in bursts.
    pub write_buffer_size: usize,
    /// Outstanding read bursts allowed.
    pub max_pending_reads: usize,
    /// Outstanding write bursts allowed.
    pub max_pending_writes: usize,
}

impl MediaConfig {
    /// Applies the overrides in `params` to its profile.
    pub fn resolve(params: &MediaParams) -> Self {
        let base = params.profile.baseline();
        Self {
            geometry: params.geometry.apply(base.geometry),
            timing: params.timing.apply(base.timing),
            ..base
        }
    }

    /// Checks geometry and timing.
    ///
    /// # Errors
    ///
    /// Returns the first geometry or timing problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.geometry.validate()?;
        match self.timing {
            MediaTiming::Dram(t) => {
                if t.t_burst == 0 {
                    return Err(ConfigError::NonPositive { field: "t_burst" });
                }
                if t.t_refi != 0 && t.t_rfc >= t.t_refi {
                    return Err(ConfigError::Threshold {
                        field: "t_rfc",
                        reason: format!("refresh cycle {} must be shorter than the interval {}", t.t_rfc, t.t_refi),
                    });
                }
            }
            MediaTiming::Nvm(t) => {
                if t.t_burst == 0 {
                    return Err(ConfigError::NonPositive { field: "t_burst" });
                }
            }
        }
        Ok(())
    }
}

/// Controller section.
///
/// Buffer sizes default to the media profile's values when not given.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ControllerParams {
    /// Frontend pipeline latency.
    #[serde(default = "ControllerParams::default_frontend_latency")]
    pub frontend_latency: Tick,
    /// Backend pipeline latency.
    #[serde(default = "ControllerParams::default_backend_latency")]
    pub backend_latency: Tick,
    /// Write queue percentage that forces writes.
    #[serde(default = "ControllerParams::default_write_high")]
    pub write_high_threshold_perc: u32,
    /// Write queue percentage below which waiting reads win.
    #[serde(default = "ControllerParams::default_write_low")]
    pub write_low_threshold_perc: u32,
    /// Writes served before turning back to waiting reads.
    #[serde(default = "ControllerParams::default_min_writes")]
    pub min_writes_per_switch: u32,
    /// Reads served before a forced switch to writes.
    #[serde(default = "ControllerParams::default_min_reads")]
    pub min_reads_per_switch: u32,
    /// Rounds after which a queued burst beats row hits.
    #[serde(default = "ControllerParams::default_starvation_threshold")]
    pub starvation_threshold: u32,
    /// Address bit order.
    #[serde(default)]
    pub address_mapping: AddressMapping,
    /// Read queue capacity override.
    #[serde(default)]
    pub read_buffer_size: Option<usize>,
    /// Write queue capacity override.
    #[serde(default)]
    pub write_buffer_size: Option<usize>,
    /// Outstanding read limit override.
    #[serde(default)]
    pub max_pending_reads: Option<usize>,
    /// Outstanding write limit override.
    #[serde(default)]
    pub max_pending_writes: Option<usize>,
}

impl ControllerParams {
    fn default_frontend_latency() -> Tick {
        defaults::FRONTEND_LATENCY
    }

    fn default_backend_latency() -> Tick {
        defaults::BACKEND_LATENCY
    }

    fn default_write_high() -> u32 {
        defaults::WRITE_HIGH_THRESHOLD_PERC
    }

    fn default_write_low() -> u32 {
        defaults::WRITE_LOW_THRESHOLD_PERC
    }

    fn default_min_writes() -> u32 {
        defaults::MIN_WRITES_PER_SWITCH
    }

    fn default_min_reads() -> u32 {
        defaults::MIN_READS_PER_SWITCH
    }

    fn default_starvation_threshold() -> u32 {
        defaults::STARVATION_THRESHOLD
    }
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            frontend_latency: defaults::FRONTEND_LATENCY,
            backend_latency: defaults::BACKEND_LATENCY,
            write_high_threshold_perc: defaults::WRITE_HIGH_THRESHOLD_PERC,
            write_low_threshold_perc: defaults::WRITE_LOW_THRESHOLD_PERC,
            min_writes_per_switch: defaults::MIN_WRITES_PER_SWITCH,
            min_reads_per_switch: defaults::MIN_READS_PER_SWITCH,
            starvation_threshold: defaults::STARVATION_THRESHOLD,
            address_mapping: AddressMapping::default(),
            read_buffer_size: None,
            write_buffer_size: None,
            max_pending_reads: None,
            max_pending_writes: None,
        }
    }
}

/// Resolved controller parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControllerConfig {
    /// Frontend pipeline latency.
    pub frontend_latency: Tick,
    /// Backend pipeline latency.
    pub backend_latency: Tick,
    /// Read queue capacity in bursts.
    pub read_buffer_size: usize,
    /// Write queue capacity in bursts.
    pub write_buffer_size: usize,
    /// Outstanding read bursts allowed.
    pub max_pending_reads: usize,
    /// Outstanding write bursts allowed.
    pub max_pending_writes: usize,
    /// Write queue length that forces writes.
    pub write_high_threshold: usize,
    /// Write queue length below which waiting reads win.
    pub write_low_threshold: usize,
    /// Writes served before turning back to waiting reads.
    pub min_writes_per_switch: u32,
    /// Reads served before a forced switch to writes.
    pub min_reads_per_switch: u32,
    /// Rounds after which a queued burst beats row hits.
    pub starvation_threshold: u32,
    /// Address bit order.
    pub address_mapping: AddressMapping,
}

impl ControllerConfig {
    /// Applies `params` over the buffer sizes implied by `media`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Threshold`] for percentages outside `0..=100` or a low
    /// threshold not below the high one, and [`ConfigError::NonPositive`] for empty buffers.
    pub fn resolve(params: &ControllerParams, media: &MediaConfig) -> Result<Self, ConfigError> {
        if params.write_high_threshold_perc > 100 {
            return Err(ConfigError::Threshold {
                field: "write_high_threshold_perc",
                reason: format!("{} exceeds 100", params.write_high_threshold_perc),
            });
        }
        if params.write_low_threshold_perc >= params.write_high_threshold_perc {
            return Err(ConfigError::Threshold {
                field: "write_low_threshold_perc",
                reason: format!(
                    "{} must be below the high threshold {}",
                    params.write_low_threshold_perc, params.write_high_threshold_perc
                ),
            });
        }
        let read_buffer_size = params.read_buffer_size.unwrap_or(media.read_buffer_size);
        let write_buffer_size = params.write_buffer_size.unwrap_or(media.write_buffer_size);
        let max_pending_reads = params.max_pending_reads.unwrap_or(media.max_pending_reads);
        let max_pending_writes = params.max_pending_writes.unwrap_or(media.max_pending_writes);
        for (field, value) in [
            ("read_buffer_size", read_buffer_size),
            ("write_buffer_size", write_buffer_size),
            ("max_pending_reads", max_pending_reads),
            ("max_pending_writes", max_pending_writes),
        ] {
            if value == 0 {
                return Err(ConfigError::NonPositive { field });
            }
        }
        let perc = |p: u32| (write_buffer_size * p as usize).div_ceil(100);
        Ok(Self {
            frontend_latency: params.frontend_latency,
            backend_latency: params.backend_latency,
            read_buffer_size,
            write_buffer_size,
            max_pending_reads,
            max_pending_writes,
            write_high_threshold: perc(params.write_high_threshold_perc),
            write_low_threshold: perc(params.write_low_threshold_perc),
            min_writes_per_switch: params.min_writes_per_switch,
            min_reads_per_switch: params.min_reads_per_switch,
            starvation_threshold: params.starvation_threshold,
            address_mapping: params.address_mapping,
        })
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Topology to assemble.
    #[serde(default)]
    pub topology: Topology,
    /// System memory and interconnect.
    #[serde(default)]
    pub system: SystemConfig,
    /// Protocol bridge.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Front-end device.
    #[serde(default)]
    pub device: DeviceParams,
    /// Memory controller.
    #[serde(default)]
    pub controller: ControllerParams,
    /// Timing media.
    #[serde(default)]
    pub media: MediaParams,
}

/// Fully resolved and validated configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    /// Topology to assemble.
    pub topology: Topology,
    /// System memory and interconnect.
    pub system: SystemConfig,
    /// Bridge parameters with the address filter filled in; `None` when no bridge is built.
    pub bridge: Option<BridgeConfig>,
    /// Front-end device.
    pub device: DeviceConfig,
    /// Memory controller.
    pub controller: ControllerConfig,
    /// Timing media.
    pub media: MediaConfig,
}

impl Config {
    /// Parses a JSON configuration; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed JSON or unknown enum values.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or [`ConfigError::Parse`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_json(&text)
    }

    /// Validates the configuration without resolving it for use.
    ///
    /// # Errors
    ///
    /// See [`Config::resolve`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve().map(|_| ())
    }

    /// Resolves profiles and overrides and checks every cross-section constraint.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found: a zero depth or size, overlapping
    /// ranges, a device range larger than the media, an uncovered range, or a bad
    /// threshold or geometry.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let system = self.system.clone();
        for (field, value) in [
            ("system.memory_size", system.memory_size),
            ("system.bus_width", system.bus_width),
            ("device.size", self.device.size),
        ] {
            if value == 0 {
                return Err(ConfigError::NonPositive { field });
            }
        }

        let device = DeviceConfig::resolve(&self.device);
        if device.req_size == 0 {
            return Err(ConfigError::NonPositive { field: "device.req_size" });
        }
        if device.rsp_size == 0 {
            return Err(ConfigError::NonPositive { field: "device.rsp_size" });
        }

        let media = MediaConfig::resolve(&self.media);
        media.validate()?;
        let controller = ControllerConfig::resolve(&self.controller, &media)?;

        if device.range.size > media.geometry.capacity() {
            return Err(ConfigError::RangeExceedsCapacity {
                range: device.range,
                capacity: media.geometry.capacity(),
            });
        }
        if device.range.size < media.geometry.row_buffer_size() * media.geometry.banks_per_rank {
            warn!(range = %device.range, "expander range is smaller than one row per bank");
        }

        let mut claimed = vec![(system.memory_range(), "system-memory"), (device.range, "cxl-device")];
        claimed.extend(SystemConfig::reserved_ranges());
        for (i, (a, a_name)) in claimed.iter().enumerate() {
            for (b, b_name) in &claimed[i + 1..] {
                if a.overlaps(b) {
                    return Err(ConfigError::OverlappingRanges {
                        first: *a,
                        first_owner: (*a_name).to_string(),
                        second: *b,
                        second_owner: (*b_name).to_string(),
                    });
                }
            }
        }

        let bridge = match (self.topology, self.bridge.enabled) {
            (Topology::Bridged, true) => {
                let mut bridge = self.bridge.clone();
                if bridge.req_fifo_depth == 0 {
                    return Err(ConfigError::NonPositive { field: "bridge.req_fifo_depth" });
                }
                if bridge.resp_fifo_depth == 0 {
                    return Err(ConfigError::NonPositive { field: "bridge.resp_fifo_depth" });
                }
                if bridge.ranges.is_empty() {
                    bridge.ranges.push(device.range);
                }
                let covered = bridge
                    .ranges
                    .iter()
                    .any(|r| r.contains(device.range.base) && device.range.end() <= r.end());
                if !covered {
                    return Err(ConfigError::UncoveredRange {
                        range: device.range,
                        component: "cxl-device".into(),
                        via: "cxl-bridge".into(),
                    });
                }
                Some(bridge)
            }
            _ => None,
        };

        Ok(ResolvedConfig { topology: self.topology, system, bridge, device, controller, media })
    }
}
