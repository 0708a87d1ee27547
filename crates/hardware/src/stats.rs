//! Simulation statistics collection and reporting.
//!
//! This module tracks counters for every stage of the expander. It provides:
//! 1. **Host:** Issued, retried and completed transactions with latency totals.
//! 2. **Bridge:** Queue-full events, retries, and the device response interval histogram.
//! 3. **Device:** Request/response buffer pressure at the front-end.
//! 4. **Controller:** Queue occupancy, write merging, bus turnarounds and starvation promotions.
//! 5. **Media:** Row hits, activations, refreshes and power-down exits per channel.
//!
//! `System::stats` aggregates these into a [`SimStats`] snapshot that serializes to JSON.

use crate::common::{NS, Tick};
use serde::Serialize;

/// Fixed-bucket histogram.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Histogram {
    min: u64,
    bucket_size: u64,
    buckets: Vec<u64>,
    underflows: u64,
    overflows: u64,
    samples: u64,
    sum: u64,
}

impl Histogram {
    /// Creates a histogram covering `[min, max]` in buckets of `bucket_size`.
    pub fn new(min: u64, max: u64, bucket_size: u64) -> Self {
        let bucket_size = bucket_size.max(1);
        let count = (max.saturating_sub(min) / bucket_size + 1) as usize;
        Self { min, bucket_size, buckets: vec![0; count], underflows: 0, overflows: 0, samples: 0, sum: 0 }
    }

    /// Records one sample.
    pub fn sample(&mut self, value: u64) {
        self.samples += 1;
        self.sum += value;
        if value < self.min {
            self.underflows += 1;
            return;
        }
        let idx = ((value - self.min) / self.bucket_size) as usize;
        match self.buckets.get_mut(idx) {
            Some(b) => *b += 1,
            None => self.overflows += 1,
        }
    }

    /// Number of samples recorded.
    pub const fn samples(&self) -> u64 {
        self.samples
    }

    /// Arithmetic mean of all samples, or zero when empty.
    pub fn mean(&self) -> f64 {
        if self.samples == 0 { 0.0 } else { self.sum as f64 / self.samples as f64 }
    }

    /// Per-bucket counts.
    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    /// Samples above the last bucket.
    pub const fn overflows(&self) -> u64 {
        self.overflows
    }
}

/// Host-side transaction counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HostStats {
    /// Requests accepted at the interconnect.
    pub issued: u64,
    /// Requests refused and handed back for retry.
    pub retried: u64,
    /// Responses delivered to the host.
    pub completed: u64,
    /// Sum of round-trip latencies of completed transactions.
    pub total_latency: Tick,
}

impl HostStats {
    /// Average round-trip latency in ticks.
    pub fn avg_latency(&self) -> f64 {
        if self.completed == 0 { 0.0 } else { self.total_latency as f64 / self.completed as f64 }
    }
}

/// Protocol bridge counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Requests accepted from upstream.
    pub requests: u64,
    /// Responses accepted from downstream.
    pub responses: u64,
    /// Requests refused because the request queue was full.
    pub req_queue_full_events: u64,
    /// Requests refused by the downstream peer and held for retry.
    pub req_retry_counts: u64,
    /// Requests refused because no response space could be reserved.
    pub resp_queue_full_events: u64,
    /// Responses refused by the upstream peer and held for retry.
    pub resp_retry_counts: u64,
    /// Interval between consecutive device responses, in nanoseconds.
    pub io_to_bridge_rsp: Histogram,
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self {
            requests: 0,
            responses: 0,
            req_queue_full_events: 0,
            req_retry_counts: 0,
            resp_queue_full_events: 0,
            resp_retry_counts: 0,
            io_to_bridge_rsp: Histogram::new(0, 299, 10),
        }
    }
}

/// Front-end device counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    /// Requests accepted into the request buffer.
    pub requests: u64,
    /// Responses accepted into the response buffer.
    pub responses: u64,
    /// Requests refused because the request buffer was full.
    pub req_buffer_full: u64,
    /// Responses refused because the response buffer was full.
    pub rsp_buffer_full: u64,
    /// Highest request buffer occupancy observed.
    pub max_req_occupancy: usize,
    /// Highest response buffer occupancy observed.
    pub max_rsp_occupancy: usize,
}

/// Memory controller counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CtrlStats {
    /// Read packets accepted.
    pub read_reqs: u64,
    /// Write packets accepted.
    pub write_reqs: u64,
    /// Read bursts issued to media.
    pub read_bursts: u64,
    /// Write bursts issued to media.
    pub write_bursts: u64,
    /// Write bursts merged into an already queued burst.
    pub merged_writes: u64,
    /// Read bursts served from the write queue.
    pub reads_from_write_queue: u64,
    /// Read packets refused for lack of queue space.
    pub rejected_reads: u64,
    /// Write packets refused for lack of queue space.
    pub rejected_writes: u64,
    /// Bursts that hit an open row when issued.
    pub row_hits: u64,
    /// Bursts issued because their wait reached the starvation threshold.
    pub starvation_promotions: u64,
    /// Read/write bus direction changes.
    pub bus_turnarounds: u64,
    /// Reads served per read phase.
    pub reads_per_turnaround: Histogram,
    /// Writes served per write phase.
    pub writes_per_turnaround: Histogram,
    /// Sum of ticks bursts spent queued before issue.
    pub total_queue_latency: Tick,
    /// Longest wait, in scheduling rounds, of any issued burst.
    pub max_rounds_waited: u32,
}

impl Default for CtrlStats {
    fn default() -> Self {
        Self {
            read_reqs: 0,
            write_reqs: 0,
            read_bursts: 0,
            write_bursts: 0,
            merged_writes: 0,
            reads_from_write_queue: 0,
            rejected_reads: 0,
            rejected_writes: 0,
            row_hits: 0,
            starvation_promotions: 0,
            bus_turnarounds: 0,
            reads_per_turnaround: Histogram::new(0, 127, 8),
            writes_per_turnaround: Histogram::new(0, 127, 8),
            total_queue_latency: 0,
            max_rounds_waited: 0,
        }
    }
}

/// Media counters for one channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MediaStats {
    /// Read bursts served.
    pub reads: u64,
    /// Write bursts served.
    pub writes: u64,
    /// Bytes read.
    pub bytes_read: u64,
    /// Bytes written.
    pub bytes_written: u64,
    /// Accesses that found their row open.
    pub row_hits: u64,
    /// Row activations (or array reads on NVM).
    pub activations: u64,
    /// Precharges issued to close a conflicting row.
    pub precharges: u64,
    /// Refresh intervals elapsed on the banks touched.
    pub refreshes: u64,
    /// Commands pushed past a refresh window.
    pub refresh_stalls: u64,
    /// Activates delayed by the rolling activation window.
    pub activation_window_stalls: u64,
    /// Power-down exits paid.
    pub powerdown_exits: u64,
    /// Data bus direction or rank switches.
    pub bus_turnarounds: u64,
}

impl MediaStats {
    /// Fraction of accesses that hit an open row.
    pub fn row_hit_rate(&self) -> f64 {
        let total = self.reads + self.writes;
        if total == 0 { 0.0 } else { self.row_hits as f64 / total as f64 }
    }
}

/// Fixed-latency system memory counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Reads served.
    pub reads: u64,
    /// Writes served.
    pub writes: u64,
}

/// Snapshot of every counter in the system.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SimStats {
    /// Current simulated time.
    pub sim_ticks: Tick,
    /// Host-side counters.
    pub host: HostStats,
    /// Bridge counters, when a bridge is present.
    pub bridge: Option<BridgeStats>,
    /// Front-end device counters, when a device is present.
    pub device: Option<DeviceStats>,
    /// Controller counters.
    pub controller: Option<CtrlStats>,
    /// One entry per media channel.
    pub media: Vec<MediaStats>,
    /// Ordinary system memory counters.
    pub memory: Option<MemoryStats>,
}

impl SimStats {
    /// Prints a human-readable report to stdout.
    pub fn print(&self) {
        println!("\n==========================================================");
        println!("CXL MEMORY EXPANDER STATISTICS");
        println!("==========================================================");
        println!("sim_ticks                {}", self.sim_ticks);
        println!("sim_ns                   {:.3}", self.sim_ticks as f64 / NS as f64);
        println!("host.issued              {}", self.host.issued);
        println!("host.retried             {}", self.host.retried);
        println!("host.completed           {}", self.host.completed);
        println!("host.avg_latency_ns      {:.3}", self.host.avg_latency() / NS as f64);
        if let Some(b) = &self.bridge {
            println!("----------------------------------------------------------");
            println!("BRIDGE");
            println!("  requests               {}", b.requests);
            println!("  responses              {}", b.responses);
            println!("  req_queue_full_events  {}", b.req_queue_full_events);
            println!("  req_retry_counts       {}", b.req_retry_counts);
            println!("  resp_queue_full_events {}", b.resp_queue_full_events);
            println!("  resp_retry_counts      {}", b.resp_retry_counts);
            println!("  rsp_interval_mean_ns   {:.2}", b.io_to_bridge_rsp.mean());
        }
        if let Some(d) = &self.device {
            println!("----------------------------------------------------------");
            println!("DEVICE");
            println!("  requests               {}", d.requests);
            println!("  responses              {}", d.responses);
            println!("  req_buffer_full        {}", d.req_buffer_full);
            println!("  rsp_buffer_full        {}", d.rsp_buffer_full);
            println!("  max_req_occupancy      {}", d.max_req_occupancy);
            println!("  max_rsp_occupancy      {}", d.max_rsp_occupancy);
        }
        if let Some(c) = &self.controller {
            println!("----------------------------------------------------------");
            println!("CONTROLLER");
            println!("  read_reqs              {}", c.read_reqs);
            println!("  write_reqs             {}", c.write_reqs);
            println!("  read_bursts            {}", c.read_bursts);
            println!("  write_bursts           {}", c.write_bursts);
            println!("  merged_writes          {}", c.merged_writes);
            println!("  reads_from_write_queue {}", c.reads_from_write_queue);
            println!("  rejected_reads         {}", c.rejected_reads);
            println!("  rejected_writes        {}", c.rejected_writes);
            println!("  row_hits               {}", c.row_hits);
            println!("  starvation_promotions  {}", c.starvation_promotions);
            println!("  bus_turnarounds        {}", c.bus_turnarounds);
            println!("  reads_per_turnaround   {:.2}", c.reads_per_turnaround.mean());
            println!("  writes_per_turnaround  {:.2}", c.writes_per_turnaround.mean());
        }
        for (ch, m) in self.media.iter().enumerate() {
            println!("----------------------------------------------------------");
            println!("MEDIA (channel {ch})");
            println!("  reads                  {}", m.reads);
            println!("  writes                 {}", m.writes);
            println!("  bytes_read             {}", m.bytes_read);
            println!("  bytes_written          {}", m.bytes_written);
            println!("  row_hit_rate           {:.2}%", m.row_hit_rate() * 100.0);
            println!("  activations            {}", m.activations);
            println!("  precharges             {}", m.precharges);
            println!("  refreshes              {}", m.refreshes);
            println!("  refresh_stalls         {}", m.refresh_stalls);
            println!("  act_window_stalls      {}", m.activation_window_stalls);
            println!("  powerdown_exits        {}", m.powerdown_exits);
            println!("  bus_turnarounds        {}", m.bus_turnarounds);
        }
        if let Some(m) = &self.memory {
            println!("----------------------------------------------------------");
            println!("SYSTEM MEMORY");
            println!("  reads                  {}", m.reads);
            println!("  writes                 {}", m.writes);
        }
        println!("==========================================================");
    }
}
