//! Memory stages and their building blocks.
//!
//! This module groups everything behind a terminal address range. It provides:
//! 1. **Buffer:** [`BackingStore`](buffer::BackingStore) byte storage shared by the
//!    components that register and serve a range.
//! 2. **Mapping:** Geometry and the address decoder from offsets to media coordinates.
//! 3. **Media:** DRAM and NVM timing models.
//! 4. **Controller:** The burst-scheduling [`MemCtrl`](controller::MemCtrl).
//! 5. **System memory:** A fixed-latency [`SystemMemory`] for host RAM.

/// Byte storage for memory ranges.
pub mod buffer;

/// Burst-scheduling memory controller.
pub mod controller;

/// Media geometry and address decoding.
pub mod mapping;

/// DRAM and NVM timing models.
pub mod media;

use self::buffer::BackingStore;
use crate::common::{AccessKind, AddrRange, Packet, Tick};
use crate::sim::EventKind;
use crate::soc::queue::PacketQueue;
use crate::soc::traits::{AtomicHop, Delivery, Outbox, SimObject};
use crate::stats::{MemoryStats, SimStats};
use std::sync::Arc;

/// Host RAM with a fixed access latency and no admission limit.
#[derive(Debug)]
pub struct SystemMemory {
    range: AddrRange,
    latency: Tick,
    store: Arc<BackingStore>,
    responses: PacketQueue,
    waiting_retry: bool,
    stats: MemoryStats,
}

impl SystemMemory {
    /// Creates system memory covering `range`.
    ///
    /// # Arguments
    ///
    /// * `range` - Physical range served.
    /// * `latency` - Fixed access latency in ticks.
    /// * `store` - Backing store at least `range.size` bytes long.
    pub fn new(range: AddrRange, latency: Tick, store: Arc<BackingStore>) -> Self {
        Self {
            range,
            latency,
            store,
            responses: PacketQueue::new(usize::MAX),
            waiting_retry: false,
            stats: MemoryStats::default(),
        }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<BackingStore> {
        &self.store
    }

    fn access(&mut self, pkt: &mut Packet) {
        let offset = self.range.offset_of(pkt.addr);
        let data = match pkt.kind() {
            AccessKind::Read => {
                self.stats.reads += 1;
                self.store.read(offset, pkt.size).unwrap_or_else(|| vec![0; pkt.size])
            }
            AccessKind::Write => {
                self.stats.writes += 1;
                let _ = self.store.write(offset, &pkt.data);
                Vec::new()
            }
        };
        pkt.make_response(data);
    }
}

impl SimObject for SystemMemory {
    fn name(&self) -> &str {
        "system-memory"
    }

    fn address_ranges(&self) -> Vec<AddrRange> {
        vec![self.range]
    }

    fn recv_request(&mut self, now: Tick, mut pkt: Packet, out: &mut Outbox) -> Delivery {
        if !self.range.contains_access(pkt.addr, pkt.size) {
            return Delivery::Unroutable(pkt);
        }
        let ready = now + pkt.take_header_delay() + self.latency;
        self.access(&mut pkt);
        match self.responses.push(pkt, ready) {
            Ok(()) => {
                out.schedule(ready, EventKind::SendResponse);
                Delivery::Accepted
            }
            Err(pkt) => Delivery::Busy(pkt),
        }
    }

    fn take_response(&mut self, now: Tick) -> Option<Packet> {
        if self.waiting_retry {
            return None;
        }
        self.responses.pop_ready(now)
    }

    fn response_sent(&mut self, now: Tick, out: &mut Outbox) {
        if let Some(ready) = self.responses.head_ready() {
            out.schedule(ready.max(now), EventKind::SendResponse);
        }
    }

    fn response_refused(&mut self, now: Tick, pkt: Packet, _out: &mut Outbox) {
        self.responses.push_front(pkt, now);
        self.waiting_retry = true;
    }

    fn recv_response_retry(&mut self, now: Tick, out: &mut Outbox) {
        self.waiting_retry = false;
        out.schedule(now, EventKind::SendResponse);
    }

    fn access_atomic(&mut self, pkt: &mut Packet) -> AtomicHop {
        if !self.range.contains_access(pkt.addr, pkt.size) {
            return AtomicHop::Unroutable;
        }
        self.access(pkt);
        AtomicHop::Complete(self.latency)
    }

    fn report(&self, stats: &mut SimStats) {
        stats.memory = Some(self.stats.clone());
    }
}
