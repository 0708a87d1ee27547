//! Protocol-translating front-end of the memory expander.
//!
//! The device sits between the host side (bridge or interconnect) and the memory
//! controller. It performs:
//! 1. **Request buffering:** Requests inside the device range wait `proto_proc_lat`
//!    in a bounded request buffer before going to the controller.
//! 2. **Response buffering:** Controller responses are tagged `S2MDRS` / `S2MNDR`,
//!    wait `proto_proc_lat` in an independent bounded buffer, then go upstream.
//! 3. **Backpressure:** A full buffer refuses with `Busy`; the refused side is told
//!    to retry once a slot frees.
//! 4. **Registration:** The device range and its backing store are handed to the
//!    system once, at build, and reported as RAM.

use crate::common::{AddrRange, CxlCmd, Packet, Tick};
use crate::config::{DeviceConfig, PciIdentity};
use crate::sim::EventKind;
use crate::soc::memory::buffer::BackingStore;
use crate::soc::queue::PacketQueue;
use crate::soc::traits::{AtomicHop, Delivery, Outbox, SimObject};
use crate::stats::{DeviceStats, SimStats};
use std::sync::Arc;
use tracing::{debug, trace};

/// CXL Type-3 memory expander front-end.
#[derive(Debug)]
pub struct CxlMemory {
    name: String,
    cfg: DeviceConfig,
    store: Arc<BackingStore>,
    req_buf: PacketQueue,
    rsp_buf: PacketQueue,
    retry_req: bool,
    retry_rsp: bool,
    waiting_req_retry: bool,
    waiting_rsp_retry: bool,
    stats: DeviceStats,
}

impl CxlMemory {
    /// Creates the device.
    ///
    /// # Arguments
    ///
    /// * `name` - Instance name for logs and errors.
    /// * `cfg` - Resolved device parameters.
    /// * `store` - Backing store for the device range, shared with the controller.
    pub fn new(name: impl Into<String>, cfg: DeviceConfig, store: Arc<BackingStore>) -> Self {
        Self {
            name: name.into(),
            req_buf: PacketQueue::new(cfg.req_size),
            rsp_buf: PacketQueue::new(cfg.rsp_size),
            cfg,
            store,
            retry_req: false,
            retry_rsp: false,
            waiting_req_retry: false,
            waiting_rsp_retry: false,
            stats: DeviceStats::default(),
        }
    }

    /// Returns the range to register as system memory and its backing store.
    pub fn registration(&self) -> (AddrRange, Arc<BackingStore>) {
        (self.cfg.range, Arc::clone(&self.store))
    }

    /// Returns the PCI identity.
    pub const fn pci(&self) -> &PciIdentity {
        &self.cfg.pci
    }

    /// Requests held in the request buffer.
    pub fn req_occupancy(&self) -> usize {
        self.req_buf.len()
    }

    /// Responses held in the response buffer.
    pub fn rsp_occupancy(&self) -> usize {
        self.rsp_buf.len()
    }
}

impl SimObject for CxlMemory {
    fn name(&self) -> &str {
        &self.name
    }

    fn address_ranges(&self) -> Vec<AddrRange> {
        vec![self.cfg.range]
    }

    fn has_request_port(&self) -> bool {
        true
    }

    fn recv_request(&mut self, now: Tick, mut pkt: Packet, out: &mut Outbox) -> Delivery {
        if !self.cfg.range.contains_access(pkt.addr, pkt.size) {
            return Delivery::Unroutable(pkt);
        }
        if self.req_buf.is_full() {
            self.stats.req_buffer_full += 1;
            self.retry_req = true;
            trace!(device = %self.name, addr = pkt.addr, "request buffer full");
            return Delivery::Busy(pkt);
        }

        if pkt.cxl_cmd.is_none() {
            pkt.cxl_cmd = Some(CxlCmd::request_for(pkt.kind()));
        }
        let ready = now + pkt.take_header_delay() + self.cfg.proto_proc_lat;
        debug!(device = %self.name, id = pkt.id, addr = pkt.addr, ready, "request buffered");
        let was_empty = self.req_buf.is_empty();
        if let Err(pkt) = self.req_buf.push(pkt, ready) {
            return Delivery::Busy(pkt);
        }
        self.stats.requests += 1;
        self.stats.max_req_occupancy = self.stats.max_req_occupancy.max(self.req_buf.len());
        if was_empty && !self.waiting_req_retry {
            out.schedule(ready, EventKind::SendRequest);
        }
        Delivery::Accepted
    }

    fn take_request(&mut self, now: Tick) -> Option<Packet> {
        if self.waiting_req_retry {
            return None;
        }
        self.req_buf.pop_ready(now)
    }

    fn request_sent(&mut self, now: Tick, out: &mut Outbox) {
        if let Some(ready) = self.req_buf.head_ready() {
            out.schedule(ready.max(now), EventKind::SendRequest);
        }
        if self.retry_req {
            self.retry_req = false;
            out.retry_upstream();
        }
    }

    fn request_refused(&mut self, now: Tick, pkt: Packet, _out: &mut Outbox) {
        self.waiting_req_retry = true;
        self.req_buf.push_front(pkt, now);
        trace!(device = %self.name, "controller busy, holding request");
    }

    fn recv_request_retry(&mut self, now: Tick, out: &mut Outbox) {
        self.waiting_req_retry = false;
        if let Some(ready) = self.req_buf.head_ready() {
            out.schedule(ready.max(now), EventKind::SendRequest);
        }
    }

    fn recv_response(&mut self, now: Tick, mut pkt: Packet, out: &mut Outbox) -> Delivery {
        if self.rsp_buf.is_full() {
            self.stats.rsp_buffer_full += 1;
            self.retry_rsp = true;
            trace!(device = %self.name, "response buffer full");
            return Delivery::Busy(pkt);
        }

        pkt.cxl_cmd = Some(CxlCmd::response_for(pkt.kind()));
        let ready = now + pkt.take_header_delay() + self.cfg.proto_proc_lat;
        debug!(device = %self.name, id = pkt.id, cmd = ?pkt.cxl_cmd, ready, "response buffered");
        let was_empty = self.rsp_buf.is_empty();
        if let Err(pkt) = self.rsp_buf.push(pkt, ready) {
            return Delivery::Busy(pkt);
        }
        self.stats.responses += 1;
        self.stats.max_rsp_occupancy = self.stats.max_rsp_occupancy.max(self.rsp_buf.len());
        if was_empty && !self.waiting_rsp_retry {
            out.schedule(ready, EventKind::SendResponse);
        }
        Delivery::Accepted
    }

    fn take_response(&mut self, now: Tick) -> Option<Packet> {
        if self.waiting_rsp_retry {
            return None;
        }
        self.rsp_buf.pop_ready(now)
    }

    fn response_sent(&mut self, now: Tick, out: &mut Outbox) {
        if let Some(ready) = self.rsp_buf.head_ready() {
            out.schedule(ready.max(now), EventKind::SendResponse);
        }
        if self.retry_rsp {
            self.retry_rsp = false;
            out.retry_downstream();
        }
    }

    fn response_refused(&mut self, now: Tick, pkt: Packet, _out: &mut Outbox) {
        self.waiting_rsp_retry = true;
        self.rsp_buf.push_front(pkt, now);
    }

    fn recv_response_retry(&mut self, now: Tick, out: &mut Outbox) {
        self.waiting_rsp_retry = false;
        if let Some(ready) = self.rsp_buf.head_ready() {
            out.schedule(ready.max(now), EventKind::SendResponse);
        }
    }

    fn access_atomic(&mut self, pkt: &mut Packet) -> AtomicHop {
        if !self.cfg.range.contains_access(pkt.addr, pkt.size) {
            return AtomicHop::Unroutable;
        }
        if pkt.cxl_cmd.is_none() {
            pkt.cxl_cmd = Some(CxlCmd::request_for(pkt.kind()));
        }
        AtomicHop::Forward(2 * self.cfg.proto_proc_lat)
    }

    fn report(&self, stats: &mut SimStats) {
        stats.device = Some(self.stats.clone());
    }
}
