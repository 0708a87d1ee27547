//! Protocol bridge between the host fabric and the expander domain.
//!
//! The bridge is a latency-injecting pass-through with one bounded queue per
//! direction. It performs:
//! 1. **Filtering:** Only addresses inside the configured ranges are accepted.
//! 2. **Response reservation:** Every accepted request reserves a response slot, so
//!    responses coming back from the device always fit.
//! 3. **Translation:** Requests inside the expander range are tagged `M2SReq` /
//!    `M2SRwD` and pay the protocol processing latency on top of `bridge_lat`.
//! 4. **Retry:** Refused senders are told to retry once both queues have room again.

use crate::common::{AddrRange, CxlCmd, NS, Packet, Tick};
use crate::config::BridgeConfig;
use crate::sim::EventKind;
use crate::soc::queue::PacketQueue;
use crate::soc::traits::{AtomicHop, Delivery, Outbox, SimObject};
use crate::stats::{BridgeStats, SimStats};
use tracing::{debug, trace};

/// Bridge between the host interconnect and the expander device.
#[derive(Debug)]
pub struct CxlBridge {
    name: String,
    cfg: BridgeConfig,
    cxl_range: AddrRange,
    req_queue: PacketQueue,
    resp_queue: PacketQueue,
    outstanding_responses: usize,
    retry_req: bool,
    waiting_req_retry: bool,
    waiting_resp_retry: bool,
    last_response: Option<Tick>,
    stats: BridgeStats,
}

impl CxlBridge {
    /// Creates a bridge.
    ///
    /// # Arguments
    ///
    /// * `name` - Instance name for logs and errors.
    /// * `cfg` - Resolved bridge parameters; its `ranges` must not be empty.
    /// * `cxl_range` - Expander range; packets inside it pay protocol latency.
    pub fn new(name: impl Into<String>, cfg: BridgeConfig, cxl_range: AddrRange) -> Self {
        Self {
            name: name.into(),
            req_queue: PacketQueue::new(cfg.req_fifo_depth),
            resp_queue: PacketQueue::new(cfg.resp_fifo_depth),
            cfg,
            cxl_range,
            outstanding_responses: 0,
            retry_req: false,
            waiting_req_retry: false,
            waiting_resp_retry: false,
            last_response: None,
            stats: BridgeStats::default(),
        }
    }

    /// Requests queued toward the device.
    pub fn req_queue_len(&self) -> usize {
        self.req_queue.len()
    }

    /// Responses queued toward the host.
    pub fn resp_queue_len(&self) -> usize {
        self.resp_queue.len()
    }

    /// Requests accepted whose response has not left the bridge yet.
    pub const fn outstanding_responses(&self) -> usize {
        self.outstanding_responses
    }

    fn in_range(&self, pkt: &Packet) -> bool {
        self.cfg.ranges.iter().any(|r| r.contains_access(pkt.addr, pkt.size))
    }

    fn delay_for(&self, addr: u64) -> Tick {
        if self.cxl_range.contains(addr) {
            self.cfg.bridge_lat + self.cfg.proto_proc_lat
        } else {
            self.cfg.bridge_lat
        }
    }

    fn has_room(&self) -> bool {
        !self.req_queue.is_full() && self.outstanding_responses < self.cfg.resp_fifo_depth
    }

    fn retry_if_room(&mut self, out: &mut Outbox) {
        if self.retry_req && self.has_room() {
            self.retry_req = false;
            trace!(bridge = %self.name, "space freed, retrying upstream");
            out.retry_upstream();
        }
    }
}

impl SimObject for CxlBridge {
    fn name(&self) -> &str {
        &self.name
    }

    fn address_ranges(&self) -> Vec<AddrRange> {
        self.cfg.ranges.clone()
    }

    fn has_request_port(&self) -> bool {
        true
    }

    fn recv_request(&mut self, now: Tick, mut pkt: Packet, out: &mut Outbox) -> Delivery {
        if !self.in_range(&pkt) {
            return Delivery::Unroutable(pkt);
        }
        if self.outstanding_responses >= self.cfg.resp_fifo_depth {
            self.stats.resp_queue_full_events += 1;
            self.retry_req = true;
            trace!(bridge = %self.name, addr = pkt.addr, "no response space, refusing request");
            return Delivery::Busy(pkt);
        }
        if self.req_queue.is_full() {
            self.stats.req_queue_full_events += 1;
            self.retry_req = true;
            trace!(bridge = %self.name, addr = pkt.addr, "request queue full");
            return Delivery::Busy(pkt);
        }

        let ready = now + pkt.take_header_delay() + self.delay_for(pkt.addr);
        if self.cxl_range.contains(pkt.addr) {
            pkt.cxl_cmd = Some(CxlCmd::request_for(pkt.kind()));
        }
        debug!(bridge = %self.name, id = pkt.id, addr = pkt.addr, ready, "request queued");
        let was_empty = self.req_queue.is_empty();
        if let Err(pkt) = self.req_queue.push(pkt, ready) {
            return Delivery::Busy(pkt);
        }
        self.outstanding_responses += 1;
        self.stats.requests += 1;
        if was_empty && !self.waiting_req_retry {
            out.schedule(ready, EventKind::SendRequest);
        }
        Delivery::Accepted
    }

    fn take_request(&mut self, now: Tick) -> Option<Packet> {
        if self.waiting_req_retry {
            return None;
        }
        self.req_queue.pop_ready(now)
    }

    fn request_sent(&mut self, now: Tick, out: &mut Outbox) {
        if let Some(ready) = self.req_queue.head_ready() {
            out.schedule(ready.max(now), EventKind::SendRequest);
        }
        self.retry_if_room(out);
    }

    fn request_refused(&mut self, now: Tick, pkt: Packet, _out: &mut Outbox) {
        self.stats.req_retry_counts += 1;
        self.waiting_req_retry = true;
        self.req_queue.push_front(pkt, now);
        trace!(bridge = %self.name, "request refused downstream, waiting for retry");
    }

    fn recv_request_retry(&mut self, now: Tick, out: &mut Outbox) {
        self.waiting_req_retry = false;
        if let Some(ready) = self.req_queue.head_ready() {
            out.schedule(ready.max(now), EventKind::SendRequest);
        }
    }

    fn recv_response(&mut self, now: Tick, mut pkt: Packet, out: &mut Outbox) -> Delivery {
        let header_delay = pkt.take_header_delay();
        let ready = now + header_delay + self.delay_for(pkt.addr);
        let was_empty = self.resp_queue.is_empty();
        if let Err(mut pkt) = self.resp_queue.push(pkt, ready) {
            pkt.header_delay = header_delay;
            return Delivery::Busy(pkt);
        }
        // Intervals cover accepted responses only.
        if let Some(last) = self.last_response {
            self.stats.io_to_bridge_rsp.sample((now - last) / NS);
        }
        self.last_response = Some(now);
        self.stats.responses += 1;
        debug!(bridge = %self.name, ready, "response queued");
        if was_empty && !self.waiting_resp_retry {
            out.schedule(ready, EventKind::SendResponse);
        }
        Delivery::Accepted
    }

    fn take_response(&mut self, now: Tick) -> Option<Packet> {
        if self.waiting_resp_retry {
            return None;
        }
        self.resp_queue.pop_ready(now)
    }

    fn response_sent(&mut self, now: Tick, out: &mut Outbox) {
        self.outstanding_responses = self.outstanding_responses.saturating_sub(1);
        if let Some(ready) = self.resp_queue.head_ready() {
            out.schedule(ready.max(now), EventKind::SendResponse);
        }
        self.retry_if_room(out);
    }

    fn response_refused(&mut self, now: Tick, pkt: Packet, _out: &mut Outbox) {
        self.stats.resp_retry_counts += 1;
        self.waiting_resp_retry = true;
        self.resp_queue.push_front(pkt, now);
    }

    fn recv_response_retry(&mut self, now: Tick, out: &mut Outbox) {
        self.waiting_resp_retry = false;
        if let Some(ready) = self.resp_queue.head_ready() {
            out.schedule(ready.max(now), EventKind::SendResponse);
        }
    }

    fn access_atomic(&mut self, pkt: &mut Packet) -> AtomicHop {
        if !self.in_range(pkt) {
            return AtomicHop::Unroutable;
        }
        if self.cxl_range.contains(pkt.addr) {
            pkt.cxl_cmd = Some(CxlCmd::request_for(pkt.kind()));
        }
        AtomicHop::Forward(self.delay_for(pkt.addr))
    }

    fn report(&self, stats: &mut SimStats) {
        stats.bridge = Some(self.stats.clone());
    }
}
