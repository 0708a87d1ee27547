//! Memory controller for the expander media.
//!
//! This module schedules bursts against one media instance per channel. It performs:
//! 1. **Admission:** Packets are split into bursts; reads and writes go to separate
//!    bounded queues and overflow is refused with `Busy`.
//! 2. **Write buffering:** Writes are posted (answered after the frontend latency),
//!    merge into a queued burst to the same address, and serve reads they fully cover.
//! 3. **Scheduling:** FR-FCFS with anti-starvation. Each round picks, from the queue of
//!    the current bus direction, the oldest burst that waited `starvation_threshold`
//!    rounds, else the oldest row hit, else the oldest burst.
//! 4. **Bus direction:** Reads have priority; writes drain when no reads wait or when
//!    the write queue passes its high threshold.
//! 5. **Responses:** Read responses leave after media completion plus the frontend and
//!    backend latencies, in completion order.
//!
//! Data is moved functionally at admission: writes commit to the backing store when
//! accepted and reads capture their data when accepted, so responses always carry the
//! value of the latest accepted write.

use crate::common::{AccessKind, AddrRange, ConfigError, Packet, Tick, TransactionId};
use crate::config::{ControllerConfig, MediaConfig, MediaTiming};
use crate::sim::EventKind;
use crate::soc::memory::buffer::BackingStore;
use crate::soc::memory::mapping::{AddressDecoder, MediaCoord, MediaGeometry};
use crate::soc::memory::media::{DramMedia, MediaInterface, NvmMedia};
use crate::soc::traits::{AtomicHop, Delivery, Outbox, SimObject};
use crate::stats::{CtrlStats, SimStats};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Direction the data bus is currently serving.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusState {
    /// Serving the read queue.
    Read,
    /// Draining the write queue.
    Write,
}

#[derive(Debug)]
struct Burst {
    pkt_id: TransactionId,
    offset: u64,
    coord: MediaCoord,
    kind: AccessKind,
    arrived: Tick,
    rounds_waited: u32,
}

#[derive(Debug)]
struct PendingRead {
    pkt: Packet,
    bursts_left: usize,
    ready: Tick,
    header_delay: Tick,
}

#[derive(Debug)]
struct ReadyResponse {
    ready: Tick,
    seq: u64,
    pkt: Packet,
}

impl PartialEq for ReadyResponse {
    fn eq(&self, other: &Self) -> bool {
        self.ready == other.ready && self.seq == other.seq
    }
}

impl Eq for ReadyResponse {}

impl Ord for ReadyResponse {
    fn cmp(&self, other: &Self) -> Ordering {
        other.ready.cmp(&self.ready).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyResponse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Burst-scheduling memory controller.
pub struct MemCtrl {
    name: String,
    range: AddrRange,
    cfg: ControllerConfig,
    decoder: AddressDecoder,
    media: Vec<Box<dyn MediaInterface>>,
    store: Arc<BackingStore>,
    read_queue: VecDeque<Burst>,
    write_queue: VecDeque<Burst>,
    queued_writes: HashMap<u64, usize>,
    reads_in_flight: Vec<Tick>,
    writes_in_flight: Vec<Tick>,
    pending: HashMap<TransactionId, PendingRead>,
    responses: BinaryHeap<ReadyResponse>,
    last_taken: Option<(Tick, u64)>,
    bus_state: BusState,
    reads_this_time: u32,
    writes_this_time: u32,
    next_round: Option<Tick>,
    round_not_before: Tick,
    retry_rd_req: bool,
    retry_wr_req: bool,
    waiting_resp_retry: bool,
    next_seq: u64,
    stats: CtrlStats,
}

impl fmt::Debug for MemCtrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemCtrl")
            .field("name", &self.name)
            .field("range", &self.range)
            .field("read_queue", &self.read_queue.len())
            .field("write_queue", &self.write_queue.len())
            .field("bus_state", &self.bus_state)
            .finish_non_exhaustive()
    }
}

/// Picks the next burst: starved first, then the oldest row hit, then the oldest.
///
/// Returns the queue index and whether the pick was a starvation promotion.
fn choose_next(queue: &VecDeque<Burst>, media: &[Box<dyn MediaInterface>], threshold: u32) -> (usize, bool) {
    if let Some(i) = queue.iter().position(|b| b.rounds_waited >= threshold) {
        return (i, true);
    }
    let hit = queue.iter().position(|b| media.get(b.coord.channel).is_some_and(|m| m.is_row_hit(b.coord)));
    (hit.unwrap_or(0), false)
}

fn count_in_flight(in_flight: &[Tick], now: Tick) -> usize {
    in_flight.iter().filter(|&&t| t > now).count()
}

impl MemCtrl {
    /// Creates a controller serving `range` with the given media channels.
    ///
    /// # Arguments
    ///
    /// * `name` - Instance name for logs and errors.
    /// * `range` - Address range served; offsets are decoded relative to its base.
    /// * `cfg` - Resolved controller parameters.
    /// * `geometry` - Media geometry used for decoding.
    /// * `media` - One media instance per channel.
    /// * `store` - Backing store covering `range`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Geometry`] if the channel count does not match, or
    /// [`ConfigError::RangeExceedsCapacity`] if the media or the store is smaller than `range`.
    pub fn new(
        name: impl Into<String>,
        range: AddrRange,
        cfg: ControllerConfig,
        geometry: MediaGeometry,
        media: Vec<Box<dyn MediaInterface>>,
        store: Arc<BackingStore>,
    ) -> Result<Self, ConfigError> {
        if media.len() as u64 != geometry.channels {
            return Err(ConfigError::Geometry(format!(
                "{} media instances for {} channels",
                media.len(),
                geometry.channels
            )));
        }
        if range.size > geometry.capacity() {
            return Err(ConfigError::RangeExceedsCapacity { range, capacity: geometry.capacity() });
        }
        if range.size > store.len() as u64 {
            return Err(ConfigError::RangeExceedsCapacity { range, capacity: store.len() as u64 });
        }
        Ok(Self {
            name: name.into(),
            range,
            cfg,
            decoder: AddressDecoder::new(geometry, cfg.address_mapping),
            media,
            store,
            read_queue: VecDeque::with_capacity(cfg.read_buffer_size),
            write_queue: VecDeque::with_capacity(cfg.write_buffer_size),
            queued_writes: HashMap::new(),
            reads_in_flight: Vec::new(),
            writes_in_flight: Vec::new(),
            pending: HashMap::new(),
            responses: BinaryHeap::new(),
            last_taken: None,
            bus_state: BusState::Read,
            reads_this_time: 0,
            writes_this_time: 0,
            next_round: None,
            round_not_before: 0,
            retry_rd_req: false,
            retry_wr_req: false,
            waiting_resp_retry: false,
            next_seq: 0,
            stats: CtrlStats::default(),
        })
    }

    /// Creates a controller with media instances built from `media_cfg`.
    ///
    /// # Errors
    ///
    /// See [`MemCtrl::new`].
    pub fn from_config(
        name: impl Into<String>,
        range: AddrRange,
        cfg: &ControllerConfig,
        media_cfg: &MediaConfig,
        store: Arc<BackingStore>,
    ) -> Result<Self, ConfigError> {
        let geometry = media_cfg.geometry;
        let media = (0..geometry.channels)
            .map(|_| -> Box<dyn MediaInterface> {
                match media_cfg.timing {
                    MediaTiming::Dram(t) => Box::new(DramMedia::new(geometry, t)),
                    MediaTiming::Nvm(t) => Box::new(NvmMedia::new(geometry, t)),
                }
            })
            .collect();
        Self::new(name, range, *cfg, geometry, media, store)
    }

    /// Returns the address decoder.
    pub const fn decoder(&self) -> &AddressDecoder {
        &self.decoder
    }

    /// Returns the current bus direction.
    pub const fn bus_state(&self) -> BusState {
        self.bus_state
    }

    /// Queued read bursts.
    pub fn read_queue_len(&self) -> usize {
        self.read_queue.len()
    }

    /// Queued write bursts.
    pub fn write_queue_len(&self) -> usize {
        self.write_queue.len()
    }

    /// Read bursts queued or issued and not yet complete at `now`.
    pub fn outstanding_reads(&self, now: Tick) -> usize {
        self.read_queue.len() + count_in_flight(&self.reads_in_flight, now)
    }

    /// Write bursts queued or issued and not yet complete at `now`.
    pub fn outstanding_writes(&self, now: Tick) -> usize {
        self.write_queue.len() + count_in_flight(&self.writes_in_flight, now)
    }

    fn burst_offsets(&self, offset: u64, size: usize) -> Vec<u64> {
        let burst = self.decoder.geometry().burst_size();
        let first = self.decoder.burst_align(offset);
        let last = offset + size.max(1) as u64 - 1;
        (first..=last).step_by(burst as usize).collect()
    }

    fn read_room(&self, now: Tick, needed: usize) -> bool {
        self.read_queue.len() + needed <= self.cfg.read_buffer_size
            && self.outstanding_reads(now) + needed <= self.cfg.max_pending_reads
    }

    fn write_room(&self, now: Tick, needed: usize) -> bool {
        self.write_queue.len() + needed <= self.cfg.write_buffer_size
            && self.outstanding_writes(now) + needed <= self.cfg.max_pending_writes
    }

    fn push_response(&mut self, ready: Tick, pkt: Packet, out: &mut Outbox) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.responses.push(ReadyResponse { ready, seq, pkt });
        out.schedule(ready, EventKind::SendResponse);
    }

    fn request_round(&mut self, at: Tick, out: &mut Outbox) {
        let at = at.max(self.round_not_before);
        if self.next_round.is_none_or(|t| at < t) {
            self.next_round = Some(at);
            out.schedule(at, EventKind::Process);
        }
    }

    fn accept_read(&mut self, now: Tick, mut pkt: Packet, out: &mut Outbox) -> Delivery {
        let offset = self.range.offset_of(pkt.addr);
        let bursts: Vec<u64> = self
            .burst_offsets(offset, pkt.size)
            .into_iter()
            .filter(|b| !self.queued_writes.contains_key(b))
            .collect();
        if !self.read_room(now, bursts.len()) {
            self.stats.rejected_reads += 1;
            self.retry_rd_req = true;
            trace!(ctrl = %self.name, addr = pkt.addr, queued = self.read_queue.len(), "read queue full");
            return Delivery::Busy(pkt);
        }

        let total = self.burst_offsets(offset, pkt.size).len();
        self.stats.read_reqs += 1;
        self.stats.reads_from_write_queue += (total - bursts.len()) as u64;
        let header_delay = pkt.take_header_delay();
        let data = self.store.read(offset, pkt.size).unwrap_or_else(|| vec![0; pkt.size]);
        pkt.make_response(data);
        debug!(ctrl = %self.name, id = pkt.id, addr = pkt.addr, bursts = bursts.len(), "read accepted");

        if bursts.is_empty() {
            let ready = now + header_delay + self.cfg.frontend_latency;
            self.push_response(ready, pkt, out);
            return Delivery::Accepted;
        }
        let id = pkt.id;
        for b in &bursts {
            self.read_queue.push_back(Burst {
                pkt_id: id,
                offset: *b,
                coord: self.decoder.decode(*b),
                kind: AccessKind::Read,
                arrived: now,
                rounds_waited: 0,
            });
        }
        let _ = self.pending.insert(id, PendingRead { pkt, bursts_left: bursts.len(), ready: now, header_delay });
        self.request_round(now, out);
        Delivery::Accepted
    }

    fn accept_write(&mut self, now: Tick, mut pkt: Packet, out: &mut Outbox) -> Delivery {
        let offset = self.range.offset_of(pkt.addr);
        let all = self.burst_offsets(offset, pkt.size);
        let fresh: Vec<u64> = all.iter().copied().filter(|b| !self.queued_writes.contains_key(b)).collect();
        if !self.write_room(now, fresh.len()) {
            self.stats.rejected_writes += 1;
            self.retry_wr_req = true;
            trace!(ctrl = %self.name, addr = pkt.addr, queued = self.write_queue.len(), "write queue full");
            return Delivery::Busy(pkt);
        }

        self.stats.write_reqs += 1;
        self.stats.merged_writes += (all.len() - fresh.len()) as u64;
        let _ = self.store.write(offset, &pkt.data);
        for b in fresh {
            let _ = self.queued_writes.insert(b, 1);
            self.write_queue.push_back(Burst {
                pkt_id: pkt.id,
                offset: b,
                coord: self.decoder.decode(b),
                kind: AccessKind::Write,
                arrived: now,
                rounds_waited: 0,
            });
        }
        debug!(ctrl = %self.name, id = pkt.id, addr = pkt.addr, queued = self.write_queue.len(), "write accepted");

        let ready = now + pkt.take_header_delay() + self.cfg.frontend_latency;
        pkt.make_response(Vec::new());
        self.push_response(ready, pkt, out);
        self.request_round(now, out);
        Delivery::Accepted
    }

    fn update_bus_state(&mut self) {
        let switch = match self.bus_state {
            BusState::Read => {
                !self.write_queue.is_empty()
                    && (self.read_queue.is_empty()
                        || (self.write_queue.len() > self.cfg.write_high_threshold
                            && self.reads_this_time >= self.cfg.min_reads_per_switch))
            }
            BusState::Write => {
                !self.read_queue.is_empty()
                    && (self.write_queue.is_empty()
                        || self.write_queue.len() < self.cfg.write_low_threshold
                        || self.writes_this_time >= self.cfg.min_writes_per_switch)
            }
        };
        if !switch {
            return;
        }
        self.stats.bus_turnarounds += 1;
        match self.bus_state {
            BusState::Read => {
                self.stats.reads_per_turnaround.sample(u64::from(self.reads_this_time));
                self.reads_this_time = 0;
                self.bus_state = BusState::Write;
            }
            BusState::Write => {
                self.stats.writes_per_turnaround.sample(u64::from(self.writes_this_time));
                self.writes_this_time = 0;
                self.bus_state = BusState::Read;
            }
        }
        trace!(ctrl = %self.name, state = ?self.bus_state, "bus turnaround");
    }

    fn run_round(&mut self, now: Tick, out: &mut Outbox) {
        if self.read_queue.is_empty() && self.write_queue.is_empty() {
            return;
        }
        self.update_bus_state();
        let queue = match self.bus_state {
            BusState::Read => &mut self.read_queue,
            BusState::Write => &mut self.write_queue,
        };
        let (idx, promoted) = choose_next(queue, &self.media, self.cfg.starvation_threshold);
        let Some(burst) = queue.remove(idx) else {
            return;
        };
        for b in queue.iter_mut() {
            b.rounds_waited += 1;
        }

        let channel = burst.coord.channel.min(self.media.len() - 1);
        let media = &mut self.media[channel];
        let access = media.access(burst.coord, burst.kind, now);
        let slot = media.command_slot();
        let lookahead = media.static_latency();

        self.stats.total_queue_latency += now - burst.arrived;
        self.stats.max_rounds_waited = self.stats.max_rounds_waited.max(burst.rounds_waited);
        if promoted {
            self.stats.starvation_promotions += 1;
        }
        if access.row_hit {
            self.stats.row_hits += 1;
        }

        match burst.kind {
            AccessKind::Read => {
                self.stats.read_bursts += 1;
                self.reads_this_time += 1;
                self.reads_in_flight.push(access.ready_at);
                self.finish_read_burst(burst.pkt_id, access.ready_at, out);
            }
            AccessKind::Write => {
                self.stats.write_bursts += 1;
                self.writes_this_time += 1;
                self.writes_in_flight.push(access.ready_at);
                let _ = self.queued_writes.remove(&burst.offset);
            }
        }

        self.round_not_before = (now + slot).max(access.ready_at.saturating_sub(lookahead));
        if !(self.read_queue.is_empty() && self.write_queue.is_empty()) {
            self.request_round(self.round_not_before, out);
        }
    }

    fn finish_read_burst(&mut self, id: TransactionId, ready_at: Tick, out: &mut Outbox) {
        let Some(p) = self.pending.get_mut(&id) else {
            return;
        };
        p.bursts_left -= 1;
        p.ready = p.ready.max(ready_at);
        if p.bursts_left > 0 {
            return;
        }
        if let Some(p) = self.pending.remove(&id) {
            let ready = p.ready + p.header_delay + self.cfg.frontend_latency + self.cfg.backend_latency;
            self.push_response(ready, p.pkt, out);
        }
    }

    fn retry_if_room(&mut self, now: Tick, out: &mut Outbox) {
        if !(self.retry_rd_req || self.retry_wr_req) {
            return;
        }
        let fire = (self.retry_rd_req && self.read_room(now, 1)) || (self.retry_wr_req && self.write_room(now, 1));
        if fire {
            self.retry_rd_req = false;
            self.retry_wr_req = false;
            out.retry_upstream();
            return;
        }
        let wake = self.reads_in_flight.iter().chain(&self.writes_in_flight).copied().filter(|&t| t > now).min();
        if let Some(t) = wake {
            out.schedule(t, EventKind::Process);
        }
    }
}

impl SimObject for MemCtrl {
    fn name(&self) -> &str {
        &self.name
    }

    fn address_ranges(&self) -> Vec<AddrRange> {
        vec![self.range]
    }

    fn recv_request(&mut self, now: Tick, pkt: Packet, out: &mut Outbox) -> Delivery {
        if !self.range.contains_access(pkt.addr, pkt.size) {
            return Delivery::Unroutable(pkt);
        }
        self.reads_in_flight.retain(|&t| t > now);
        self.writes_in_flight.retain(|&t| t > now);
        match pkt.kind() {
            AccessKind::Read => self.accept_read(now, pkt, out),
            AccessKind::Write => self.accept_write(now, pkt, out),
        }
    }

    fn take_response(&mut self, now: Tick) -> Option<Packet> {
        if self.waiting_resp_retry || self.responses.peek()?.ready > now {
            return None;
        }
        let r = self.responses.pop()?;
        self.last_taken = Some((r.ready, r.seq));
        Some(r.pkt)
    }

    fn response_sent(&mut self, now: Tick, out: &mut Outbox) {
        self.last_taken = None;
        if self.responses.peek().is_some_and(|r| r.ready <= now) {
            out.schedule(now, EventKind::SendResponse);
        }
    }

    fn response_refused(&mut self, now: Tick, pkt: Packet, _out: &mut Outbox) {
        let (ready, seq) = self.last_taken.take().unwrap_or((now, 0));
        self.responses.push(ReadyResponse { ready, seq, pkt });
        self.waiting_resp_retry = true;
        trace!(ctrl = %self.name, "response refused, waiting for retry");
    }

    fn recv_response_retry(&mut self, now: Tick, out: &mut Outbox) {
        self.waiting_resp_retry = false;
        out.schedule(now, EventKind::SendResponse);
    }

    fn process(&mut self, now: Tick, out: &mut Outbox) {
        self.reads_in_flight.retain(|&t| t > now);
        self.writes_in_flight.retain(|&t| t > now);
        if self.next_round.is_some_and(|t| t <= now) {
            self.next_round = None;
            self.run_round(now, out);
        }
        self.retry_if_room(now, out);
    }

    fn access_atomic(&mut self, pkt: &mut Packet) -> AtomicHop {
        if !self.range.contains_access(pkt.addr, pkt.size) {
            return AtomicHop::Unroutable;
        }
        let offset = self.range.offset_of(pkt.addr);
        let data = match pkt.kind() {
            AccessKind::Read => self.store.read(offset, pkt.size).unwrap_or_else(|| vec![0; pkt.size]),
            AccessKind::Write => {
                let _ = self.store.write(offset, &pkt.data);
                Vec::new()
            }
        };
        pkt.make_response(data);
        let media = self.media.first().map_or(0, |m| m.static_latency());
        AtomicHop::Complete(self.cfg.frontend_latency + self.cfg.backend_latency + media)
    }

    fn report(&self, stats: &mut SimStats) {
        stats.controller = Some(self.stats.clone());
        stats.media = self.media.iter().map(|m| m.stats()).collect();
    }
}
