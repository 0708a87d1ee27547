//! Topology construction and the top-level `System` type.
//!
//! This module assembles components into memory paths and drives them. It performs:
//! 1. **Wiring:** [`TopologyBuilder`] owns the component arena and links each request
//!    port to exactly one downstream peer; a second link on the same port, or a request
//!    port left unconnected, fails the build.
//! 2. **Assembly:** [`System::new`] resolves the configuration and builds system memory
//!    plus the expander path (bridge, device, controller) for the selected topology.
//! 3. **Dispatch:** Events from the queue are turned into calls on components; the
//!    system carries packets between peers, records hops, and routes retries.
//! 4. **Host port:** Requests are admitted or handed back for retry; completions are
//!    stamped with the interconnect transit time of the response.
//! 5. **Atomic mode:** Walks a request down the path, summing fixed latencies.

use crate::common::{
    AddrRange, Completion, ConfigError, HostRequest, SimError, Tick, TransactionId,
};
use crate::config::{Config, ResolvedConfig, Topology};
use crate::sim::{Event, EventKind, EventQueue};
use crate::soc::bridge::CxlBridge;
use crate::soc::devices::CxlMemory;
use crate::soc::interconnect::Interconnect;
use crate::soc::memmap::{self, MemoryMapEntry};
use crate::soc::memory::SystemMemory;
use crate::soc::memory::buffer::BackingStore;
use crate::soc::memory::controller::MemCtrl;
use crate::soc::traits::{Action, AtomicHop, ComponentId, Delivery, Outbox, PortRole, SimObject};
use crate::stats::{HostStats, SimStats};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// The stage in front of a component's response port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Peer {
    /// The host, through the interconnect.
    Host,
    /// Another component.
    Component(ComponentId),
}

/// A wired, validated set of components.
pub struct Fabric {
    components: Vec<Box<dyn SimObject>>,
    upstream: Vec<Option<Peer>>,
    downstream: Vec<Option<ComponentId>>,
    interconnect: Interconnect,
}

impl fmt::Debug for Fabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fabric").field("components", &self.components.len()).finish_non_exhaustive()
    }
}

/// Collects components and their links before the system starts.
pub struct TopologyBuilder {
    components: Vec<Box<dyn SimObject>>,
    upstream: Vec<Option<Peer>>,
    downstream: Vec<Option<ComponentId>>,
    interconnect: Interconnect,
}

impl fmt::Debug for TopologyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.components.iter().map(|c| c.name()).collect();
        f.debug_struct("TopologyBuilder").field("components", &names).finish_non_exhaustive()
    }
}

impl TopologyBuilder {
    /// Creates an empty builder around the host interconnect.
    pub fn new(interconnect: Interconnect) -> Self {
        Self { components: Vec::new(), upstream: Vec::new(), downstream: Vec::new(), interconnect }
    }

    /// Adds a component to the arena and returns its id.
    pub fn add(&mut self, component: Box<dyn SimObject>) -> ComponentId {
        self.components.push(component);
        self.upstream.push(None);
        self.downstream.push(None);
        ComponentId(self.components.len() - 1)
    }

    fn component(&self, id: ComponentId) -> Result<&dyn SimObject, SimError> {
        self.components.get(id.0).map(AsRef::as_ref).ok_or(SimError::UnknownComponent(id.0))
    }

    fn already(&self, id: ComponentId, port: PortRole) -> SimError {
        let component = self.components[id.0].name().to_string();
        let port = match port {
            PortRole::Request => "request",
            PortRole::Response => "response",
        };
        ConfigError::AlreadyConnected { component, port }.into()
    }

    /// Links the request port of `up` to the response port of `down`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyConnected`] if either port already has a peer, or
    /// [`SimError::UnknownComponent`] for an id not returned by [`TopologyBuilder::add`].
    pub fn connect(&mut self, up: ComponentId, down: ComponentId) -> Result<(), SimError> {
        let _ = self.component(up)?;
        let _ = self.component(down)?;
        if self.downstream[up.0].is_some() {
            return Err(self.already(up, PortRole::Request));
        }
        if self.upstream[down.0].is_some() {
            return Err(self.already(down, PortRole::Response));
        }
        self.downstream[up.0] = Some(down);
        self.upstream[down.0] = Some(Peer::Component(up));
        Ok(())
    }

    /// Makes `target` reachable from the host for every range in `ranges`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyConnected`] if the response port of `target` is
    /// taken, or [`ConfigError::OverlappingRanges`] if a range is already routed.
    pub fn attach_to_host(&mut self, target: ComponentId, ranges: &[AddrRange]) -> Result<(), SimError> {
        let name = self.component(target)?.name().to_string();
        if self.upstream[target.0].is_some() {
            return Err(self.already(target, PortRole::Response));
        }
        for range in ranges {
            self.interconnect.add_route(*range, target, &name)?;
        }
        self.upstream[target.0] = Some(Peer::Host);
        Ok(())
    }

    /// Checks every request port and returns the wired fabric.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingConnection`] for a component that forwards requests
    /// but has no downstream peer.
    pub fn build(self) -> Result<Fabric, ConfigError> {
        for (c, down) in self.components.iter().zip(&self.downstream) {
            if c.has_request_port() && down.is_none() {
                return Err(ConfigError::MissingConnection { component: c.name().to_string() });
            }
        }
        Ok(Fabric {
            components: self.components,
            upstream: self.upstream,
            downstream: self.downstream,
            interconnect: self.interconnect,
        })
    }
}

/// Outcome of offering a request at the host port.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    /// The first stage took the request; its completion will carry this id.
    Accepted(TransactionId),
    /// The first stage is full; resend after [`System::take_retry`] reports a retry.
    Retry(HostRequest),
}

/// A complete simulated system: host port, interconnect, and memory paths.
pub struct System {
    components: Vec<Box<dyn SimObject>>,
    upstream: Vec<Option<Peer>>,
    downstream: Vec<Option<ComponentId>>,
    interconnect: Interconnect,
    events: EventQueue,
    now: Tick,
    next_id: TransactionId,
    completions: Vec<Completion>,
    host_retry: bool,
    host_stats: HostStats,
    stores: Vec<(AddrRange, Arc<BackingStore>)>,
    memory_map: Vec<MemoryMapEntry>,
    request_window: RequestWindow,
    config: ResolvedConfig,
}

/// Largest access the controller behind the expander range can queue.
#[derive(Clone, Copy, Debug)]
struct RequestWindow {
    range: AddrRange,
    burst: u64,
    max_bursts: u64,
}

impl RequestWindow {
    fn from_config(config: &ResolvedConfig) -> Self {
        let c = &config.controller;
        let max_bursts = c.read_buffer_size.min(c.write_buffer_size).min(c.max_pending_reads).min(c.max_pending_writes);
        Self { range: config.device.range, burst: config.media.geometry.burst_size(), max_bursts: max_bursts as u64 }
    }

    /// Rejects expander accesses spanning more bursts than the controller queues hold.
    fn check(&self, req: &HostRequest) -> Result<(), SimError> {
        if !self.range.contains(req.addr) {
            return Ok(());
        }
        let burst = self.burst.max(1);
        let offset = self.range.offset_of(req.addr);
        let first = offset - offset % burst;
        let last = offset.saturating_add(req.size.max(1) as u64 - 1);
        if (last - first) / burst + 1 > self.max_bursts {
            return Err(SimError::RequestTooLarge {
                addr: req.addr,
                size: req.size,
                limit: self.max_bursts * self.burst,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.components.iter().map(|c| c.name()).collect();
        f.debug_struct("System")
            .field("now", &self.now)
            .field("components", &names)
            .field("pending_events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl System {
    /// Builds a system from configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration; resolved and validated before anything is built.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] for any invalid parameter or wiring problem and
    /// [`SimError::Allocation`] if a backing store cannot be allocated.
    pub fn new(config: &Config) -> Result<Self, SimError> {
        let resolved = config.resolve()?;
        let sys = &resolved.system;
        let device = &resolved.device;
        info!(
            topology = ?resolved.topology,
            device = %device.range,
            bridge = resolved.bridge.is_some(),
            "building system"
        );

        let mut builder =
            TopologyBuilder::new(Interconnect::new(sys.bus_width, sys.bus_latency, sys.bus_clock));

        let sys_range = sys.memory_range();
        let sys_store = Arc::new(BackingStore::new(sys.memory_size)?);
        let mem = builder.add(Box::new(SystemMemory::new(sys_range, sys.memory_latency, Arc::clone(&sys_store))));
        builder.attach_to_host(mem, &[sys_range])?;

        let dev_store = Arc::new(BackingStore::new(device.range.size)?);
        let ctrl = MemCtrl::from_config(
            "mem-ctrl",
            device.range,
            &resolved.controller,
            &resolved.media,
            Arc::clone(&dev_store),
        )?;
        let ctrl = builder.add(Box::new(ctrl));

        let registered = match resolved.topology {
            Topology::Controller => {
                builder.attach_to_host(ctrl, &[device.range])?;
                (device.range, dev_store)
            }
            Topology::Bridged | Topology::Direct => {
                let cxl = CxlMemory::new("cxl-device", *device, dev_store);
                let registration = cxl.registration();
                let dev = builder.add(Box::new(cxl));
                builder.connect(dev, ctrl)?;
                match &resolved.bridge {
                    Some(cfg) => {
                        let bridge = builder.add(Box::new(CxlBridge::new("cxl-bridge", cfg.clone(), device.range)));
                        builder.connect(bridge, dev)?;
                        builder.attach_to_host(bridge, &[device.range])?;
                    }
                    None => builder.attach_to_host(dev, &[device.range])?,
                }
                registration
            }
        };

        let fabric = builder.build()?;
        let memory_map = memmap::build(sys_range, registered.0);
        debug!(entries = memory_map.len(), "memory map built");

        Ok(Self {
            components: fabric.components,
            upstream: fabric.upstream,
            downstream: fabric.downstream,
            interconnect: fabric.interconnect,
            events: EventQueue::new(),
            now: 0,
            next_id: 0,
            completions: Vec::new(),
            host_retry: false,
            host_stats: HostStats::default(),
            stores: vec![(sys_range, sys_store), registered],
            memory_map,
            request_window: RequestWindow::from_config(&resolved),
            config: resolved,
        })
    }

    /// Returns the current simulated time.
    pub const fn now(&self) -> Tick {
        self.now
    }

    /// Returns the resolved configuration the system was built from.
    pub const fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Returns the E820-style memory map.
    pub fn memory_map(&self) -> &[MemoryMapEntry] {
        &self.memory_map
    }

    /// Returns the tick of the next pending event.
    pub fn next_event_tick(&self) -> Option<Tick> {
        self.events.next_tick()
    }

    /// Returns `true` when no events are pending.
    pub fn is_idle(&self) -> bool {
        self.events.is_empty()
    }

    /// Offers a request at the host port at the current tick.
    ///
    /// # Arguments
    ///
    /// * `req` - The access to perform.
    ///
    /// # Returns
    ///
    /// [`Admission::Accepted`] with the transaction id, or [`Admission::Retry`] handing
    /// the request back unchanged when the first stage is full.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Routing`] if no stage claims the whole access, and
    /// [`SimError::RequestTooLarge`] for an expander access the controller could never queue.
    pub fn send_request(&mut self, req: HostRequest) -> Result<Admission, SimError> {
        self.request_window.check(&req)?;
        let Some(target) = self.interconnect.route(req.addr, req.size) else {
            return Err(SimError::Routing { addr: req.addr, component: "interconnect".into() });
        };
        let id = self.next_id;
        let mut pkt = req.into_packet(id, self.now);
        pkt.header_delay = self.interconnect.transit_time(pkt.payload_len());
        pkt.record_hop(target, self.now);

        let mut out = Outbox::new();
        match self.components[target.0].recv_request(self.now, pkt, &mut out) {
            Delivery::Accepted => {
                self.next_id += 1;
                self.host_stats.issued += 1;
                trace!(id, tick = self.now, "host request accepted");
                self.apply(target, out)?;
                Ok(Admission::Accepted(id))
            }
            Delivery::Busy(pkt) => {
                self.host_stats.retried += 1;
                self.apply(target, out)?;
                Ok(Admission::Retry(HostRequest::from_packet(pkt)))
            }
            Delivery::Unroutable(pkt) => Err(SimError::Routing {
                addr: pkt.addr,
                component: self.components[target.0].name().to_string(),
            }),
        }
    }

    /// Returns `true` once if a stage has signalled room for a refused host request.
    pub fn take_retry(&mut self) -> bool {
        std::mem::take(&mut self.host_retry)
    }

    /// Removes and returns completions that have reached the host by now, oldest first.
    pub fn take_completions(&mut self) -> Vec<Completion> {
        let now = self.now;
        let (mut done, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.completions).into_iter().partition(|c| c.completed <= now);
        self.completions = pending;
        done.sort_by_key(|c| (c.completed, c.id));
        done
    }

    /// Advances to the next completion and returns everything due at that tick.
    ///
    /// Returns an empty vector when nothing is in flight.
    ///
    /// # Errors
    ///
    /// Propagates routing errors raised while processing events.
    pub fn poll_completions(&mut self) -> Result<Vec<Completion>, SimError> {
        loop {
            let next_completion = self.completions.iter().map(|c| c.completed).min();
            match (next_completion, self.events.next_tick()) {
                (Some(c), Some(e)) if e <= c => self.run_until(e)?,
                (Some(c), _) => {
                    self.now = self.now.max(c);
                    return Ok(self.take_completions());
                }
                (None, Some(e)) => self.run_until(e)?,
                (None, None) => return Ok(Vec::new()),
            }
        }
    }

    /// Processes every event scheduled at or before `limit`, then sets the time to `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Routing`] if a packet reaches a stage that does not claim it.
    pub fn run_until(&mut self, limit: Tick) -> Result<(), SimError> {
        while let Some(ev) = self.events.pop_due(limit) {
            self.now = self.now.max(ev.when);
            self.dispatch(ev)?;
        }
        self.now = self.now.max(limit);
        Ok(())
    }

    /// Processes events until none are left and every completion has landed.
    ///
    /// # Errors
    ///
    /// See [`System::run_until`].
    pub fn run_until_idle(&mut self) -> Result<(), SimError> {
        while let Some(ev) = self.events.pop_due(Tick::MAX) {
            self.now = self.now.max(ev.when);
            self.dispatch(ev)?;
        }
        if let Some(last) = self.completions.iter().map(|c| c.completed).max() {
            self.now = self.now.max(last);
        }
        Ok(())
    }

    /// Performs an access without queueing, summing each stage's fixed latency.
    ///
    /// Bank state and buffers are untouched; the data effect is the same as in timing mode.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Routing`] if the address is not claimed along the path, and
    /// [`SimError::RequestTooLarge`] as for [`System::send_request`].
    pub fn access_atomic(&mut self, req: HostRequest) -> Result<Completion, SimError> {
        self.request_window.check(&req)?;
        let Some(mut cur) = self.interconnect.route(req.addr, req.size) else {
            return Err(SimError::Routing { addr: req.addr, component: "interconnect".into() });
        };
        let id = self.next_id;
        self.next_id += 1;
        let mut pkt = req.into_packet(id, self.now);
        let mut latency = self.interconnect.transit_time(pkt.payload_len());

        loop {
            pkt.record_hop(cur, self.now + latency);
            match self.components[cur.0].access_atomic(&mut pkt) {
                AtomicHop::Forward(delay) => {
                    latency += delay;
                    cur = self.downstream[cur.0].ok_or_else(|| SimError::Routing {
                        addr: pkt.addr,
                        component: self.components[cur.0].name().to_string(),
                    })?;
                }
                AtomicHop::Complete(delay) => {
                    latency += delay;
                    break;
                }
                AtomicHop::Unroutable => {
                    return Err(SimError::Routing {
                        addr: pkt.addr,
                        component: self.components[cur.0].name().to_string(),
                    });
                }
            }
        }
        latency += self.interconnect.transit_time(pkt.payload_len());
        Ok(Completion::from_response(pkt, self.now + latency))
    }

    fn store_for(&self, addr: u64, len: usize) -> Result<(&AddrRange, &Arc<BackingStore>), SimError> {
        self.stores
            .iter()
            .find(|(r, _)| r.contains_access(addr, len))
            .map(|(r, s)| (r, s))
            .ok_or_else(|| SimError::Routing { addr, component: "memory-map".into() })
    }

    /// Writes `data` directly into backing storage, bypassing timing.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Routing`] if no single memory range holds the whole blob.
    pub fn load_binary_at(&mut self, data: &[u8], addr: u64) -> Result<(), SimError> {
        let (range, store) = self.store_for(addr, data.len())?;
        if store.write(range.offset_of(addr), data) {
            Ok(())
        } else {
            Err(SimError::Routing { addr, component: "memory-map".into() })
        }
    }

    /// Reads `len` bytes directly from backing storage, bypassing timing.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Routing`] if no single memory range holds the whole span.
    pub fn read_functional(&self, addr: u64, len: usize) -> Result<Vec<u8>, SimError> {
        let (range, store) = self.store_for(addr, len)?;
        store
            .read(range.offset_of(addr), len)
            .ok_or_else(|| SimError::Routing { addr, component: "memory-map".into() })
    }

    /// Collects counters from every component.
    pub fn stats(&self) -> SimStats {
        let mut stats = SimStats { sim_ticks: self.now, host: self.host_stats.clone(), ..SimStats::default() };
        for c in &self.components {
            c.report(&mut stats);
        }
        stats
    }

    fn dispatch(&mut self, ev: Event) -> Result<(), SimError> {
        match ev.kind {
            EventKind::SendRequest => self.forward_request(ev.target),
            EventKind::SendResponse => self.forward_response(ev.target),
            EventKind::Process => {
                let mut out = Outbox::new();
                self.components[ev.target.0].process(self.now, &mut out);
                self.apply(ev.target, out)
            }
        }
    }

    fn forward_request(&mut self, from: ComponentId) -> Result<(), SimError> {
        let Some(down) = self.downstream[from.0] else {
            return Ok(());
        };
        let now = self.now;
        let Some(mut pkt) = self.components[from.0].take_request(now) else {
            return Ok(());
        };
        pkt.record_hop(down, now);

        let mut out_down = Outbox::new();
        let result = self.components[down.0].recv_request(now, pkt, &mut out_down);
        self.apply(down, out_down)?;

        let mut out = Outbox::new();
        match result {
            Delivery::Accepted => self.components[from.0].request_sent(now, &mut out),
            Delivery::Busy(mut pkt) => {
                let _ = pkt.hops.pop();
                self.components[from.0].request_refused(now, pkt, &mut out);
            }
            Delivery::Unroutable(pkt) => {
                return Err(SimError::Routing {
                    addr: pkt.addr,
                    component: self.components[down.0].name().to_string(),
                });
            }
        }
        self.apply(from, out)
    }

    fn forward_response(&mut self, from: ComponentId) -> Result<(), SimError> {
        let Some(up) = self.upstream[from.0] else {
            return Ok(());
        };
        let now = self.now;
        let Some(pkt) = self.components[from.0].take_response(now) else {
            return Ok(());
        };

        let mut out = Outbox::new();
        match up {
            Peer::Host => {
                let completed = now + self.interconnect.transit_time(pkt.payload_len());
                let completion = Completion::from_response(pkt, completed);
                self.host_stats.completed += 1;
                self.host_stats.total_latency += completion.latency();
                trace!(id = completion.id, completed, "host completion");
                self.completions.push(completion);
                self.components[from.0].response_sent(now, &mut out);
            }
            Peer::Component(up) => {
                let mut out_up = Outbox::new();
                let result = self.components[up.0].recv_response(now, pkt, &mut out_up);
                self.apply(up, out_up)?;
                match result {
                    Delivery::Accepted => self.components[from.0].response_sent(now, &mut out),
                    Delivery::Busy(pkt) => self.components[from.0].response_refused(now, pkt, &mut out),
                    Delivery::Unroutable(pkt) => {
                        return Err(SimError::Routing {
                            addr: pkt.addr,
                            component: self.components[up.0].name().to_string(),
                        });
                    }
                }
            }
        }
        self.apply(from, out)
    }

    fn apply(&mut self, id: ComponentId, out: Outbox) -> Result<(), SimError> {
        for action in out.into_actions() {
            match action {
                Action::Schedule { when, kind } => self.events.schedule(when.max(self.now), id, kind),
                Action::RetryRequest => match self.upstream[id.0] {
                    Some(Peer::Host) => self.host_retry = true,
                    Some(Peer::Component(up)) => {
                        let mut o = Outbox::new();
                        self.components[up.0].recv_request_retry(self.now, &mut o);
                        self.apply(up, o)?;
                    }
                    None => {}
                },
                Action::RetryResponse => {
                    if let Some(down) = self.downstream[id.0] {
                        let mut o = Outbox::new();
                        self.components[down.0].recv_response_retry(self.now, &mut o);
                        self.apply(down, o)?;
                    }
                }
            }
        }
        Ok(())
    }
}
