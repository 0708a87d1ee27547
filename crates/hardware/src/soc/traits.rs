//! Component trait for timed request/response stages.
//!
//! This module defines the `SimObject` trait implemented by every stage between
//! the host and the media. It provides:
//! 1. **Identification:** `name` and `address_ranges` for routing and diagnostics.
//! 2. **Admission:** `recv_request` / `recv_response` answer at once with a
//!    [`Delivery`]; a refused packet is handed back to the sender.
//! 3. **Sending:** `take_request` / `take_response` give up the head packet when its
//!    event fires; the system reports the outcome through `*_sent` or `*_refused`.
//! 4. **Retry:** `recv_request_retry` / `recv_response_retry` tell a stalled sender
//!    that its peer has freed space.
//! 5. **Atomic mode:** `access_atomic` reports a stage's fixed contribution to an
//!    unqueued access.
//!
//! Components never hold references to each other. Everything they want done
//! outside themselves is written into an [`Outbox`] and carried out by the system.

use crate::common::{AddrRange, Packet, Tick};
use crate::sim::EventKind;
use crate::stats::SimStats;
use std::fmt;

/// Index of a component in the system arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub usize);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Port roles.
///
/// A request port issues requests and receives responses; a response port
/// receives requests and issues responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortRole {
    /// Faces downstream, toward memory.
    Request,
    /// Faces upstream, toward the host.
    Response,
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Request => "request",
            Self::Response => "response",
        })
    }
}

/// Outcome of offering a packet to a stage.
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The stage took ownership.
    Accepted,
    /// The stage has no room; the packet is returned and the sender waits for a retry.
    Busy(Packet),
    /// The packet's address is outside every range the stage claims.
    Unroutable(Packet),
}

/// A stage's contribution to an atomic (unqueued) access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomicHop {
    /// Add the latency and continue downstream.
    Forward(Tick),
    /// The access terminated here; the packet is now a response.
    Complete(Tick),
    /// The address is outside the stage's ranges.
    Unroutable,
}

/// Side effect requested by a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Fire `kind` on this component at `when`.
    Schedule {
        /// Tick of the event.
        when: Tick,
        /// Event to fire.
        kind: EventKind,
    },
    /// Tell the upstream peer it may resend a refused request.
    RetryRequest,
    /// Tell the downstream peer it may resend a refused response.
    RetryResponse,
}

/// Collects the actions a component requests during one call.
#[derive(Debug, Default)]
pub struct Outbox {
    actions: Vec<Action>,
}

impl Outbox {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an event on the calling component.
    pub fn schedule(&mut self, when: Tick, kind: EventKind) {
        self.actions.push(Action::Schedule { when, kind });
    }

    /// Requests a request retry toward the upstream peer.
    pub fn retry_upstream(&mut self) {
        self.actions.push(Action::RetryRequest);
    }

    /// Requests a response retry toward the downstream peer.
    pub fn retry_downstream(&mut self) {
        self.actions.push(Action::RetryResponse);
    }

    /// Returns the collected actions in request order.
    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }

    /// Returns `true` if nothing was requested.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// A timed stage on the memory path.
///
/// Stages without a request port (the controller, plain system memory) keep the
/// default request-side methods.
pub trait SimObject: Send {
    /// Returns the instance name used in logs and errors.
    fn name(&self) -> &str;

    /// Returns the address ranges this stage accepts requests for.
    fn address_ranges(&self) -> Vec<AddrRange>;

    /// Returns `true` if the stage forwards requests and must be connected downstream.
    fn has_request_port(&self) -> bool {
        false
    }

    /// Offers a request from upstream.
    fn recv_request(&mut self, now: Tick, pkt: Packet, out: &mut Outbox) -> Delivery;

    /// Offers a response from downstream.
    fn recv_response(&mut self, _now: Tick, pkt: Packet, _out: &mut Outbox) -> Delivery {
        Delivery::Unroutable(pkt)
    }

    /// Hands over the head request if it is ready at `now`.
    fn take_request(&mut self, _now: Tick) -> Option<Packet> {
        None
    }

    /// The downstream peer accepted the request last taken.
    fn request_sent(&mut self, _now: Tick, _out: &mut Outbox) {}

    /// The downstream peer refused `pkt`; the stage keeps it until a retry arrives.
    fn request_refused(&mut self, _now: Tick, _pkt: Packet, _out: &mut Outbox) {}

    /// Hands over the head response if it is ready at `now`.
    fn take_response(&mut self, now: Tick) -> Option<Packet>;

    /// The upstream peer accepted the response last taken.
    fn response_sent(&mut self, _now: Tick, _out: &mut Outbox) {}

    /// The upstream peer refused `pkt`; the stage keeps it until a retry arrives.
    fn response_refused(&mut self, now: Tick, pkt: Packet, out: &mut Outbox);

    /// The downstream peer has room for a previously refused request.
    fn recv_request_retry(&mut self, _now: Tick, _out: &mut Outbox) {}

    /// The upstream peer has room for a previously refused response.
    fn recv_response_retry(&mut self, _now: Tick, _out: &mut Outbox) {}

    /// Runs internal processing for a `Process` event.
    fn process(&mut self, _now: Tick, _out: &mut Outbox) {}

    /// Applies the stage to an atomic access.
    ///
    /// Terminal stages perform the functional access and turn `pkt` into a response.
    fn access_atomic(&mut self, pkt: &mut Packet) -> AtomicHop;

    /// Adds the stage's counters to `stats`.
    fn report(&self, stats: &mut SimStats);
}
