//! Bounded deferred packet queue.
//!
//! Each entry carries the tick at which it may leave. The queue is FIFO: the
//! head blocks later entries even if their ready tick has already passed.
//! Occupancy never exceeds capacity; a push on a full queue hands the packet
//! back untouched.

use crate::common::{Packet, Tick};
use std::collections::VecDeque;

#[derive(Debug)]
struct Deferred {
    pkt: Packet,
    ready: Tick,
}

/// FIFO of packets with per-entry ready ticks and a fixed capacity.
#[derive(Debug)]
pub struct PacketQueue {
    entries: VecDeque<Deferred>,
    capacity: usize,
}

impl PacketQueue {
    /// Creates an empty queue holding at most `capacity` packets.
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity.min(64)), capacity }
    }

    /// Appends `pkt`, releasable at `ready`.
    ///
    /// # Errors
    ///
    /// Returns the packet unchanged if the queue is full.
    pub fn push(&mut self, pkt: Packet, ready: Tick) -> Result<(), Packet> {
        if self.is_full() {
            return Err(pkt);
        }
        self.entries.push_back(Deferred { pkt, ready });
        Ok(())
    }

    /// Puts a refused packet back at the head.
    ///
    /// The packet was popped from this queue, so the slot it occupied is still free.
    pub fn push_front(&mut self, pkt: Packet, ready: Tick) {
        self.entries.push_front(Deferred { pkt, ready });
    }

    /// Pops the head if it is ready at `now`.
    pub fn pop_ready(&mut self, now: Tick) -> Option<Packet> {
        if self.entries.front()?.ready > now {
            return None;
        }
        self.entries.pop_front().map(|d| d.pkt)
    }

    /// Returns the ready tick of the head.
    pub fn head_ready(&self) -> Option<Tick> {
        self.entries.front().map(|d| d.ready)
    }

    /// Number of queued packets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of queued packets.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` when a push would be refused.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Packets whose delay is still running at `now`.
    pub fn in_flight(&self, now: Tick) -> usize {
        self.entries.iter().filter(|d| d.ready > now).count()
    }

    /// Packets whose delay has elapsed but which have not left yet.
    pub fn buffered(&self, now: Tick) -> usize {
        self.entries.iter().filter(|d| d.ready <= now).count()
    }
}
