//! Discrete-event queue.
//!
//! Events are ordered by tick, then by insertion sequence, so two events
//! scheduled for the same tick fire in the order they were scheduled. Nothing
//! is ever cancelled; a handler that finds nothing to do simply returns.

use crate::common::Tick;
use crate::soc::traits::ComponentId;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// What a component is asked to do when its event fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Try to send the head of the request path downstream.
    SendRequest,
    /// Try to send the head of the response path upstream.
    SendResponse,
    /// Run internal processing (controller scheduling rounds, wakeups).
    Process,
}

/// A pending event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    /// Tick at which the event fires.
    pub when: Tick,
    /// Component that handles it.
    pub target: ComponentId,
    /// Action requested.
    pub kind: EventKind,
    seq: u64,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the earliest event first.
        other.when.cmp(&self.when).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Tick-ordered event queue driving the whole model.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Event>,
    next_seq: u64,
}

impl EventQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `kind` for `target` at `when`.
    pub fn schedule(&mut self, when: Tick, target: ComponentId, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Event { when, target, kind, seq });
    }

    /// Removes and returns the earliest event if it fires at or before `limit`.
    pub fn pop_due(&mut self, limit: Tick) -> Option<Event> {
        if self.heap.peek()?.when > limit {
            return None;
        }
        self.heap.pop()
    }

    /// Returns the tick of the earliest pending event.
    pub fn next_tick(&self) -> Option<Tick> {
        self.heap.peek().map(|e| e.when)
    }

    /// Returns the number of pending events.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` when no events are pending.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
