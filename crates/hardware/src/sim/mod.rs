//! Simulation engine.
//!
//! The model advances on a single discrete-event timeline. Components never
//! call each other directly; they schedule events and the [`System`](crate::soc::System)
//! dispatches them in tick order.

/// Tick-ordered event queue.
pub mod event;

pub use event::{Event, EventKind, EventQueue};
