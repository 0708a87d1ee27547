//! Components of the simulated memory system.
//!
//! This module organizes the stages between the host port and the media,
//! the interconnect that routes host requests to them, and the builder that
//! wires them into a [`System`].

/// CXL protocol bridge.
pub mod bridge;

/// Topology builder and the top-level system.
pub mod builder;

/// Expander front-end device.
pub mod devices;

/// Host interconnect and address decode.
pub mod interconnect;

/// E820-style memory map.
pub mod memmap;

/// Memory controller, media models and system memory.
pub mod memory;

/// Bounded deferred packet queue.
pub mod queue;

/// Component trait and port plumbing.
pub mod traits;

pub use builder::{Admission, System, TopologyBuilder};
