//! CXL memory expander timing model.
//!
//! This crate implements a discrete-event model of a CXL-attached memory expander:
//! 1. **Media:** DDR4 and NVM bank state machines with row buffers, refresh, activation
//!    windows and bus turnarounds.
//! 2. **Controller:** FR-FCFS burst scheduling with write buffering and anti-starvation.
//! 3. **Device:** The protocol-translating front-end with bounded request and response buffers.
//! 4. **Bridge:** A latency-injecting, depth-limited pass-through in front of the device.
//! 5. **System:** Configuration, topology assembly, event dispatch and statistics.

/// Common types (addresses, packets, errors, tick constants).
pub mod common;
/// Configuration (defaults, profiles, overrides and validation).
pub mod config;
/// Discrete-event queue.
pub mod sim;
/// Memory-system components and the system builder.
pub mod soc;
/// Statistics collection and reporting.
pub mod stats;

/// Root configuration type; use `Config::default()` or load it from JSON.
pub use crate::config::Config;
/// Top-level system; construct with `System::new`.
pub use crate::soc::System;
