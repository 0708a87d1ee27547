//! Common types shared by every stage of the expander model.
//!
//! This module provides the building blocks the components exchange. It includes:
//! 1. **Address ranges:** Half-open physical ranges used for routing and registration.
//! 2. **Constants:** Tick units (picoseconds) and size helpers.
//! 3. **Packets:** Host requests, in-flight transactions, and completions.
//! 4. **Errors:** Configuration and simulation error types.

/// Physical address ranges.
pub mod addr;

/// Tick units and size constants.
pub mod constants;

/// Configuration and simulation errors.
pub mod error;

/// Transactions, commands, and host-facing request/completion types.
pub mod packet;

pub use addr::AddrRange;
pub use constants::{GIB, KIB, MIB, NS, Tick, US};
pub use error::{ConfigError, SimError};
pub use packet::{AccessKind, Completion, CxlCmd, HostRequest, MemCmd, Packet, TransactionId};
