//! Simulation time units and size constants.
//!
//! All latencies in the model are expressed in ticks; one tick is one
//! picosecond, so the DDR4-2400 clock period (0.833 ns) is 833 ticks.

/// Simulated time in picoseconds.
pub type Tick = u64;

/// Ticks per nanosecond.
pub const NS: Tick = 1_000;

/// Ticks per microsecond.
pub const US: Tick = 1_000 * NS;

/// One kibibyte.
pub const KIB: u64 = 1024;

/// One mebibyte.
pub const MIB: u64 = 1024 * KIB;

/// One gibibyte.
pub const GIB: u64 = 1024 * MIB;

/// Default host access size in bytes (one cache line).
pub const CACHE_LINE_BYTES: usize = 64;
