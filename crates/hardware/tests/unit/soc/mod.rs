//! Memory-system component tests.

/// Protocol bridge.
pub mod bridge;


/// Controller, media and address mapping.
pub mod memory;

/// Assembled system: end-to-end timing, data integrity, atomic mode, topology errors.
pub mod system;
