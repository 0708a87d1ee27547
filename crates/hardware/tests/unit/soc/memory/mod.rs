//! Memory controller and media tests.

/// Burst scheduling, write buffering and backpressure.
pub mod controller;

/// Address decoding across mappings.
pub mod mapping;

/// DRAM and NVM timing.
pub mod media;
