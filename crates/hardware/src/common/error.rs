//! Error taxonomy for the expander model.
//!
//! This module defines the two fatal error classes of the simulator. It provides:
//! 1. **`ConfigError`:** Problems detected while validating configuration or building
//!    the topology. These fail the run before any simulated time advances.
//! 2. **`SimError`:** Everything that aborts a run, including routing failures
//!    raised at the point a request reaches a component that does not claim it.
//!
//! Buffer-full conditions are not errors; they travel as
//! [`Delivery::Busy`](crate::soc::traits::Delivery) and are retried by the caller.

use super::addr::AddrRange;
use thiserror::Error;

/// Fatal configuration or topology problem, detected at setup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Two ranges that must be disjoint share addresses.
    #[error("address range {first} (`{first_owner}`) overlaps {second} (`{second_owner}`)")]
    OverlappingRanges {
        /// First range.
        first: AddrRange,
        /// Owner of the first range.
        first_owner: String,
        /// Second range.
        second: AddrRange,
        /// Owner of the second range.
        second_owner: String,
    },

    /// A range is larger than the storage or media that backs it.
    #[error("range {range} exceeds backing capacity of {capacity:#x} bytes")]
    RangeExceedsCapacity {
        /// Offending range.
        range: AddrRange,
        /// Capacity available to back it.
        capacity: u64,
    },

    /// A depth, size or count that must be non-zero is zero.
    #[error("`{field}` must be positive")]
    NonPositive {
        /// Configuration field name.
        field: &'static str,
    },

    /// A component has a request port with no downstream peer.
    #[error("component `{component}` has no backend connection on its request port")]
    MissingConnection {
        /// Component name.
        component: String,
    },

    /// A port was connected twice.
    #[error("component `{component}` is already connected on its {port} port")]
    AlreadyConnected {
        /// Component name.
        component: String,
        /// Port role that was connected twice.
        port: &'static str,
    },

    /// A component's range is not reachable through the stage in front of it.
    #[error("range {range} of `{component}` is not covered by the `{via}` address filter")]
    UncoveredRange {
        /// Range that cannot be reached.
        range: AddrRange,
        /// Component that owns the range.
        component: String,
        /// Filtering stage in front of it.
        via: String,
    },

    /// Media geometry parameters do not divide evenly.
    #[error("invalid media geometry: {0}")]
    Geometry(String),

    /// A threshold or percentage is out of range.
    #[error("invalid threshold `{field}`: {reason}")]
    Threshold {
        /// Configuration field name.
        field: &'static str,
        /// Why the value is rejected.
        reason: String,
    },

    /// The configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("failed to read configuration `{path}`: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Error that aborts a simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    /// Setup failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A request reached a component whose address ranges do not include it.
    #[error("no route for address {addr:#x} at `{component}`")]
    Routing {
        /// Offending address.
        addr: u64,
        /// Component that refused it.
        component: String,
    },

    /// Host memory for a backing store could not be allocated.
    #[error("failed to allocate {size:#x} bytes of backing storage")]
    Allocation {
        /// Requested size in bytes.
        size: u64,
    },

    /// A component identifier does not exist in the topology.
    #[error("unknown component id {0}")]
    UnknownComponent(usize),

    /// An expander access spans more bursts than the controller queues can ever hold.
    #[error("access of {size} bytes at {addr:#x} exceeds the {limit}-byte controller window")]
    RequestTooLarge {
        /// Address of the access.
        addr: u64,
        /// Access size in bytes.
        size: usize,
        /// Largest burst-aligned access the controller accepts.
        limit: u64,
    },
}
