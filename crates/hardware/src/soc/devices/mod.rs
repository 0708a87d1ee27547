//! Expander-side devices.
//!
//! This module contains the protocol-translating front-end that exposes the
//! expander range to the host and feeds the memory controller.

/// CXL Type-3 memory expander front-end.
pub mod cxl_memory;

pub use cxl_memory::CxlMemory;
