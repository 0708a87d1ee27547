//! Shared test infrastructure.


/// Mock implementations of internal interfaces.
pub mod mocks;
