//! Mocks for internal interfaces.

/// Mock media channel.
pub mod media;
