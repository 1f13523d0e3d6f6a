//! Outbound messaging abstraction.

pub mod port;
pub mod types;
