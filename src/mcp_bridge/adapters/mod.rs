//! Adapter implementations for the fleet bridge ports.

pub mod file;
pub mod log;
pub mod memory;
pub mod process;
pub mod protocol;
