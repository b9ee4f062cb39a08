//! Tool server fleet management and capability bridging.
//!
//! The module keeps a persisted fleet of MCP tool servers, runs the enabled
//! ones as child processes or HTTP sessions, and republishes their tools and
//! resources in a host capability registry under server-scoped names. It
//! follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Lifecycle, connection and bridging services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;
