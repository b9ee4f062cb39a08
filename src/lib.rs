//! Switchboard: bridges a fleet of MCP tool servers into a host.
//!
//! Each configured tool server is either a local process spoken to over its
//! standard streams or a remote streamable HTTP endpoint. Switchboard starts
//! the enabled ones, discovers their tools and resources, and publishes them
//! in a capability registry so a host can invoke them without knowing which
//! server answers.
//!
//! # Architecture
//!
//! Switchboard follows hexagonal architecture principles:
//!
//! - **Domain**: descriptors, names and capability types with no I/O
//! - **Ports**: traits for storage, launching, transports and the host
//! - **Adapters**: in-memory, filesystem, process and HTTP implementations
//!
//! # Modules
//!
//! - [`mcp_bridge`]: fleet lifecycle, protocol client and capability bridge
//! - [`config`]: TOML configuration for the binary
//! - [`telemetry`]: tracing subscriber setup

pub mod config;
pub mod mcp_bridge;
pub mod telemetry;
