//! Domain model for tool server descriptors and discovered capabilities.
//!
//! The bridge domain models tool server identity, transport configuration,
//! connection status, and discovered tool and resource metadata.
//! Infrastructure concerns remain outside this boundary.

mod capability;
mod descriptor;
mod error;
mod ids;
mod snapshot;
mod status;
mod transport;

pub use capability::{
    ContentItem, ResourceContents, ResourceDefinition, ToolCallResult, ToolDefinition,
    qualify_resource_key, qualify_tool_name, sanitize_capability_name,
};
pub use descriptor::{DescriptorChanges, NewServer, ServerDescriptor, ServerDescriptorUpdate};
pub use error::{ParseConnectionStatusError, ParseServerKindError, ServerDomainError};
pub use ids::{ServerId, ServerName};
pub use snapshot::ServerSnapshot;
pub use status::ConnectionStatus;
pub use transport::{ProcessLaunch, ServerKind, ServerTransport, StreamEndpoint};
