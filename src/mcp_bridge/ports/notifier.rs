//! Push notifications to the UI collaborator.

use crate::mcp_bridge::domain::{ServerId, ServerSnapshot, ToolDefinition};

/// Receives fleet status pushes for rendering.
///
/// Calls are synchronous and must not block.
pub trait ServerNotifier: Send + Sync {
    /// Replaces the rendered server list.
    fn set_servers(&self, servers: &[ServerSnapshot]);

    /// Updates the tools shown for one server.
    fn update_server_tools(
        &self,
        server_id: ServerId,
        tools: &[ToolDefinition],
        connected: bool,
        enabled: bool,
    );

    /// Reports the outcome of a toggle.
    fn server_toggled(&self, server_id: ServerId, enabled: bool, connected: bool);

    /// Reports whether a toggle is in progress.
    fn server_toggling(&self, server_id: ServerId, in_progress: bool);

    /// Surfaces a user-visible error.
    fn error(&self, server_id: Option<ServerId>, message: &str);
}
