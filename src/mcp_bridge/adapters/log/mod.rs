//! Notifier that reports fleet status through `tracing`.

use crate::mcp_bridge::{
    domain::{ServerId, ServerSnapshot, ToolDefinition},
    ports::ServerNotifier,
};
use tracing::{error, info};

/// Logs every push; used when no UI is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl ServerNotifier for TracingNotifier {
    fn set_servers(&self, servers: &[ServerSnapshot]) {
        let connected = servers.iter().filter(|server| server.connected).count();
        info!(total = servers.len(), connected, "server list updated");
    }

    fn update_server_tools(
        &self,
        server_id: ServerId,
        tools: &[ToolDefinition],
        connected: bool,
        enabled: bool,
    ) {
        info!(
            server_id = %server_id,
            tools = tools.len(),
            connected,
            enabled,
            "server tools updated"
        );
    }

    fn server_toggled(&self, server_id: ServerId, enabled: bool, connected: bool) {
        info!(server_id = %server_id, enabled, connected, "server toggled");
    }

    fn server_toggling(&self, _server_id: ServerId, _in_progress: bool) {}

    fn error(&self, server_id: Option<ServerId>, message: &str) {
        match server_id {
            Some(id) => error!(server_id = %id, message, "server error"),
            None => error!(message, "fleet error"),
        }
    }
}
