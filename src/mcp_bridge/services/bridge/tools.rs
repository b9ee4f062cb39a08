//! Tool registration and invocation forwarding.

use super::{
    CapabilityRegistration, Ledger, register_with_suffix, substitute_placeholders, unregister_all,
};
use crate::mcp_bridge::{
    domain::{ContentItem, ServerId, ServerName, ToolCallResult, ToolDefinition, qualify_tool_name},
    ports::{
        CapabilityRegistry, OutputPart, ToolInvocationError, ToolInvoker, ToolOutput,
        ToolRegistration,
    },
    services::ProtocolClientConnection,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Text returned when a tool succeeds without content.
pub const EMPTY_RESULT_TEXT: &str = "Tool executed successfully but returned no content";

/// Keeps one server's tools registered in the host registry.
pub struct ToolRegistrar {
    registry: Arc<dyn CapabilityRegistry>,
    ledger: Ledger,
}

impl ToolRegistrar {
    pub(super) fn new(registry: Arc<dyn CapabilityRegistry>) -> Self {
        Self {
            registry,
            ledger: Ledger::default(),
        }
    }

    /// Replaces every tool registration of `server_id`.
    ///
    /// Prior registrations are withdrawn first. Repeated names in `tools` are
    /// skipped. Names that collide after qualification get `_2`, `_3`, …
    /// suffixes in list order.
    pub fn register_tools(
        &self,
        server_id: ServerId,
        server_name: &ServerName,
        connection: &Arc<ProtocolClientConnection>,
        tools: &[ToolDefinition],
    ) -> Vec<CapabilityRegistration> {
        let mut ledger = self.ledger.lock();
        unregister_all(self.registry.as_ref(), &mut ledger, server_id);

        let mut seen = HashSet::new();
        let mut registered = Vec::with_capacity(tools.len());
        for tool in tools {
            if !seen.insert(tool.name()) {
                debug!(server_id = %server_id, tool = tool.name(), "skipping repeated tool name");
                continue;
            }

            let invoker: Arc<dyn ToolInvoker> = Arc::new(ToolInvocationAdapter {
                server_id,
                server_name: server_name.clone(),
                tool: tool.name().to_owned(),
                connection: Arc::clone(connection),
            });
            let base = qualify_tool_name(server_id, tool.name());
            let outcome = register_with_suffix(&base, |qualified_name| {
                self.registry.register_tool(ToolRegistration {
                    qualified_name,
                    server_id,
                    server_name: server_name.clone(),
                    definition: tool.clone(),
                    invoker: Arc::clone(&invoker),
                })
            });
            match outcome {
                Ok(handle) => registered.push(CapabilityRegistration {
                    source: tool.name().to_owned(),
                    handle,
                }),
                Err(conflict) => error!(
                    server_id = %server_id,
                    tool = tool.name(),
                    error = %conflict,
                    "could not register tool"
                ),
            }
        }

        info!(
            server_id = %server_id,
            server = %server_name,
            count = registered.len(),
            "registered tools"
        );
        if !registered.is_empty() {
            ledger.insert(server_id, registered.clone());
        }
        registered
    }

    /// Withdraws every tool registration of `server_id`. Safe when none exist.
    pub fn unregister_tools(&self, server_id: ServerId) -> usize {
        let removed = unregister_all(self.registry.as_ref(), &mut self.ledger.lock(), server_id);
        if removed > 0 {
            info!(server_id = %server_id, count = removed, "unregistered tools");
        }
        removed
    }

    /// Returns the retained registrations of `server_id`.
    #[must_use]
    pub fn registrations(&self, server_id: ServerId) -> Vec<CapabilityRegistration> {
        self.ledger.registrations(server_id)
    }
}

/// Forwards host invocations of one tool to its server.
struct ToolInvocationAdapter {
    server_id: ServerId,
    server_name: ServerName,
    tool: String,
    connection: Arc<ProtocolClientConnection>,
}

#[async_trait]
impl ToolInvoker for ToolInvocationAdapter {
    async fn invoke(
        &self,
        arguments: Map<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<ToolOutput, ToolInvocationError> {
        let prepared = substitute_placeholders(arguments, &self.server_name, self.server_id);
        let call = self.connection.call_tool(&self.tool, prepared);

        let result = tokio::select! {
            biased;
            () = cancellation.cancelled() => {
                debug!(server_id = %self.server_id, tool = %self.tool, "tool call cancelled");
                return Err(ToolInvocationError::Cancelled {
                    tool: self.tool.clone(),
                });
            }
            result = call => result,
        };

        match result {
            Ok(call_result) => Ok(to_output(call_result)),
            Err(err) => {
                warn!(
                    server_id = %self.server_id,
                    tool = %self.tool,
                    error = %err,
                    "tool call failed"
                );
                Err(ToolInvocationError::Failed {
                    tool: self.tool.clone(),
                    message: err.to_string(),
                })
            }
        }
    }
}

/// Maps protocol content items to host output parts.
fn to_output(result: ToolCallResult) -> ToolOutput {
    let mut parts: Vec<OutputPart> = result
        .content
        .into_iter()
        .filter_map(|item| match item {
            ContentItem::Text { text } => Some(OutputPart::Text(text)),
            ContentItem::Image { data, mime_type } => Some(OutputPart::Image { data, mime_type }),
            ContentItem::Audio { data, mime_type } => Some(OutputPart::Audio { data, mime_type }),
            ContentItem::Resource { resource } => Some(OutputPart::Resource(resource)),
            ContentItem::Unsupported => None,
        })
        .collect();
    if parts.is_empty() {
        parts.push(OutputPart::Text(EMPTY_RESULT_TEXT.to_owned()));
    }
    ToolOutput {
        parts,
        is_error: result.is_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_gets_default_text() {
        let output = to_output(ToolCallResult::default());
        assert_eq!(output.parts, vec![OutputPart::Text(EMPTY_RESULT_TEXT.to_owned())]);
        assert!(!output.is_error);
    }

    #[test]
    fn unsupported_items_are_dropped() {
        let output = to_output(ToolCallResult::success(vec![
            ContentItem::Unsupported,
            ContentItem::text("pong"),
        ]));
        assert_eq!(output.parts, vec![OutputPart::Text("pong".to_owned())]);
    }
}
