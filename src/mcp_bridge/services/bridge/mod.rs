//! Capability bridge between running tool servers and the host registry.
//!
//! The bridge keeps the registry equal to the union of tools and resources
//! reported by running connections. Every update for a server is one
//! synchronous unregister-then-register sequence, so the registry never
//! holds two entries for the same server capability.

mod placeholders;
mod resources;
mod tools;

pub use placeholders::{SERVER_ID_PLACEHOLDER, SERVER_NAME_PLACEHOLDER, substitute_placeholders};
pub use resources::ResourceRegistrar;
pub use tools::{EMPTY_RESULT_TEXT, ToolRegistrar};

use super::{EventBus, EventKind, ProtocolClientConnection, ServerEvent, Subscription};
use crate::mcp_bridge::{
    domain::{ResourceDefinition, ServerId, ServerName, ToolDefinition},
    ports::{CapabilityRegistry, RegistrationConflict, RegistrationHandle},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Highest numeric suffix tried when a qualified name is taken.
const MAX_NAME_SUFFIX: usize = 100;

/// One registration retained for later disposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRegistration {
    /// Tool name or resource URI as reported by the server.
    pub source: String,
    /// Handle returned by the registry.
    pub handle: RegistrationHandle,
}

impl CapabilityRegistration {
    /// Returns the registered qualified name or key.
    #[must_use]
    pub fn qualified_name(&self) -> &str {
        self.handle.name()
    }
}

/// Per-server bookkeeping shared by the tool and resource registrars.
#[derive(Default)]
struct Ledger {
    by_server: Mutex<HashMap<ServerId, Vec<CapabilityRegistration>>>,
}

impl Ledger {
    fn lock(&self) -> MutexGuard<'_, HashMap<ServerId, Vec<CapabilityRegistration>>> {
        self.by_server.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registrations(&self, server_id: ServerId) -> Vec<CapabilityRegistration> {
        self.lock().get(&server_id).cloned().unwrap_or_default()
    }
}

/// Disposes every retained registration of `server_id`.
fn unregister_all(
    registry: &dyn CapabilityRegistry,
    ledger: &mut HashMap<ServerId, Vec<CapabilityRegistration>>,
    server_id: ServerId,
) -> usize {
    let Some(previous) = ledger.remove(&server_id) else {
        return 0;
    };
    for registration in &previous {
        if !registry.unregister(&registration.handle) {
            warn!(
                server_id = %server_id,
                name = registration.qualified_name(),
                "registration was already gone"
            );
        }
    }
    previous.len()
}

/// Registers under `base`, or `base_2`, `base_3`, … when taken.
fn register_with_suffix(
    base: &str,
    mut register: impl FnMut(String) -> Result<RegistrationHandle, RegistrationConflict>,
) -> Result<RegistrationHandle, RegistrationConflict> {
    let mut last_conflict = match register(base.to_owned()) {
        Ok(handle) => return Ok(handle),
        Err(conflict) => conflict,
    };
    for suffix in 2..=MAX_NAME_SUFFIX {
        match register(format!("{base}_{suffix}")) {
            Ok(handle) => return Ok(handle),
            Err(conflict) => last_conflict = conflict,
        }
    }
    Err(last_conflict)
}

/// Registers discovered tools and resources in the host registry.
#[derive(Clone)]
pub struct CapabilityBridge {
    tools: Arc<ToolRegistrar>,
    resources: Arc<ResourceRegistrar>,
}

impl CapabilityBridge {
    /// Creates a bridge writing to `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn CapabilityRegistry>) -> Self {
        Self {
            tools: Arc::new(ToolRegistrar::new(Arc::clone(&registry))),
            resources: Arc::new(ResourceRegistrar::new(registry)),
        }
    }

    /// Returns the tool registrar.
    #[must_use]
    pub fn tools(&self) -> &ToolRegistrar {
        &self.tools
    }

    /// Returns the resource registrar.
    #[must_use]
    pub fn resources(&self) -> &ResourceRegistrar {
        &self.resources
    }

    /// Replaces the tool registrations of a server. See
    /// [`ToolRegistrar::register_tools`].
    pub fn register_tools(
        &self,
        server_id: ServerId,
        server_name: &ServerName,
        connection: &Arc<ProtocolClientConnection>,
        tools: &[ToolDefinition],
    ) -> Vec<CapabilityRegistration> {
        self.tools
            .register_tools(server_id, server_name, connection, tools)
    }

    /// Withdraws the tool registrations of a server.
    pub fn unregister_tools(&self, server_id: ServerId) -> usize {
        self.tools.unregister_tools(server_id)
    }

    /// Replaces the resource registrations of a server.
    pub fn register_resources(
        &self,
        server_id: ServerId,
        connection: &Arc<ProtocolClientConnection>,
        resources: &[ResourceDefinition],
    ) -> Vec<CapabilityRegistration> {
        self.resources
            .register_resources(server_id, connection, resources)
    }

    /// Withdraws the resource registrations of a server.
    pub fn unregister_resources(&self, server_id: ServerId) -> usize {
        self.resources.unregister_resources(server_id)
    }

    /// Subscribes the bridge to fleet events.
    ///
    /// `ToolsChanged` and `ResourcesChanged` replace a server's
    /// registrations; an empty list withdraws them. `ServerStopped`
    /// withdraws both kinds unconditionally.
    pub fn attach(&self, bus: &EventBus) -> BridgeAttachment {
        let tools = Arc::clone(&self.tools);
        let on_tools = bus.subscribe_kind(EventKind::ToolsChanged, move |event| {
            if let ServerEvent::ToolsChanged {
                server_id,
                server_name,
                connection,
                tools: discovered,
            } = event
            {
                if discovered.is_empty() {
                    tools.unregister_tools(*server_id);
                } else {
                    tools.register_tools(*server_id, server_name, connection, discovered);
                }
            }
        });

        let resources = Arc::clone(&self.resources);
        let on_resources = bus.subscribe_kind(EventKind::ResourcesChanged, move |event| {
            if let ServerEvent::ResourcesChanged {
                server_id,
                connection,
                resources: discovered,
                ..
            } = event
            {
                if discovered.is_empty() {
                    resources.unregister_resources(*server_id);
                } else {
                    resources.register_resources(*server_id, connection, discovered);
                }
            }
        });

        let tools_on_stop = Arc::clone(&self.tools);
        let resources_on_stop = Arc::clone(&self.resources);
        let on_stopped = bus.subscribe_kind(EventKind::ServerStopped, move |event| {
            let server_id = event.server_id();
            tools_on_stop.unregister_tools(server_id);
            resources_on_stop.unregister_resources(server_id);
        });

        BridgeAttachment {
            subscriptions: vec![on_tools, on_resources, on_stopped],
        }
    }
}

/// Live event subscriptions of an attached bridge. Dropping it detaches.
#[must_use = "dropping the attachment detaches the bridge"]
#[derive(Debug)]
pub struct BridgeAttachment {
    subscriptions: Vec<Subscription>,
}

impl BridgeAttachment {
    /// Detaches the bridge from the bus. Idempotent.
    pub fn detach(&self) {
        for subscription in &self.subscriptions {
            subscription.dispose();
        }
    }
}
