//! In-memory host capability registry.

use crate::mcp_bridge::{
    domain::{ResourceContents, ServerId},
    ports::{
        CapabilityRegistry, RegistrationConflict, RegistrationHandle, ResourceReadError,
        ResourceRegistration, ToolInvocationError, ToolOutput, ToolRegistration,
    },
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RegistryState {
    tools: BTreeMap<String, (u64, ToolRegistration)>,
    resources: BTreeMap<String, (u64, ResourceRegistration)>,
    next_token: u64,
}

/// Name-keyed registry standing in for the host's tool and resource tables.
///
/// Handles carry a token so a stale handle cannot withdraw a newer
/// registration that reused the same name.
#[derive(Clone, Default)]
pub struct InMemoryCapabilityRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl InMemoryCapabilityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns registered tool names in sorted order.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.lock().tools.keys().cloned().collect()
    }

    /// Returns registered resource keys in sorted order.
    #[must_use]
    pub fn resource_keys(&self) -> Vec<String> {
        self.lock().resources.keys().cloned().collect()
    }

    /// Returns the tool names owned by `server_id`.
    #[must_use]
    pub fn names_for_server(&self, server_id: ServerId) -> Vec<String> {
        self.lock()
            .tools
            .iter()
            .filter(|(_, (_, registration))| registration.server_id == server_id)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns the registration behind `name`.
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<ToolRegistration> {
        self.lock()
            .tools
            .get(name)
            .map(|(_, registration)| registration.clone())
    }

    /// Invokes a registered tool the way the host would.
    ///
    /// # Errors
    ///
    /// Returns [`ToolInvocationError::Failed`] for unknown names and
    /// whatever the invoker reports otherwise.
    pub async fn invoke_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<ToolOutput, ToolInvocationError> {
        let Some(registration) = self.tool(name) else {
            return Err(ToolInvocationError::Failed {
                tool: name.to_owned(),
                message: "not registered".to_owned(),
            });
        };
        registration.invoker.invoke(arguments, cancellation).await
    }

    /// Reads a registered resource the way the host would.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceReadError`] for unknown keys and failed reads.
    pub async fn read_resource(
        &self,
        key: &str,
    ) -> Result<Option<Vec<ResourceContents>>, ResourceReadError> {
        let reader = self
            .lock()
            .resources
            .get(key)
            .map(|(_, registration)| Arc::clone(&registration.reader));
        let Some(resource_reader) = reader else {
            return Err(ResourceReadError {
                uri: key.to_owned(),
                message: "not registered".to_owned(),
            });
        };
        resource_reader.read().await
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CapabilityRegistry for InMemoryCapabilityRegistry {
    fn register_tool(
        &self,
        registration: ToolRegistration,
    ) -> Result<RegistrationHandle, RegistrationConflict> {
        let mut state = self.lock();
        if state.tools.contains_key(&registration.qualified_name) {
            return Err(RegistrationConflict(registration.qualified_name));
        }
        state.next_token += 1;
        let token = state.next_token;
        let handle = RegistrationHandle::new(registration.qualified_name.clone(), token);
        state
            .tools
            .insert(registration.qualified_name.clone(), (token, registration));
        Ok(handle)
    }

    fn register_resource(
        &self,
        registration: ResourceRegistration,
    ) -> Result<RegistrationHandle, RegistrationConflict> {
        let mut state = self.lock();
        if state.resources.contains_key(&registration.key) {
            return Err(RegistrationConflict(registration.key));
        }
        state.next_token += 1;
        let token = state.next_token;
        let handle = RegistrationHandle::new(registration.key.clone(), token);
        state
            .resources
            .insert(registration.key.clone(), (token, registration));
        Ok(handle)
    }

    fn unregister(&self, handle: &RegistrationHandle) -> bool {
        let mut state = self.lock();
        let owns_tool = state
            .tools
            .get(handle.name())
            .is_some_and(|(token, _)| *token == handle.token());
        if owns_tool {
            state.tools.remove(handle.name());
            return true;
        }
        let owns_resource = state
            .resources
            .get(handle.name())
            .is_some_and(|(token, _)| *token == handle.token());
        if owns_resource {
            state.resources.remove(handle.name());
        }
        owns_resource
    }
}
