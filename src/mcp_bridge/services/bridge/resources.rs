//! Resource registration and read forwarding.

use super::{CapabilityRegistration, Ledger, register_with_suffix, unregister_all};
use crate::mcp_bridge::{
    domain::{ResourceContents, ResourceDefinition, ServerId, qualify_resource_key},
    ports::{CapabilityRegistry, ResourceReadError, ResourceReader, ResourceRegistration},
    services::ProtocolClientConnection,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Keeps one server's resources registered in the host registry.
pub struct ResourceRegistrar {
    registry: Arc<dyn CapabilityRegistry>,
    ledger: Ledger,
}

impl ResourceRegistrar {
    pub(super) fn new(registry: Arc<dyn CapabilityRegistry>) -> Self {
        Self {
            registry,
            ledger: Ledger::default(),
        }
    }

    /// Replaces every resource registration of `server_id`.
    pub fn register_resources(
        &self,
        server_id: ServerId,
        connection: &Arc<ProtocolClientConnection>,
        resources: &[ResourceDefinition],
    ) -> Vec<CapabilityRegistration> {
        let mut ledger = self.ledger.lock();
        unregister_all(self.registry.as_ref(), &mut ledger, server_id);

        let mut seen = HashSet::new();
        let mut registered = Vec::with_capacity(resources.len());
        for resource in resources {
            if !seen.insert(resource.uri()) {
                debug!(server_id = %server_id, uri = resource.uri(), "skipping repeated resource");
                continue;
            }

            let reader: Arc<dyn ResourceReader> = Arc::new(ResourceReadAdapter {
                uri: resource.uri().to_owned(),
                connection: Arc::clone(connection),
            });
            let base = qualify_resource_key(server_id, resource.uri());
            let outcome = register_with_suffix(&base, |key| {
                self.registry.register_resource(ResourceRegistration {
                    key,
                    server_id,
                    definition: resource.clone(),
                    reader: Arc::clone(&reader),
                })
            });
            match outcome {
                Ok(handle) => registered.push(CapabilityRegistration {
                    source: resource.uri().to_owned(),
                    handle,
                }),
                Err(conflict) => error!(
                    server_id = %server_id,
                    uri = resource.uri(),
                    error = %conflict,
                    "could not register resource"
                ),
            }
        }

        info!(server_id = %server_id, count = registered.len(), "registered resources");
        if !registered.is_empty() {
            ledger.insert(server_id, registered.clone());
        }
        registered
    }

    /// Withdraws every resource registration of `server_id`.
    pub fn unregister_resources(&self, server_id: ServerId) -> usize {
        let removed = unregister_all(self.registry.as_ref(), &mut self.ledger.lock(), server_id);
        if removed > 0 {
            info!(server_id = %server_id, count = removed, "unregistered resources");
        }
        removed
    }

    /// Returns the retained registrations of `server_id`.
    #[must_use]
    pub fn registrations(&self, server_id: ServerId) -> Vec<CapabilityRegistration> {
        self.ledger.registrations(server_id)
    }
}

struct ResourceReadAdapter {
    uri: String,
    connection: Arc<ProtocolClientConnection>,
}

#[async_trait]
impl ResourceReader for ResourceReadAdapter {
    async fn read(&self) -> Result<Option<Vec<ResourceContents>>, ResourceReadError> {
        self.connection
            .read_resource(&self.uri)
            .await
            .map_err(|err| ResourceReadError {
                uri: self.uri.clone(),
                message: err.to_string(),
            })
    }
}
