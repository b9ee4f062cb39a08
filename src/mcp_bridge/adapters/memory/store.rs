//! In-memory descriptor store for fleet tests.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};

use crate::mcp_bridge::{
    domain::ServerDescriptor,
    ports::{ServerDescriptorStore, ServerStoreError, ServerStoreResult},
};

/// Thread-safe in-memory descriptor store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServerStore {
    state: Arc<RwLock<InMemoryStoreState>>,
}

#[derive(Debug, Default)]
struct InMemoryStoreState {
    servers: Vec<ServerDescriptor>,
    fail_loads: bool,
    fail_saves: bool,
    save_count: usize,
}

impl InMemoryServerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `servers`.
    #[must_use]
    pub fn with_servers(servers: Vec<ServerDescriptor>) -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.state.write() {
            state.servers = servers;
        }
        store
    }

    /// Makes subsequent saves fail until reset.
    pub fn set_fail_saves(&self, fail: bool) {
        if let Ok(mut state) = self.state.write() {
            state.fail_saves = fail;
        }
    }

    /// Makes subsequent loads fail until reset.
    pub fn set_fail_loads(&self, fail: bool) {
        if let Ok(mut state) = self.state.write() {
            state.fail_loads = fail;
        }
    }

    /// Returns how many saves succeeded.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.state.read().map_or(0, |state| state.save_count)
    }

    /// Returns the last persisted list.
    #[must_use]
    pub fn persisted(&self) -> Vec<ServerDescriptor> {
        self.state
            .read()
            .map(|state| state.servers.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ServerDescriptorStore for InMemoryServerStore {
    async fn load(&self) -> ServerStoreResult<Vec<ServerDescriptor>> {
        let state = self
            .state
            .read()
            .map_err(|err| ServerStoreError::persistence(std::io::Error::other(err.to_string())))?;
        if state.fail_loads {
            return Err(ServerStoreError::persistence(std::io::Error::other(
                "store unavailable",
            )));
        }
        Ok(state.servers.clone())
    }

    async fn save(&self, servers: &[ServerDescriptor]) -> ServerStoreResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|err| ServerStoreError::persistence(std::io::Error::other(err.to_string())))?;
        if state.fail_saves {
            return Err(ServerStoreError::persistence(std::io::Error::other(
                "disk full",
            )));
        }
        state.servers = servers.to_vec();
        state.save_count += 1;
        Ok(())
    }
}
