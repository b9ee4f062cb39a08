//! Persistence port for tool server descriptors.

use crate::mcp_bridge::domain::ServerDescriptor;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for descriptor store operations.
pub type ServerStoreResult<T> = Result<T, ServerStoreError>;

/// Durable storage of the descriptor list.
///
/// The whole list is read and written at once; callers await `save` before
/// acknowledging a mutation as complete.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServerDescriptorStore: Send + Sync {
    /// Reads every persisted descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ServerStoreError`] when storage cannot be read or decoded.
    async fn load(&self) -> ServerStoreResult<Vec<ServerDescriptor>>;

    /// Replaces the persisted list.
    ///
    /// # Errors
    ///
    /// Returns [`ServerStoreError::Persistence`] when the write fails.
    async fn save(&self, servers: &[ServerDescriptor]) -> ServerStoreResult<()>;
}

/// Errors returned by descriptor store implementations.
#[derive(Debug, Clone, Error)]
pub enum ServerStoreError {
    /// Persisted data could not be decoded into domain types.
    #[error("invalid persisted tool server data: {0}")]
    InvalidPersistedData(Arc<dyn std::error::Error + Send + Sync>),

    /// Storage-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl ServerStoreError {
    /// Wraps persisted-data decoding or validation failures.
    pub fn invalid_persisted_data(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::InvalidPersistedData(Arc::new(err))
    }

    /// Wraps a storage-layer failure.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
