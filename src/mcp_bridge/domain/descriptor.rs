//! Tool server descriptor aggregate root.

use super::{ServerDomainError, ServerId, ServerKind, ServerName, ServerTransport};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Persisted, user-editable record describing how to reach one tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    id: ServerId,
    name: ServerName,
    transport: ServerTransport,
    #[serde(default)]
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for adding a tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewServer {
    /// Display name.
    pub name: ServerName,
    /// Transport settings.
    pub transport: ServerTransport,
}

impl NewServer {
    /// Creates a new server request.
    #[must_use]
    pub const fn new(name: ServerName, transport: ServerTransport) -> Self {
        Self { name, transport }
    }
}

/// Partial edit of a descriptor.
///
/// `None` leaves a field untouched. `auth_token: Some(None)` clears the token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerDescriptorUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New launch command (process servers).
    pub command: Option<String>,
    /// New launch arguments (process servers).
    pub args: Option<Vec<String>>,
    /// New extra environment (process servers).
    pub env: Option<BTreeMap<String, String>>,
    /// New endpoint URL (stream servers).
    pub endpoint_url: Option<String>,
    /// New bearer token or `Some(None)` to clear it (stream servers).
    pub auth_token: Option<Option<String>>,
    /// New enabled intent.
    pub enabled: Option<bool>,
}

impl ServerDescriptorUpdate {
    /// Creates an update that only flips the enabled intent.
    #[must_use]
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    /// Sets the new display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the new launch command.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Sets the new launch arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args = Some(args.into_iter().collect());
        self
    }

    /// Sets the new extra environment.
    #[must_use]
    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = Some(env.into_iter().collect());
        self
    }

    /// Sets the new endpoint URL.
    #[must_use]
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    /// Sets or clears the bearer token.
    #[must_use]
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = Some(token);
        self
    }

    /// Sets the enabled intent.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }
}

/// Aspects of a descriptor changed by [`ServerDescriptor::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorChanges {
    /// Command, arguments, environment, endpoint URL or token changed.
    pub launch_changed: bool,
    /// The enabled intent changed.
    pub enabled_changed: bool,
    /// The display name changed.
    pub name_changed: bool,
}

impl DescriptorChanges {
    /// Returns whether anything changed.
    #[must_use]
    pub const fn any(self) -> bool {
        self.launch_changed || self.enabled_changed || self.name_changed
    }
}

impl ServerDescriptor {
    /// Creates a new, disabled descriptor with a fresh identifier.
    #[must_use]
    pub fn new(request: NewServer, clock: &impl Clock) -> Self {
        let timestamp = clock.utc();
        Self {
            id: ServerId::new(),
            name: request.name,
            transport: request.transport,
            enabled: false,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Returns the server identifier.
    #[must_use]
    pub const fn id(&self) -> ServerId {
        self.id
    }

    /// Returns the display name.
    #[must_use]
    pub const fn name(&self) -> &ServerName {
        &self.name
    }

    /// Returns the transport settings.
    #[must_use]
    pub const fn transport(&self) -> &ServerTransport {
        &self.transport
    }

    /// Returns the server kind.
    #[must_use]
    pub const fn kind(&self) -> ServerKind {
        self.transport.kind()
    }

    /// Returns the enabled intent.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Sets the enabled intent, returning whether it changed.
    pub fn set_enabled(&mut self, enabled: bool, clock: &impl Clock) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        self.touch(clock);
        true
    }

    /// Merges a partial edit into the descriptor.
    ///
    /// The identifier and kind are preserved. The edit is applied atomically:
    /// on error the descriptor is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ServerDomainError`] when a field fails validation or belongs
    /// to the other transport kind.
    pub fn apply(
        &mut self,
        update: ServerDescriptorUpdate,
        clock: &impl Clock,
    ) -> Result<DescriptorChanges, ServerDomainError> {
        let ServerDescriptorUpdate {
            name,
            command,
            args,
            env,
            endpoint_url,
            auth_token,
            enabled,
        } = update;

        let new_name = name.map(ServerName::new).transpose()?;
        let mut transport = self.transport.clone();
        let mut launch_changed = false;
        if let Some(value) = command {
            launch_changed |= transport.set_command(value)?;
        }
        if let Some(value) = args {
            launch_changed |= transport.set_args(value)?;
        }
        if let Some(value) = env {
            launch_changed |= transport.set_env(value)?;
        }
        if let Some(value) = endpoint_url {
            launch_changed |= transport.set_endpoint_url(value)?;
        }
        if let Some(value) = auth_token {
            launch_changed |= transport.set_auth_token(value)?;
        }

        let changes = DescriptorChanges {
            launch_changed,
            enabled_changed: enabled.is_some_and(|value| value != self.enabled),
            name_changed: new_name.as_ref().is_some_and(|value| *value != self.name),
        };

        self.transport = transport;
        if let Some(value) = new_name {
            self.name = value;
        }
        if let Some(value) = enabled {
            self.enabled = value;
        }
        if changes.any() {
            self.touch(clock);
        }
        Ok(changes)
    }

    fn touch(&mut self, clock: &impl Clock) {
        self.updated_at = clock.utc();
    }
}
