//! Command and notification facade for the UI collaborator.

use super::{
    EventKind, FleetServiceError, FleetServiceResult, FleetView, ServerEvent,
    ServerLifecycleOrchestrator, Subscription,
};
use crate::mcp_bridge::{
    domain::{
        NewServer, ServerDescriptor, ServerDescriptorUpdate, ServerId, ServerName, ServerSnapshot,
        ServerTransport,
    },
    ports::{ServerDescriptorStore, ServerLauncher, ServerNotifier},
};
use mockable::Clock;
use std::sync::Arc;

/// Turns UI commands into orchestrator calls and pushes status back.
///
/// Every mutating command ends with a `set_servers` push. Failures are
/// pushed through `error` as well as returned.
pub struct ServerPanel<S, L, C>
where
    S: ServerDescriptorStore + 'static,
    L: ServerLauncher + 'static,
    C: Clock + Send + Sync + 'static,
{
    orchestrator: ServerLifecycleOrchestrator<S, L, C>,
    notifier: Arc<dyn ServerNotifier>,
    subscriptions: Vec<Subscription>,
}

impl<S, L, C> ServerPanel<S, L, C>
where
    S: ServerDescriptorStore + 'static,
    L: ServerLauncher + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a panel and subscribes it to the orchestrator's events.
    #[must_use]
    pub fn new(
        orchestrator: ServerLifecycleOrchestrator<S, L, C>,
        notifier: Arc<dyn ServerNotifier>,
    ) -> Self {
        let subscriptions = subscribe(&orchestrator, &notifier);
        Self {
            orchestrator,
            notifier,
            subscriptions,
        }
    }

    /// Returns the orchestrator behind the panel.
    #[must_use]
    pub const fn orchestrator(&self) -> &ServerLifecycleOrchestrator<S, L, C> {
        &self.orchestrator
    }

    /// Adds a disabled server.
    ///
    /// # Errors
    ///
    /// Returns [`FleetServiceError`] when the name is invalid or persisting
    /// fails.
    pub async fn add_server(
        &self,
        name: &str,
        transport: ServerTransport,
    ) -> FleetServiceResult<ServerDescriptor> {
        let result = match ServerName::new(name) {
            Ok(server_name) => {
                self.orchestrator
                    .add_server(NewServer::new(server_name, transport))
                    .await
            }
            Err(err) => Err(err.into()),
        };
        self.finish(None, result)
    }

    /// Removes a server after full teardown.
    ///
    /// # Errors
    ///
    /// Returns [`FleetServiceError::NotFound`] for an unknown id and
    /// [`FleetServiceError::Store`] when persisting fails.
    pub async fn remove_server(&self, server_id: ServerId) -> FleetServiceResult<()> {
        let result = match self.orchestrator.remove_server(server_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(FleetServiceError::NotFound(server_id)),
            Err(err) => Err(err),
        };
        self.finish(Some(server_id), result)
    }

    /// Applies a partial edit.
    ///
    /// # Errors
    ///
    /// Returns [`FleetServiceError`] when the id is unknown, the edit is
    /// invalid or persisting fails.
    pub async fn edit_server(
        &self,
        server_id: ServerId,
        update: ServerDescriptorUpdate,
    ) -> FleetServiceResult<ServerDescriptor> {
        let result = self
            .orchestrator
            .update_server(server_id, update)
            .await
            .and_then(|updated| updated.ok_or(FleetServiceError::NotFound(server_id)));
        self.finish(Some(server_id), result)
    }

    /// Enables or disables a server, starting or stopping it.
    ///
    /// Pushes `server_toggling(true)`, then `server_toggled` with the
    /// resulting state, then `server_toggling(false)`.
    ///
    /// # Errors
    ///
    /// Returns [`FleetServiceError`] when the id is unknown or persisting
    /// fails.
    pub async fn toggle_server(
        &self,
        server_id: ServerId,
        enabled: bool,
    ) -> FleetServiceResult<ServerSnapshot> {
        self.notifier.server_toggling(server_id, true);
        let result = match self
            .orchestrator
            .update_server(server_id, ServerDescriptorUpdate::enabled(enabled))
            .await
        {
            Ok(Some(_)) => self
                .orchestrator
                .snapshot(server_id)
                .ok_or(FleetServiceError::NotFound(server_id)),
            Ok(None) => Err(FleetServiceError::NotFound(server_id)),
            Err(err) => Err(err),
        };
        if let Ok(snapshot) = &result {
            self.notifier.server_toggled(
                server_id,
                snapshot.descriptor.enabled(),
                snapshot.connected,
            );
        }
        self.notifier.server_toggling(server_id, false);
        self.finish(Some(server_id), result)
    }

    /// Returns every server with its status and pushes `set_servers`.
    pub fn get_servers(&self) -> Vec<ServerSnapshot> {
        let snapshots = self.orchestrator.snapshots();
        self.notifier.set_servers(&snapshots);
        snapshots
    }

    /// Pushes `set_servers` with the current fleet.
    pub fn refresh(&self) {
        self.notifier.set_servers(&self.orchestrator.snapshots());
    }

    /// Unsubscribes from fleet events. Idempotent.
    pub fn detach(&self) {
        for subscription in &self.subscriptions {
            subscription.dispose();
        }
    }

    fn finish<T>(
        &self,
        server_id: Option<ServerId>,
        result: FleetServiceResult<T>,
    ) -> FleetServiceResult<T> {
        if let Err(err) = &result {
            self.notifier.error(server_id, &err.to_string());
        }
        self.refresh();
        result
    }
}

fn subscribe<S, L, C>(
    orchestrator: &ServerLifecycleOrchestrator<S, L, C>,
    notifier: &Arc<dyn ServerNotifier>,
) -> Vec<Subscription>
where
    S: ServerDescriptorStore + 'static,
    L: ServerLauncher + 'static,
    C: Clock + Send + Sync + 'static,
{
    let bus = orchestrator.bus();

    let view = orchestrator.view();
    let tools_notifier = Arc::clone(notifier);
    let on_tools = bus.subscribe_kind(EventKind::ToolsChanged, move |event| {
        if let ServerEvent::ToolsChanged {
            server_id, tools, ..
        } = event
        {
            tools_notifier.update_server_tools(
                *server_id,
                tools,
                true,
                view.is_enabled(*server_id),
            );
        }
    });

    let view_on_stop: FleetView = orchestrator.view();
    let stop_notifier = Arc::clone(notifier);
    let on_stopped = bus.subscribe_kind(EventKind::ServerStopped, move |event| {
        let server_id = event.server_id();
        stop_notifier.update_server_tools(
            server_id,
            &[],
            false,
            view_on_stop.is_enabled(server_id),
        );
    });

    vec![on_tools, on_stopped]
}
