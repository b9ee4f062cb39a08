//! Service layer for tool server fleet orchestration.
//!
//! [`ServerLifecycleOrchestrator`] is the single source of truth for which
//! servers exist and which are running. Operations on one server id are
//! serialized by a per-id async lock; operations on different ids run
//! independently. Shared maps sit behind a synchronous mutex that is never
//! held across an await, and events are emitted after it is released.

use super::{
    ConnectionSettings, EventBus, ProtocolClientConnection, ServerEvent, StopReason,
};
use crate::mcp_bridge::{
    domain::{
        NewServer, ResourceDefinition, ServerDescriptor, ServerDescriptorUpdate,
        ServerDomainError, ServerId, ServerName, ServerSnapshot, ToolDefinition,
    },
    ports::{
        LogSink, ProcessControl, ProcessExit, ServerDescriptorStore, ServerLauncher,
        ServerNotifier, ServerStoreError, SpawnedProcess,
    },
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use mockable::Clock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tracing::{debug, error, info, warn};

/// Service-level errors for fleet operations.
#[derive(Debug, Error)]
pub enum FleetServiceError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] ServerDomainError),
    /// Persisting descriptors failed.
    #[error(transparent)]
    Store(#[from] ServerStoreError),
    /// No server exists with the given identifier.
    #[error("tool server {0} not found")]
    NotFound(ServerId),
}

/// Result type for fleet service operations.
pub type FleetServiceResult<T> = Result<T, FleetServiceError>;

/// Outcome of [`ServerLifecycleOrchestrator::start_server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new connection runtime was registered.
    Started,
    /// A runtime already existed; nothing was done.
    AlreadyRunning,
    /// No descriptor has the given id.
    NotFound,
    /// Launch or connect failed; the error was surfaced to the user.
    Failed {
        /// User-visible failure message.
        message: String,
    },
}

impl StartOutcome {
    /// Returns whether a runtime exists after the call.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Started | Self::AlreadyRunning)
    }
}

/// Tunables for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Retry policy for new connections.
    pub connection: ConnectionSettings,
    /// Time granted after SIGTERM, and again after a forced kill.
    pub stop_grace: Duration,
    /// Stderr lines quoted in crash and start failure messages.
    pub log_tail_lines: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings::default(),
            stop_grace: Duration::from_secs(5),
            log_tail_lines: 20,
        }
    }
}

struct RuntimeProcess {
    pid: Option<u32>,
    exit: watch::Receiver<Option<ProcessExit>>,
    control: Arc<dyn ProcessControl>,
}

struct ConnectionRuntime {
    generation: u64,
    connection: Arc<ProtocolClientConnection>,
    process: Option<RuntimeProcess>,
    logs: LogSink,
    tools: Vec<ToolDefinition>,
    resources: Vec<ResourceDefinition>,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct FleetState {
    descriptors: Vec<ServerDescriptor>,
    runtimes: HashMap<ServerId, ConnectionRuntime>,
    expected_stops: HashSet<u64>,
    next_generation: u64,
}

impl FleetState {
    fn descriptor(&self, server_id: ServerId) -> Option<&ServerDescriptor> {
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.id() == server_id)
    }

    fn descriptor_mut(&mut self, server_id: ServerId) -> Option<&mut ServerDescriptor> {
        self.descriptors
            .iter_mut()
            .find(|descriptor| descriptor.id() == server_id)
    }

    fn snapshot(&self, descriptor: &ServerDescriptor) -> ServerSnapshot {
        self.runtimes.get(&descriptor.id()).map_or_else(
            || ServerSnapshot::stopped(descriptor.clone()),
            |runtime| ServerSnapshot {
                descriptor: descriptor.clone(),
                connected: true,
                tools: runtime.tools.clone(),
                resources: runtime.resources.clone(),
            },
        )
    }
}

/// Read-only view of the fleet.
///
/// Holds no reference to the event bus, so it can be captured by event
/// subscribers without forming a reference cycle.
#[derive(Clone)]
pub struct FleetView {
    fleet: Arc<Mutex<FleetState>>,
}

impl FleetView {
    /// Returns every descriptor with its runtime status, in insertion order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<ServerSnapshot> {
        let fleet = self.lock();
        fleet
            .descriptors
            .iter()
            .map(|descriptor| fleet.snapshot(descriptor))
            .collect()
    }

    /// Returns one descriptor with its runtime status.
    #[must_use]
    pub fn snapshot(&self, server_id: ServerId) -> Option<ServerSnapshot> {
        let fleet = self.lock();
        fleet
            .descriptor(server_id)
            .map(|descriptor| fleet.snapshot(descriptor))
    }

    /// Returns the enabled intent of a server; `false` when unknown.
    #[must_use]
    pub fn is_enabled(&self, server_id: ServerId) -> bool {
        self.lock()
            .descriptor(server_id)
            .is_some_and(ServerDescriptor::enabled)
    }

    /// Returns whether a connection runtime exists for the id.
    #[must_use]
    pub fn is_running(&self, server_id: ServerId) -> bool {
        self.lock().runtimes.contains_key(&server_id)
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.fleet.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pieces of a successful launch and handshake, before registration.
struct Launched {
    generation: u64,
    connection: Arc<ProtocolClientConnection>,
    process: Option<RuntimeProcess>,
    logs: LogSink,
}

/// Tool server fleet orchestration service.
pub struct ServerLifecycleOrchestrator<S, L, C>
where
    S: ServerDescriptorStore + 'static,
    L: ServerLauncher + 'static,
    C: Clock + Send + Sync + 'static,
{
    store: Arc<S>,
    launcher: Arc<L>,
    clock: Arc<C>,
    bus: EventBus,
    notifier: Arc<dyn ServerNotifier>,
    settings: OrchestratorSettings,
    fleet: Arc<Mutex<FleetState>>,
    operation_locks: Arc<Mutex<HashMap<ServerId, Arc<AsyncMutex<()>>>>>,
    persist_lock: Arc<AsyncMutex<()>>,
}

impl<S, L, C> Clone for ServerLifecycleOrchestrator<S, L, C>
where
    S: ServerDescriptorStore + 'static,
    L: ServerLauncher + 'static,
    C: Clock + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            launcher: Arc::clone(&self.launcher),
            clock: Arc::clone(&self.clock),
            bus: self.bus.clone(),
            notifier: Arc::clone(&self.notifier),
            settings: self.settings,
            fleet: Arc::clone(&self.fleet),
            operation_locks: Arc::clone(&self.operation_locks),
            persist_lock: Arc::clone(&self.persist_lock),
        }
    }
}

impl<S, L, C> ServerLifecycleOrchestrator<S, L, C>
where
    S: ServerDescriptorStore + 'static,
    L: ServerLauncher + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates an orchestrator with an empty fleet.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        launcher: Arc<L>,
        clock: Arc<C>,
        bus: EventBus,
        notifier: Arc<dyn ServerNotifier>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            launcher,
            clock,
            bus,
            notifier,
            settings,
            fleet: Arc::new(Mutex::new(FleetState::default())),
            operation_locks: Arc::new(Mutex::new(HashMap::new())),
            persist_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Returns the event bus lifecycle events are emitted on.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Reads persisted descriptors into the fleet.
    ///
    /// Never fails: a read failure is logged and yields an empty list, and
    /// the in-memory fleet is left as it was.
    pub async fn load_servers(&self) -> Vec<ServerDescriptor> {
        match self.store.load().await {
            Ok(descriptors) => {
                info!(count = descriptors.len(), "loaded tool server descriptors");
                self.lock_fleet().descriptors.clone_from(&descriptors);
                descriptors
            }
            Err(err) => {
                warn!(error = %err, "failed to load tool server descriptors");
                Vec::new()
            }
        }
    }

    /// Adds a disabled descriptor with a fresh id and persists the fleet.
    ///
    /// # Errors
    ///
    /// Returns [`FleetServiceError::Store`] when persisting fails; the
    /// descriptor is not kept in that case.
    pub async fn add_server(&self, request: NewServer) -> FleetServiceResult<ServerDescriptor> {
        let descriptor = ServerDescriptor::new(request, &*self.clock);
        let server_id = descriptor.id();
        self.lock_fleet().descriptors.push(descriptor.clone());

        if let Err(err) = self.persist().await {
            self.lock_fleet()
                .descriptors
                .retain(|existing| existing.id() != server_id);
            return Err(err.into());
        }

        info!(server_id = %server_id, server = %descriptor.name(), "tool server added");
        Ok(descriptor)
    }

    /// Merges a partial edit, persists it and reconciles the runtime.
    ///
    /// A running server whose launch configuration changed is restarted, or
    /// stopped when the same edit disables it. Otherwise an `enabled` change
    /// starts or stops the server. Returns `None` when the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`FleetServiceError::Domain`] when the edit is invalid and
    /// [`FleetServiceError::Store`] when persisting fails; the descriptor is
    /// unchanged in both cases.
    pub async fn update_server(
        &self,
        server_id: ServerId,
        update: ServerDescriptorUpdate,
    ) -> FleetServiceResult<Option<ServerDescriptor>> {
        let operation = self.operation_lock(server_id);
        let _guard = operation.lock().await;

        let applied = {
            let mut fleet = self.lock_fleet();
            let Some(descriptor) = fleet.descriptor_mut(server_id) else {
                return Ok(None);
            };
            let previous = descriptor.clone();
            let changes = descriptor.apply(update, &*self.clock)?;
            (previous, descriptor.clone(), changes)
        };
        let (previous, updated, changes) = applied;

        if changes.any() {
            if let Err(err) = self.persist().await {
                if let Some(descriptor) = self.lock_fleet().descriptor_mut(server_id) {
                    *descriptor = previous;
                }
                return Err(err.into());
            }
        }

        let running = self.is_running(server_id);
        let disabling = changes.enabled_changed && !updated.enabled();
        if running && changes.launch_changed && !disabling {
            info!(server_id = %server_id, "launch configuration changed; restarting");
            self.stop_locked(server_id).await;
            self.start_locked(server_id).await;
        } else if running && disabling {
            self.stop_locked(server_id).await;
        } else if !running && updated.enabled() {
            self.start_locked(server_id).await;
        } else if running && changes.name_changed {
            self.republish(server_id, updated.name());
        }

        Ok(self.descriptor(server_id).or(Some(updated)))
    }

    /// Stops the server if running, deletes its descriptor and persists.
    ///
    /// Returns `false` when the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`FleetServiceError::Store`] when persisting fails; the
    /// descriptor is restored in that case.
    pub async fn remove_server(&self, server_id: ServerId) -> FleetServiceResult<bool> {
        let operation = self.operation_lock(server_id);
        let _guard = operation.lock().await;

        if self.descriptor(server_id).is_none() {
            return Ok(false);
        }
        self.stop_locked(server_id).await;

        let removed = {
            let mut fleet = self.lock_fleet();
            let position = fleet
                .descriptors
                .iter()
                .position(|descriptor| descriptor.id() == server_id);
            position.map(|index| (index, fleet.descriptors.remove(index)))
        };
        let Some((index, descriptor)) = removed else {
            return Ok(false);
        };

        if let Err(err) = self.persist().await {
            let mut fleet = self.lock_fleet();
            let restore_at = index.min(fleet.descriptors.len());
            fleet.descriptors.insert(restore_at, descriptor);
            return Err(err.into());
        }

        self.lock_operations().remove(&server_id);
        info!(server_id = %server_id, server = %descriptor.name(), "tool server removed");
        Ok(true)
    }

    /// Starts a server. A no-op when a runtime already exists.
    ///
    /// Failures are surfaced to the user, leave no runtime behind and
    /// disable the descriptor if it was enabled.
    pub async fn start_server(&self, server_id: ServerId) -> StartOutcome {
        let operation = self.operation_lock(server_id);
        let _guard = operation.lock().await;
        self.start_locked(server_id).await
    }

    /// Stops a server. Returns `false` when it was not running.
    ///
    /// Teardown, including waiting for process exit, completes before the
    /// call returns.
    pub async fn stop_server(&self, server_id: ServerId) -> bool {
        let operation = self.operation_lock(server_id);
        let _guard = operation.lock().await;
        self.stop_locked(server_id).await
    }

    /// Stops then starts a server without releasing its operation lock.
    pub async fn restart_server(&self, server_id: ServerId) -> StartOutcome {
        let operation = self.operation_lock(server_id);
        let _guard = operation.lock().await;
        self.stop_locked(server_id).await;
        self.start_locked(server_id).await
    }

    /// Starts every enabled server concurrently.
    ///
    /// Failures are isolated per server.
    pub async fn start_enabled_servers(&self) -> Vec<(ServerId, StartOutcome)> {
        let enabled: Vec<ServerId> = self
            .lock_fleet()
            .descriptors
            .iter()
            .filter(|descriptor| descriptor.enabled())
            .map(ServerDescriptor::id)
            .collect();

        let outcomes = join_all(enabled.iter().map(|id| self.start_server(*id))).await;
        enabled.into_iter().zip(outcomes).collect()
    }

    /// Stops every running server.
    pub async fn shutdown(&self) {
        let running: Vec<ServerId> = self.lock_fleet().runtimes.keys().copied().collect();
        join_all(running.iter().map(|id| self.stop_server(*id))).await;
        info!(count = running.len(), "tool server fleet shut down");
    }

    /// Returns a read-only view of the fleet.
    #[must_use]
    pub fn view(&self) -> FleetView {
        FleetView {
            fleet: Arc::clone(&self.fleet),
        }
    }

    /// Returns every descriptor with its runtime status, in insertion order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<ServerSnapshot> {
        self.view().snapshots()
    }

    /// Returns one descriptor with its runtime status.
    #[must_use]
    pub fn snapshot(&self, server_id: ServerId) -> Option<ServerSnapshot> {
        self.view().snapshot(server_id)
    }

    /// Returns the descriptor with the given id.
    #[must_use]
    pub fn descriptor(&self, server_id: ServerId) -> Option<ServerDescriptor> {
        self.lock_fleet().descriptor(server_id).cloned()
    }

    /// Returns every descriptor, in insertion order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ServerDescriptor> {
        self.lock_fleet().descriptors.clone()
    }

    /// Returns whether a connection runtime exists for the id.
    #[must_use]
    pub fn is_running(&self, server_id: ServerId) -> bool {
        self.lock_fleet().runtimes.contains_key(&server_id)
    }

    /// Returns the live connection of a running server.
    #[must_use]
    pub fn connection(&self, server_id: ServerId) -> Option<Arc<ProtocolClientConnection>> {
        self.lock_fleet()
            .runtimes
            .get(&server_id)
            .map(|runtime| Arc::clone(&runtime.connection))
    }

    /// Returns when the running server was started.
    #[must_use]
    pub fn started_at(&self, server_id: ServerId) -> Option<DateTime<Utc>> {
        self.lock_fleet()
            .runtimes
            .get(&server_id)
            .map(|runtime| runtime.started_at)
    }

    /// Returns the newest stderr lines of a running process server.
    #[must_use]
    pub fn recent_logs(&self, server_id: ServerId, count: usize) -> Vec<String> {
        self.lock_fleet()
            .runtimes
            .get(&server_id)
            .map(|runtime| runtime.logs.tail(count))
            .unwrap_or_default()
    }

    async fn start_locked(&self, server_id: ServerId) -> StartOutcome {
        let Some(descriptor) = self.descriptor(server_id) else {
            return StartOutcome::NotFound;
        };
        if self.is_running(server_id) {
            info!(
                server_id = %server_id,
                server = %descriptor.name(),
                "tool server already running"
            );
            return StartOutcome::AlreadyRunning;
        }

        info!(
            server_id = %server_id,
            server = %descriptor.name(),
            kind = %descriptor.kind(),
            "starting tool server"
        );
        let launched = match self.launch_and_connect(&descriptor).await {
            Ok(launched) => launched,
            Err(message) => {
                self.fail_start(&descriptor, &message).await;
                return StartOutcome::Failed { message };
            }
        };

        let tools = launched.connection.list_tools().await;
        let resources = launched.connection.list_resources().await;
        let connection = Arc::clone(&launched.connection);
        {
            let mut fleet = self.lock_fleet();
            fleet.runtimes.insert(
                server_id,
                ConnectionRuntime {
                    generation: launched.generation,
                    connection: launched.connection,
                    process: launched.process,
                    logs: launched.logs,
                    tools: tools.clone(),
                    resources: resources.clone(),
                    started_at: self.clock.utc(),
                },
            );
        }
        info!(
            server_id = %server_id,
            server = %descriptor.name(),
            tools = tools.len(),
            resources = resources.len(),
            "tool server started"
        );

        self.bus.emit(&ServerEvent::ServerStarted {
            server_id,
            server_name: descriptor.name().clone(),
        });
        self.publish_capabilities(server_id, descriptor.name(), &connection, tools, resources);
        StartOutcome::Started
    }

    fn publish_capabilities(
        &self,
        server_id: ServerId,
        server_name: &ServerName,
        connection: &Arc<ProtocolClientConnection>,
        tools: Vec<ToolDefinition>,
        resources: Vec<ResourceDefinition>,
    ) {
        self.bus.emit(&ServerEvent::ToolsChanged {
            server_id,
            server_name: server_name.clone(),
            connection: Arc::clone(connection),
            tools,
        });
        self.bus.emit(&ServerEvent::ResourcesChanged {
            server_id,
            server_name: server_name.clone(),
            connection: Arc::clone(connection),
            resources,
        });
    }

    /// Re-announces a running server's last known capabilities, so
    /// registrations pick up a new display name without a restart.
    fn republish(&self, server_id: ServerId, server_name: &ServerName) {
        let current = self.lock_fleet().runtimes.get(&server_id).map(|runtime| {
            (
                Arc::clone(&runtime.connection),
                runtime.tools.clone(),
                runtime.resources.clone(),
            )
        });
        let Some((connection, tools, resources)) = current else {
            return;
        };
        debug!(server_id = %server_id, server = %server_name, "republishing after rename");
        self.publish_capabilities(server_id, server_name, &connection, tools, resources);
    }

    async fn launch_and_connect(&self, descriptor: &ServerDescriptor) -> Result<Launched, String> {
        let server_id = descriptor.id();
        let launched = self
            .launcher
            .launch(descriptor)
            .await
            .map_err(|err| err.to_string())?;

        let generation = {
            let mut fleet = self.lock_fleet();
            fleet.next_generation += 1;
            fleet.next_generation
        };
        let connection = Arc::new(ProtocolClientConnection::new(
            server_id,
            descriptor.name().clone(),
            launched.connector,
            self.settings.connection,
        ));

        let (process, logs) = match launched.process {
            Some(spawned) => {
                let logs = spawned.logs.clone();
                (Some(self.watch_process(server_id, generation, spawned)), logs)
            }
            None => (None, LogSink::default()),
        };

        if let Err(err) = connection.connect_default().await {
            connection.dispose().await;
            if let Some(owned) = process {
                self.terminate(server_id, owned).await;
            }
            let tail = logs.tail(self.settings.log_tail_lines);
            return Err(with_log_tail(err.to_string(), &tail));
        }

        Ok(Launched {
            generation,
            connection,
            process,
            logs,
        })
    }

    fn watch_process(
        &self,
        server_id: ServerId,
        generation: u64,
        spawned: SpawnedProcess,
    ) -> RuntimeProcess {
        let mut exit = spawned.exit.clone();
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let status = wait_for_exit(&mut exit).await;
            orchestrator
                .handle_process_exit(server_id, generation, status)
                .await;
        });
        RuntimeProcess {
            pid: spawned.pid,
            exit: spawned.exit,
            control: spawned.control,
        }
    }

    async fn handle_process_exit(&self, server_id: ServerId, generation: u64, exit: ProcessExit) {
        if self.lock_fleet().expected_stops.contains(&generation) {
            debug!(server_id = %server_id, %exit, "tool server exited after stop request");
            return;
        }

        let operation = self.operation_lock(server_id);
        let _guard = operation.lock().await;

        let crashed = {
            let mut fleet = self.lock_fleet();
            let is_current = fleet
                .runtimes
                .get(&server_id)
                .is_some_and(|runtime| runtime.generation == generation);
            if is_current {
                fleet.runtimes.remove(&server_id)
            } else {
                None
            }
        };
        let Some(runtime) = crashed else {
            debug!(server_id = %server_id, %exit, "ignoring exit of a retired process");
            return;
        };

        runtime.connection.dispose().await;
        let name = runtime.connection.server_name().to_string();
        let tail = runtime.logs.tail(self.settings.log_tail_lines);
        error!(server_id = %server_id, server = %name, %exit, "tool server exited unexpectedly");

        self.disable_after_failure(server_id).await;
        let message = with_log_tail(
            format!("Tool server '{name}' exited unexpectedly ({exit})"),
            &tail,
        );
        self.notifier.error(Some(server_id), &message);
        self.bus.emit(&ServerEvent::ServerStopped {
            server_id,
            reason: StopReason::Crashed { exit },
        });
    }

    async fn stop_locked(&self, server_id: ServerId) -> bool {
        let runtime = {
            let mut fleet = self.lock_fleet();
            let removed = fleet.runtimes.remove(&server_id);
            if let Some(runtime) = &removed {
                fleet.expected_stops.insert(runtime.generation);
            }
            removed
        };
        let Some(runtime) = runtime else {
            debug!(server_id = %server_id, "stop requested for a server that is not running");
            return false;
        };

        info!(server_id = %server_id, server = %runtime.connection.server_name(), "stopping tool server");
        runtime.connection.dispose().await;
        if let Some(process) = runtime.process {
            self.terminate(server_id, process).await;
        }
        self.lock_fleet().expected_stops.remove(&runtime.generation);

        self.bus.emit(&ServerEvent::ServerStopped {
            server_id,
            reason: StopReason::Requested,
        });
        true
    }

    async fn terminate(&self, server_id: ServerId, mut process: RuntimeProcess) {
        if process.exit.borrow().is_some() {
            return;
        }
        if let Err(err) = process.control.terminate() {
            warn!(server_id = %server_id, pid = ?process.pid, error = %err, "failed to send termination signal");
        }
        let grace = self.settings.stop_grace;
        if tokio::time::timeout(grace, wait_for_exit(&mut process.exit))
            .await
            .is_ok()
        {
            return;
        }

        warn!(server_id = %server_id, pid = ?process.pid, "grace period elapsed; killing tool server");
        if let Err(err) = process.control.kill() {
            error!(server_id = %server_id, pid = ?process.pid, error = %err, "failed to kill tool server");
        }
        if tokio::time::timeout(grace, wait_for_exit(&mut process.exit))
            .await
            .is_err()
        {
            error!(server_id = %server_id, pid = ?process.pid, "tool server did not exit after kill");
        }
    }

    async fn fail_start(&self, descriptor: &ServerDescriptor, message: &str) {
        let server_id = descriptor.id();
        error!(
            server_id = %server_id,
            server = %descriptor.name(),
            error = %message,
            "failed to start tool server"
        );
        self.disable_after_failure(server_id).await;
        self.notifier.error(
            Some(server_id),
            &format!(
                "Failed to start tool server '{}': {message}",
                descriptor.name()
            ),
        );
    }

    async fn disable_after_failure(&self, server_id: ServerId) {
        let disabled = self
            .lock_fleet()
            .descriptor_mut(server_id)
            .is_some_and(|descriptor| descriptor.set_enabled(false, &*self.clock));
        if !disabled {
            return;
        }
        if let Err(err) = self.persist().await {
            error!(server_id = %server_id, error = %err, "failed to persist auto-disable");
        }
    }

    async fn persist(&self) -> Result<(), ServerStoreError> {
        let _guard = self.persist_lock.lock().await;
        let descriptors = self.lock_fleet().descriptors.clone();
        self.store.save(&descriptors).await
    }

    fn operation_lock(&self, server_id: ServerId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.lock_operations().entry(server_id).or_default())
    }

    fn lock_fleet(&self) -> MutexGuard<'_, FleetState> {
        self.fleet.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_operations(&self) -> MutexGuard<'_, HashMap<ServerId, Arc<AsyncMutex<()>>>> {
        self.operation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Waits until the exit slot is filled. A dropped sender counts as an exit
/// with unknown status.
async fn wait_for_exit(exit: &mut watch::Receiver<Option<ProcessExit>>) -> ProcessExit {
    match exit.wait_for(Option::is_some).await {
        Ok(status) => (*status).unwrap_or_else(ProcessExit::signalled),
        Err(_) => ProcessExit::signalled(),
    }
}

fn with_log_tail(message: String, tail: &[String]) -> String {
    if tail.is_empty() {
        return message;
    }
    format!("{message}\nRecent output:\n{}", tail.join("\n"))
}
