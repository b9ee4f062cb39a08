//! Process-wide, synchronous publish/subscribe channel for fleet events.
//!
//! `emit` delivers to every current subscriber before it returns, so by the
//! time an orchestrator operation completes all direct event-driven side
//! effects have been attempted. Subscribers run on the emitting task and must
//! not block.

use super::ProtocolClientConnection;
use crate::mcp_bridge::domain::{ResourceDefinition, ServerId, ServerName, ToolDefinition};
use crate::mcp_bridge::ports::ProcessExit;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::error;

/// Why a server stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop_server`, `restart_server`, `remove_server` or shutdown.
    Requested,
    /// The process exited on its own.
    Crashed {
        /// How the process exited.
        exit: ProcessExit,
    },
}

/// Discriminant of [`ServerEvent`], used for per-kind subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`ServerEvent::ServerStarted`].
    ServerStarted,
    /// [`ServerEvent::ServerStopped`].
    ServerStopped,
    /// [`ServerEvent::ToolsChanged`].
    ToolsChanged,
    /// [`ServerEvent::ResourcesChanged`].
    ResourcesChanged,
}

/// Immutable lifecycle event.
#[derive(Clone)]
pub enum ServerEvent {
    /// A connection runtime was registered.
    ServerStarted {
        /// Server identifier.
        server_id: ServerId,
        /// Server display name.
        server_name: ServerName,
    },
    /// A connection runtime was removed.
    ServerStopped {
        /// Server identifier.
        server_id: ServerId,
        /// Why it stopped.
        reason: StopReason,
    },
    /// The tool list of a running server was (re)discovered.
    ToolsChanged {
        /// Server identifier.
        server_id: ServerId,
        /// Server display name.
        server_name: ServerName,
        /// Live connection that serves invocations.
        connection: Arc<ProtocolClientConnection>,
        /// Discovered tools.
        tools: Vec<ToolDefinition>,
    },
    /// The resource list of a running server was (re)discovered.
    ResourcesChanged {
        /// Server identifier.
        server_id: ServerId,
        /// Server display name.
        server_name: ServerName,
        /// Live connection that serves reads.
        connection: Arc<ProtocolClientConnection>,
        /// Discovered resources.
        resources: Vec<ResourceDefinition>,
    },
}

impl ServerEvent {
    /// Returns the event discriminant.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ServerStarted { .. } => EventKind::ServerStarted,
            Self::ServerStopped { .. } => EventKind::ServerStopped,
            Self::ToolsChanged { .. } => EventKind::ToolsChanged,
            Self::ResourcesChanged { .. } => EventKind::ResourcesChanged,
        }
    }

    /// Returns the server the event concerns.
    #[must_use]
    pub const fn server_id(&self) -> ServerId {
        match self {
            Self::ServerStarted { server_id, .. }
            | Self::ServerStopped { server_id, .. }
            | Self::ToolsChanged { server_id, .. }
            | Self::ResourcesChanged { server_id, .. } => *server_id,
        }
    }
}

impl fmt::Debug for ServerEvent {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerStarted {
                server_id,
                server_name,
            } => formatter
                .debug_struct("ServerStarted")
                .field("server_id", server_id)
                .field("server_name", server_name)
                .finish(),
            Self::ServerStopped { server_id, reason } => formatter
                .debug_struct("ServerStopped")
                .field("server_id", server_id)
                .field("reason", reason)
                .finish(),
            Self::ToolsChanged {
                server_id, tools, ..
            } => formatter
                .debug_struct("ToolsChanged")
                .field("server_id", server_id)
                .field("tools", &tools.len())
                .finish_non_exhaustive(),
            Self::ResourcesChanged {
                server_id,
                resources,
                ..
            } => formatter
                .debug_struct("ResourcesChanged")
                .field("server_id", server_id)
                .field("resources", &resources.len())
                .finish_non_exhaustive(),
        }
    }
}

type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    kind: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Synchronous multi-subscriber event emitter.
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every event.
    pub fn subscribe(&self, handler: impl Fn(&ServerEvent) + Send + Sync + 'static) -> Subscription {
        self.add_subscriber(None, Arc::new(handler))
    }

    /// Subscribes to events of one kind.
    pub fn subscribe_kind(
        &self,
        kind: EventKind,
        handler: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.add_subscriber(Some(kind), Arc::new(handler))
    }

    /// Delivers `event` to every current subscriber and returns how many
    /// handlers ran to completion.
    ///
    /// A panicking handler is logged and does not stop delivery.
    pub fn emit(&self, event: &ServerEvent) -> usize {
        let handlers: Vec<Handler> = match self.state.lock() {
            Ok(state) => state
                .subscribers
                .iter()
                .filter(|subscriber| subscriber.kind.is_none_or(|kind| kind == event.kind()))
                .map(|subscriber| Arc::clone(&subscriber.handler))
                .collect(),
            Err(_) => return 0,
        };

        let mut delivered = 0;
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler.as_ref()(event))).is_ok() {
                delivered += 1;
            } else {
                error!(
                    server_id = %event.server_id(),
                    kind = ?event.kind(),
                    "event subscriber panicked"
                );
            }
        }
        delivered
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.subscribers.len())
            .unwrap_or_default()
    }

    fn add_subscriber(&self, kind: Option<EventKind>, handler: Handler) -> Subscription {
        let id = match self.state.lock() {
            Ok(mut state) => {
                state.next_id += 1;
                let id = state.next_id;
                state.subscribers.push(Subscriber { id, kind, handler });
                id
            }
            Err(_) => 0,
        };
        Subscription {
            bus: Arc::downgrade(&self.state),
            id,
            disposed: AtomicBool::new(false),
        }
    }
}

/// Disposable subscription. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<Mutex<BusState>>,
    id: u64,
    disposed: AtomicBool,
}

impl Subscription {
    /// Removes the subscriber. Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(state) = self.bus.upgrade() else {
            return;
        };
        if let Ok(mut guard) = state.lock() {
            guard.subscribers.retain(|subscriber| subscriber.id != self.id);
        }
    }

    /// Returns whether `dispose` has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Subscription")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
