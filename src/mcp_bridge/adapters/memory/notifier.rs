//! Notifier that records pushes for assertions.

use crate::mcp_bridge::{
    domain::{ServerId, ServerSnapshot, ToolDefinition},
    ports::ServerNotifier,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One recorded push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// `set_servers` with the pushed snapshots.
    Servers(Vec<ServerSnapshot>),
    /// `update_server_tools`, keeping only the tool names.
    Tools {
        /// Server identifier.
        server_id: ServerId,
        /// Pushed tool names.
        tools: Vec<String>,
        /// Connection flag.
        connected: bool,
        /// Enabled flag.
        enabled: bool,
    },
    /// `server_toggled`.
    Toggled {
        /// Server identifier.
        server_id: ServerId,
        /// Resulting enabled flag.
        enabled: bool,
        /// Resulting connection flag.
        connected: bool,
    },
    /// `server_toggling`.
    Toggling {
        /// Server identifier.
        server_id: ServerId,
        /// Whether the toggle is still running.
        in_progress: bool,
    },
    /// `error`.
    Error {
        /// Related server, if any.
        server_id: Option<ServerId>,
        /// Message text.
        message: String,
    },
}

/// Thread-safe notification recorder.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    recorded: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every push in order.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().clone()
    }

    /// Returns the messages of `error` pushes.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|notification| match notification {
                Notification::Error { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the most recent `set_servers` payload.
    #[must_use]
    pub fn last_servers(&self) -> Option<Vec<ServerSnapshot>> {
        self.lock()
            .iter()
            .rev()
            .find_map(|notification| match notification {
                Notification::Servers(servers) => Some(servers.clone()),
                _ => None,
            })
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn record(&self, notification: Notification) {
        self.lock().push(notification);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ServerNotifier for RecordingNotifier {
    fn set_servers(&self, servers: &[ServerSnapshot]) {
        self.record(Notification::Servers(servers.to_vec()));
    }

    fn update_server_tools(
        &self,
        server_id: ServerId,
        tools: &[ToolDefinition],
        connected: bool,
        enabled: bool,
    ) {
        self.record(Notification::Tools {
            server_id,
            tools: tools.iter().map(|tool| tool.name().to_owned()).collect(),
            connected,
            enabled,
        });
    }

    fn server_toggled(&self, server_id: ServerId, enabled: bool, connected: bool) {
        self.record(Notification::Toggled {
            server_id,
            enabled,
            connected,
        });
    }

    fn server_toggling(&self, server_id: ServerId, in_progress: bool) {
        self.record(Notification::Toggling {
            server_id,
            in_progress,
        });
    }

    fn error(&self, server_id: Option<ServerId>, message: &str) {
        self.record(Notification::Error {
            server_id,
            message: message.to_owned(),
        });
    }
}
