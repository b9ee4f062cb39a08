//! Launcher port: turns a descriptor into a reachable tool server.

use super::TransportConnector;
use crate::mcp_bridge::domain::ServerDescriptor;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;

/// Default number of stderr lines retained per process.
const DEFAULT_LOG_CAPACITY: usize = 200;

/// Launches tool servers.
///
/// Process servers are spawned; stream servers only get a connector.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    /// Prepares the server described by `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] when the process cannot be spawned or the
    /// transport cannot be prepared.
    async fn launch(&self, descriptor: &ServerDescriptor) -> Result<LaunchedServer, ProcessError>;
}

/// Result of a successful launch.
pub struct LaunchedServer {
    /// Opens protocol transports to the server.
    pub connector: Arc<dyn TransportConnector>,
    /// Spawned process, for process servers.
    pub process: Option<SpawnedProcess>,
}

impl fmt::Debug for LaunchedServer {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LaunchedServer")
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

/// Handle to a spawned tool server process.
pub struct SpawnedProcess {
    /// OS process id, when known.
    pub pid: Option<u32>,
    /// Becomes `Some` exactly once, when the process exits.
    pub exit: watch::Receiver<Option<ProcessExit>>,
    /// Signals the process.
    pub control: Arc<dyn ProcessControl>,
    /// Recent stderr lines.
    pub logs: LogSink,
}

impl fmt::Debug for SpawnedProcess {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SpawnedProcess")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Signals a spawned process.
pub trait ProcessControl: Send + Sync {
    /// Requests graceful termination (SIGTERM on unix).
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Signal`] when the signal cannot be delivered.
    fn terminate(&self) -> Result<(), ProcessError>;

    /// Forces the process to exit.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Signal`] when the kill cannot be requested.
    fn kill(&self) -> Result<(), ProcessError>;
}

/// How a process exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    /// Creates an exit with the given code.
    #[must_use]
    pub const fn with_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// Creates an exit caused by a signal.
    #[must_use]
    pub const fn signalled() -> Self {
        Self { code: None }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(formatter, "exit code {code}"),
            None => formatter.write_str("terminated by signal"),
        }
    }
}

/// Bounded buffer of a process's most recent stderr lines.
#[derive(Debug, Clone)]
pub struct LogSink {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl LogSink {
    /// Creates a sink retaining at most `capacity` lines.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Appends a line, evicting the oldest one when full.
    pub fn push(&self, line: impl Into<String>) {
        let Ok(mut lines) = self.lines.lock() else {
            return;
        };
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Returns up to `count` of the newest lines, oldest first.
    #[must_use]
    pub fn tail(&self, count: usize) -> Vec<String> {
        let Ok(lines) = self.lines.lock() else {
            return Vec::new();
        };
        let skip = lines.len().saturating_sub(count);
        lines.iter().skip(skip).cloned().collect()
    }
}

/// Errors raised while launching or signalling a tool server.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// The command could not be spawned.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        /// Command that failed.
        command: String,
        /// Underlying I/O failure.
        source: Arc<std::io::Error>,
    },

    /// A standard stream was not piped.
    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),

    /// A signal could not be delivered.
    #[error("failed to signal process: {0}")]
    Signal(Arc<dyn std::error::Error + Send + Sync>),

    /// The transport could not be prepared.
    #[error("failed to prepare transport: {0}")]
    Setup(Arc<dyn std::error::Error + Send + Sync>),
}

impl ProcessError {
    /// Wraps a spawn failure.
    #[must_use]
    pub fn spawn(command: &str, err: std::io::Error) -> Self {
        Self::Spawn {
            command: command.to_owned(),
            source: Arc::new(err),
        }
    }

    /// Wraps a signal delivery failure.
    pub fn signal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Signal(Arc::new(err))
    }

    /// Wraps a transport preparation failure.
    pub fn setup(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Setup(Arc::new(err))
    }
}
