//! Launches tool servers as operating system processes.

use crate::mcp_bridge::{
    adapters::protocol::{DEFAULT_REQUEST_TIMEOUT, HttpConnector, StdioTransport},
    domain::{ProcessLaunch, ServerDescriptor, ServerTransport},
    ports::{
        LaunchedServer, LogSink, ProcessControl, ProcessError, ProcessExit, ProtocolError,
        ProtocolTransport, ServerLauncher, SpawnedProcess, TransportConnector,
    },
};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

/// Spawns process servers and prepares HTTP sessions for stream servers.
#[derive(Debug, Clone)]
pub struct SystemServerLauncher {
    http: reqwest::Client,
    request_timeout: Duration,
    log_capacity: usize,
}

impl Default for SystemServerLauncher {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), DEFAULT_REQUEST_TIMEOUT)
    }
}

impl SystemServerLauncher {
    /// Creates a launcher sharing `http` across stream servers.
    #[must_use]
    pub const fn new(http: reqwest::Client, request_timeout: Duration) -> Self {
        Self {
            http,
            request_timeout,
            log_capacity: 200,
        }
    }

    /// Sets how many stderr lines each process retains.
    #[must_use]
    pub const fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    fn spawn(
        &self,
        descriptor: &ServerDescriptor,
        launch: &ProcessLaunch,
    ) -> Result<LaunchedServer, ProcessError> {
        let mut child = Command::new(launch.command())
            .args(launch.args())
            .envs(launch.env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ProcessError::spawn(launch.command(), err))?;

        let stdin = child.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::MissingPipe("stderr"))?;
        let pid = child.id();
        let label = descriptor.name().to_string();
        info!(server = %label, command = launch.command(), pid, "spawned tool server");

        let logs = LogSink::with_capacity(self.log_capacity);
        tokio::spawn(collect_stderr(stderr, logs.clone(), label.clone()));

        let (exit_sender, exit) = watch::channel(None);
        let kill = Arc::new(Notify::new());
        tokio::spawn(watch_child(
            child,
            Arc::clone(&kill),
            exit_sender,
            label.clone(),
        ));

        let connector = StdioConnector {
            slot: Mutex::new(StdioSlot::Pipes(stdout, stdin)),
            label,
            timeout: self.request_timeout,
        };
        Ok(LaunchedServer {
            connector: Arc::new(connector),
            process: Some(SpawnedProcess {
                pid,
                exit,
                control: Arc::new(SystemProcessControl { pid, kill }),
                logs,
            }),
        })
    }
}

#[async_trait]
impl ServerLauncher for SystemServerLauncher {
    async fn launch(&self, descriptor: &ServerDescriptor) -> Result<LaunchedServer, ProcessError> {
        match descriptor.transport() {
            ServerTransport::Process(launch) => self.spawn(descriptor, launch),
            ServerTransport::Stream(endpoint) => Ok(LaunchedServer {
                connector: Arc::new(HttpConnector::new(
                    self.http.clone(),
                    endpoint.clone(),
                    self.request_timeout,
                )),
                process: None,
            }),
        }
    }
}

async fn collect_stderr(stderr: ChildStderr, logs: LogSink, label: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(server = %label, line = %line, "tool server stderr");
                logs.push(line);
            }
            Ok(None) => break,
            Err(err) => {
                debug!(server = %label, error = %err, "stopped reading stderr");
                break;
            }
        }
    }
}

async fn watch_child(
    mut child: Child,
    kill: Arc<Notify>,
    exit_sender: watch::Sender<Option<ProcessExit>>,
    label: String,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill.notified() => {
            if let Err(err) = child.start_kill() {
                warn!(server = %label, error = %err, "failed to kill tool server");
            }
            child.wait().await
        }
    };
    let exit = match status {
        Ok(exit_status) => exit_from_status(exit_status),
        Err(err) => {
            warn!(server = %label, error = %err, "failed waiting for tool server");
            ProcessExit::signalled()
        }
    };
    info!(server = %label, exit = %exit, "tool server exited");
    exit_sender.send_replace(Some(exit));
}

fn exit_from_status(status: ExitStatus) -> ProcessExit {
    status
        .code()
        .map_or_else(ProcessExit::signalled, ProcessExit::with_code)
}

struct SystemProcessControl {
    pid: Option<u32>,
    kill: Arc<Notify>,
}

impl ProcessControl for SystemProcessControl {
    #[cfg(unix)]
    fn terminate(&self) -> Result<(), ProcessError> {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(());
        };
        let raw = i32::try_from(pid).map_err(ProcessError::signal)?;
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(ProcessError::signal(err)),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> Result<(), ProcessError> {
        self.kill()
    }

    fn kill(&self) -> Result<(), ProcessError> {
        self.kill.notify_one();
        Ok(())
    }
}

enum StdioSlot {
    Pipes(ChildStdout, ChildStdin),
    Open(Arc<StdioTransport>),
    Taken,
}

/// Wraps the child's pipes in one transport and hands it out while it
/// stays open.
///
/// A child has a single pair of pipes, so once that transport is closed the
/// server is unreachable until it is launched again.
struct StdioConnector {
    slot: Mutex<StdioSlot>,
    label: String,
    timeout: Duration,
}

#[async_trait]
impl TransportConnector for StdioConnector {
    async fn open(&self) -> Result<Arc<dyn ProtocolTransport>, ProtocolError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *slot, StdioSlot::Taken) {
            StdioSlot::Pipes(stdout, stdin) => {
                let started = Arc::new(StdioTransport::start(
                    stdout,
                    stdin,
                    self.label.clone(),
                    self.timeout,
                ));
                *slot = StdioSlot::Open(Arc::clone(&started));
                Ok(started)
            }
            StdioSlot::Open(transport) => {
                let reusable = !transport.is_closed();
                let handed = Arc::clone(&transport);
                *slot = StdioSlot::Open(transport);
                if reusable {
                    Ok(handed)
                } else {
                    Err(ProtocolError::Closed)
                }
            }
            StdioSlot::Taken => Err(ProtocolError::Closed),
        }
    }
}
