//! In-memory tool server host for lifecycle tests.
//!
//! Scripted programs are registered under a launch target: the command of a
//! process server or the endpoint URL of a stream server. Launching a
//! descriptor looks its target up, so editing a command launches a
//! different program exactly as it would on a real system.

use crate::mcp_bridge::{
    domain::{ResourceDefinition, ServerDescriptor, ServerId, ServerTransport, ToolDefinition},
    ports::{
        LaunchedServer, LogSink, METHOD_NOT_FOUND, ProcessControl, ProcessError, ProcessExit,
        ProtocolError, ProtocolTransport, ServerLauncher, SpawnedProcess, TransportConnector,
    },
    services::PROTOCOL_VERSION,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Code returned for an unknown resource.
const RESOURCE_NOT_FOUND: i64 = -32002;

/// How a scripted tool answers `tools/call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Returns the call arguments as JSON text.
    Echo,
    /// Returns a fixed text item.
    Text(String),
    /// Returns no content.
    Empty,
    /// Fails with a JSON-RPC error carrying this message.
    Error(String),
    /// Never answers.
    Hang,
}

/// Behaviour of one scripted tool server program.
#[derive(Debug, Clone, Default)]
pub struct ScriptedServer {
    tools: Vec<ToolDefinition>,
    resources: Option<Vec<ResourceDefinition>>,
    resource_text: BTreeMap<String, String>,
    replies: BTreeMap<String, ScriptedReply>,
    page_size: Option<usize>,
    failing_connects: u32,
    ignores_terminate: bool,
    stderr: Vec<String>,
}

impl ScriptedServer {
    /// Creates a program exposing no tools and no resource support.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tool catalog.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Enables resource support with the given catalog.
    #[must_use]
    pub fn with_resources(mut self, resources: Vec<ResourceDefinition>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Sets the body returned when `uri` is read.
    #[must_use]
    pub fn with_resource_text(mut self, uri: impl Into<String>, text: impl Into<String>) -> Self {
        self.resource_text.insert(uri.into(), text.into());
        self
    }

    /// Sets how `tool` answers calls. Unscripted tools echo.
    #[must_use]
    pub fn with_reply(mut self, tool: impl Into<String>, reply: ScriptedReply) -> Self {
        self.replies.insert(tool.into(), reply);
        self
    }

    /// Splits listings into pages of `size` entries.
    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    /// Refuses the first `count` connection attempts of every launch.
    #[must_use]
    pub const fn failing_connects(mut self, count: u32) -> Self {
        self.failing_connects = count;
        self
    }

    /// Ignores graceful termination; only a forced kill stops it.
    #[must_use]
    pub const fn ignoring_terminate(mut self) -> Self {
        self.ignores_terminate = true;
        self
    }

    /// Writes these lines to stderr at launch.
    #[must_use]
    pub fn with_stderr(mut self, lines: impl IntoIterator<Item = String>) -> Self {
        self.stderr = lines.into_iter().collect();
        self
    }
}

/// Observable host activity, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A descriptor was launched.
    Launched {
        /// Server identifier.
        server_id: ServerId,
        /// Command or endpoint URL.
        target: String,
    },
    /// A transport was opened (or refused).
    Opened {
        /// Server identifier.
        server_id: ServerId,
        /// Whether the open succeeded.
        accepted: bool,
    },
    /// Graceful termination was requested.
    Terminated {
        /// Server identifier.
        server_id: ServerId,
    },
    /// A forced kill was requested.
    Killed {
        /// Server identifier.
        server_id: ServerId,
    },
    /// A process exited.
    Exited {
        /// Server identifier.
        server_id: ServerId,
        /// How it exited.
        exit: ProcessExit,
    },
    /// A transport was closed by the client.
    Closed {
        /// Server identifier.
        server_id: ServerId,
    },
}

struct HostedProcess {
    server_id: ServerId,
    exit: watch::Sender<Option<ProcessExit>>,
    ignores_terminate: bool,
}

#[derive(Default)]
struct HostState {
    programs: HashMap<String, ScriptedServer>,
    failing_launches: HashMap<String, String>,
    processes: HashMap<u32, HostedProcess>,
    next_pid: u32,
    journal: Vec<HostEvent>,
}

impl HostState {
    fn exit_process(&mut self, pid: u32, exit: ProcessExit) -> bool {
        let Some(process) = self.processes.remove(&pid) else {
            return false;
        };
        process.exit.send_replace(Some(exit));
        self.journal.push(HostEvent::Exited {
            server_id: process.server_id,
            exit,
        });
        true
    }
}

/// In-memory tool server host adapter.
///
/// This adapter models process lifecycle without spawning external
/// processes. It is suitable for unit and integration tests and for local
/// deterministic orchestration flows.
#[derive(Clone, Default)]
pub struct InMemoryToolServerHost {
    state: Arc<Mutex<HostState>>,
}

impl InMemoryToolServerHost {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a program under a command or endpoint URL.
    ///
    /// Existing programs are replaced; running instances keep the behaviour
    /// they were launched with.
    pub fn install(&self, target: impl Into<String>, program: ScriptedServer) {
        self.lock().programs.insert(target.into(), program);
    }

    /// Makes launches of `target` fail with `message`.
    pub fn fail_launches(&self, target: impl Into<String>, message: impl Into<String>) {
        self.lock()
            .failing_launches
            .insert(target.into(), message.into());
    }

    /// Makes every running process of `server_id` exit with `code`.
    ///
    /// Returns the number of processes that exited.
    pub fn crash(&self, server_id: ServerId, code: i32) -> usize {
        let mut state = self.lock();
        let pids: Vec<u32> = state
            .processes
            .iter()
            .filter(|(_, process)| process.server_id == server_id)
            .map(|(pid, _)| *pid)
            .collect();
        pids.into_iter()
            .filter(|pid| state.exit_process(*pid, ProcessExit::with_code(code)))
            .count()
    }

    /// Returns whether `server_id` has a live process.
    #[must_use]
    pub fn is_alive(&self, server_id: ServerId) -> bool {
        self.lock()
            .processes
            .values()
            .any(|process| process.server_id == server_id)
    }

    /// Returns the number of live processes.
    #[must_use]
    pub fn live_process_count(&self) -> usize {
        self.lock().processes.len()
    }

    /// Returns the full activity journal.
    #[must_use]
    pub fn journal(&self) -> Vec<HostEvent> {
        self.lock().journal.clone()
    }

    /// Returns the journal entries of one server.
    #[must_use]
    pub fn journal_for(&self, server_id: ServerId) -> Vec<HostEvent> {
        self.lock()
            .journal
            .iter()
            .filter(|event| event_server(event) == server_id)
            .cloned()
            .collect()
    }

    /// Returns how many times `server_id` was launched.
    #[must_use]
    pub fn launch_count(&self, server_id: ServerId) -> usize {
        self.journal_for(server_id)
            .iter()
            .filter(|event| matches!(event, HostEvent::Launched { .. }))
            .count()
    }

    /// Returns how many transport opens `server_id` attempted.
    #[must_use]
    pub fn open_attempts(&self, server_id: ServerId) -> usize {
        self.journal_for(server_id)
            .iter()
            .filter(|event| matches!(event, HostEvent::Opened { .. }))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

const fn event_server(event: &HostEvent) -> ServerId {
    match event {
        HostEvent::Launched { server_id, .. }
        | HostEvent::Opened { server_id, .. }
        | HostEvent::Terminated { server_id }
        | HostEvent::Killed { server_id }
        | HostEvent::Exited { server_id, .. }
        | HostEvent::Closed { server_id } => *server_id,
    }
}

fn launch_target(descriptor: &ServerDescriptor) -> String {
    match descriptor.transport() {
        ServerTransport::Process(launch) => launch.command().to_owned(),
        ServerTransport::Stream(endpoint) => endpoint.endpoint_url().to_owned(),
    }
}

#[async_trait]
impl ServerLauncher for InMemoryToolServerHost {
    async fn launch(&self, descriptor: &ServerDescriptor) -> Result<LaunchedServer, ProcessError> {
        let server_id = descriptor.id();
        let target = launch_target(descriptor);
        let is_process = matches!(descriptor.transport(), ServerTransport::Process(_));
        let mut state = self.lock();

        if let Some(message) = state.failing_launches.get(&target) {
            let error = std::io::Error::other(message.clone());
            return Err(ProcessError::spawn(&target, error));
        }
        let program = state.programs.get(&target).cloned();
        if is_process && program.is_none() {
            let error = std::io::Error::new(std::io::ErrorKind::NotFound, "command not found");
            return Err(ProcessError::spawn(&target, error));
        }
        state.journal.push(HostEvent::Launched {
            server_id,
            target: target.clone(),
        });

        let (process, exit) = if is_process {
            state.next_pid += 1;
            let pid = state.next_pid;
            let (sender, receiver) = watch::channel(None);
            let logs = LogSink::default();
            let ignores_terminate = program
                .as_ref()
                .is_some_and(|scripted| scripted.ignores_terminate);
            for line in program.iter().flat_map(|scripted| scripted.stderr.iter()) {
                logs.push(line.clone());
            }
            state.processes.insert(
                pid,
                HostedProcess {
                    server_id,
                    exit: sender,
                    ignores_terminate,
                },
            );
            let spawned = SpawnedProcess {
                pid: Some(pid),
                exit: receiver.clone(),
                control: Arc::new(InMemoryProcessControl {
                    state: Arc::clone(&self.state),
                    pid,
                    server_id,
                }),
                logs,
            };
            (Some(spawned), Some(receiver))
        } else {
            (None, None)
        };

        let failing_connects = program
            .as_ref()
            .map_or(0, |scripted| scripted.failing_connects);
        let connector = InMemoryConnector {
            state: Arc::clone(&self.state),
            server_id,
            program: program.map(Arc::new),
            exit,
            refusals_left: Mutex::new(failing_connects),
        };
        Ok(LaunchedServer {
            connector: Arc::new(connector),
            process,
        })
    }
}

struct InMemoryProcessControl {
    state: Arc<Mutex<HostState>>,
    pid: u32,
    server_id: ServerId,
}

impl ProcessControl for InMemoryProcessControl {
    fn terminate(&self) -> Result<(), ProcessError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.journal.push(HostEvent::Terminated {
            server_id: self.server_id,
        });
        let ignores = state
            .processes
            .get(&self.pid)
            .is_some_and(|process| process.ignores_terminate);
        if !ignores {
            state.exit_process(self.pid, ProcessExit::signalled());
        }
        Ok(())
    }

    fn kill(&self) -> Result<(), ProcessError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.journal.push(HostEvent::Killed {
            server_id: self.server_id,
        });
        state.exit_process(self.pid, ProcessExit::signalled());
        Ok(())
    }
}

struct InMemoryConnector {
    state: Arc<Mutex<HostState>>,
    server_id: ServerId,
    program: Option<Arc<ScriptedServer>>,
    exit: Option<watch::Receiver<Option<ProcessExit>>>,
    refusals_left: Mutex<u32>,
}

impl InMemoryConnector {
    fn refuse(&self) -> bool {
        let mut refusals = self
            .refusals_left
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *refusals == 0 {
            return false;
        }
        *refusals -= 1;
        true
    }

    fn process_exited(&self) -> bool {
        self.exit
            .as_ref()
            .is_some_and(|receiver| receiver.borrow().is_some())
    }
}

#[async_trait]
impl TransportConnector for InMemoryConnector {
    async fn open(&self) -> Result<Arc<dyn ProtocolTransport>, ProtocolError> {
        let accepted = self.program.is_some() && !self.process_exited() && !self.refuse();
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .journal
            .push(HostEvent::Opened {
                server_id: self.server_id,
                accepted,
            });

        let Some(program) = self.program.as_ref().filter(|_| accepted) else {
            return Err(ProtocolError::transport(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        };
        Ok(Arc::new(InMemoryTransport {
            state: Arc::clone(&self.state),
            server_id: self.server_id,
            program: Arc::clone(program),
            exit: self.exit.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct InMemoryTransport {
    state: Arc<Mutex<HostState>>,
    server_id: ServerId,
    program: Arc<ScriptedServer>,
    exit: Option<watch::Receiver<Option<ProcessExit>>>,
    closed: AtomicBool,
}

impl InMemoryTransport {
    fn ensure_open(&self) -> Result<(), ProtocolError> {
        let exited = self
            .exit
            .as_ref()
            .is_some_and(|receiver| receiver.borrow().is_some());
        if exited || self.closed.load(Ordering::Acquire) {
            return Err(ProtocolError::Closed);
        }
        Ok(())
    }

    fn initialize(&self) -> Value {
        let mut capabilities = Map::new();
        capabilities.insert("tools".to_owned(), json!({}));
        if self.program.resources.is_some() {
            capabilities.insert("resources".to_owned(), json!({}));
        }
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": capabilities,
            "serverInfo": { "name": "in-memory", "version": "0" },
        })
    }

    fn list_page<T: serde::Serialize>(
        &self,
        key: &str,
        items: &[T],
        params: Option<&Value>,
    ) -> Result<Value, ProtocolError> {
        let start = params
            .and_then(|value| value.get("cursor"))
            .and_then(Value::as_str)
            .map(str::parse::<usize>)
            .transpose()
            .map_err(|err| ProtocolError::from_rpc(key, -32602, err.to_string()))?
            .unwrap_or(0);
        let size = self.program.page_size.unwrap_or(usize::MAX);
        let page: Vec<&T> = items.iter().skip(start).take(size).collect();
        let next = start.saturating_add(page.len());
        let mut result = Map::new();
        result.insert(
            key.to_owned(),
            serde_json::to_value(page).map_err(|err| ProtocolError::Malformed(err.to_string()))?,
        );
        if next < items.len() {
            result.insert("nextCursor".to_owned(), Value::String(next.to_string()));
        }
        Ok(Value::Object(result))
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, ProtocolError> {
        let params = params.unwrap_or(Value::Null);
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        if !self.program.tools.iter().any(|tool| tool.name() == name) {
            return Err(ProtocolError::from_rpc(
                "tools/call",
                -32602,
                format!("unknown tool: {name}"),
            ));
        }
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
        match self
            .program
            .replies
            .get(&name)
            .cloned()
            .unwrap_or(ScriptedReply::Echo)
        {
            ScriptedReply::Echo => Ok(text_result(arguments.to_string())),
            ScriptedReply::Text(text) => Ok(text_result(text)),
            ScriptedReply::Empty => Ok(json!({ "content": [] })),
            ScriptedReply::Error(message) => {
                Err(ProtocolError::from_rpc("tools/call", -32000, message))
            }
            ScriptedReply::Hang => futures::future::pending().await,
        }
    }

    fn read_resource(&self, params: Option<&Value>) -> Result<Value, ProtocolError> {
        if self.program.resources.is_none() {
            return Err(ProtocolError::from_rpc(
                "resources/read",
                METHOD_NOT_FOUND,
                "method not found",
            ));
        }
        let uri = params
            .and_then(|value| value.get("uri"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let Some(text) = self.program.resource_text.get(uri) else {
            return Err(ProtocolError::from_rpc(
                "resources/read",
                RESOURCE_NOT_FOUND,
                format!("resource not found: {uri}"),
            ));
        };
        Ok(json!({
            "contents": [{ "uri": uri, "mimeType": "text/plain", "text": text }]
        }))
    }
}

fn text_result(text: String) -> Value {
    json!({ "content": [{ "type": "text", "text": text }], "isError": false })
}

#[async_trait]
impl ProtocolTransport for InMemoryTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ProtocolError> {
        self.ensure_open()?;
        match method {
            "initialize" => Ok(self.initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => self.list_page("tools", &self.program.tools, params.as_ref()),
            "tools/call" => self.call_tool(params).await,
            "resources/list" => match &self.program.resources {
                Some(resources) => self.list_page("resources", resources, params.as_ref()),
                None => Err(ProtocolError::from_rpc(method, METHOD_NOT_FOUND, "method not found")),
            },
            "resources/read" => self.read_resource(params.as_ref()),
            _ => Err(ProtocolError::from_rpc(method, METHOD_NOT_FOUND, "method not found")),
        }
    }

    async fn notify(&self, _method: &str, _params: Option<Value>) -> Result<(), ProtocolError> {
        self.ensure_open()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .journal
            .push(HostEvent::Closed {
                server_id: self.server_id,
            });
    }
}
