//! Command-line entry point for the switchboard tool server bridge.
//!
//! `run` starts every enabled server, publishes their tools into an
//! in-process registry and keeps them running until interrupted. The other
//! subcommands edit the persisted server list without starting anything.
//!
//! ```text
//! switchboard --config switchboard.toml add process echo ./echo-server --env LOG=1
//! switchboard --config switchboard.toml enable 2b0e…
//! switchboard --config switchboard.toml run
//! ```

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use mockable::DefaultClock;
use std::io::Write;
use std::sync::Arc;
use switchboard::config::SwitchboardConfig;
use switchboard::mcp_bridge::{
    adapters::{
        file::JsonFileServerStore, log::TracingNotifier, memory::InMemoryCapabilityRegistry,
        process::SystemServerLauncher,
    },
    domain::{
        NewServer, ProcessLaunch, ServerDescriptor, ServerDomainError, ServerId, ServerName,
        ServerTransport, StreamEndpoint,
    },
    ports::{ServerDescriptorStore, ServerStoreError},
    services::{CapabilityBridge, EventBus, ServerLifecycleOrchestrator, StartOutcome},
};
use switchboard::telemetry;
use thiserror::Error;
use tracing::{info, warn};

/// Boxed error type for the main result.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(name = "switchboard", version, about = "Bridges MCP tool servers into a host")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "switchboard.toml")]
    config: Utf8PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start enabled servers and keep them running until ctrl-c.
    Run,
    /// Print the configured servers.
    List,
    /// Add a disabled server.
    Add {
        #[command(subcommand)]
        transport: AddTransport,
    },
    /// Delete a server.
    Remove {
        /// Server identifier.
        id: ServerId,
    },
    /// Mark a server as enabled.
    Enable {
        /// Server identifier.
        id: ServerId,
    },
    /// Mark a server as disabled.
    Disable {
        /// Server identifier.
        id: ServerId,
    },
}

#[derive(Debug, Subcommand)]
enum AddTransport {
    /// A local process spoken to over stdin/stdout.
    Process {
        /// Display name.
        name: String,
        /// Executable to launch.
        command: String,
        /// Arguments passed to the executable.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Extra environment variables as KEY=VALUE.
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,
    },
    /// A remote streamable HTTP endpoint.
    Stream {
        /// Display name.
        name: String,
        /// Endpoint URL.
        url: String,
        /// Bearer token sent with every request.
        #[arg(long)]
        token: Option<String>,
    },
}

/// Errors reported by the command-line front end.
#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Domain(#[from] ServerDomainError),
    #[error(transparent)]
    Store(#[from] ServerStoreError),
    #[error("tool server {0} not found")]
    NotFound(ServerId),
    #[error("runtime init failed: {0}")]
    RuntimeInit(#[source] std::io::Error),
    #[error("failed writing output: {0}")]
    Output(#[source] std::io::Error),
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let config = SwitchboardConfig::load(&cli.config)?;
    telemetry::init(&config.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::RuntimeInit)?;
    runtime.block_on(dispatch(cli.command, config))?;
    Ok(())
}

async fn dispatch(command: Command, config: SwitchboardConfig) -> Result<(), CliError> {
    let store = JsonFileServerStore::new(config.servers_file.clone());
    match command {
        Command::Run => {
            run(store, &config).await;
            Ok(())
        }
        Command::List => list(&store).await,
        Command::Add { transport } => add(&store, transport).await,
        Command::Remove { id } => remove(&store, id).await,
        Command::Enable { id } => set_enabled(&store, id, true).await,
        Command::Disable { id } => set_enabled(&store, id, false).await,
    }
}

async fn run(store: JsonFileServerStore, config: &SwitchboardConfig) {
    let registry = Arc::new(InMemoryCapabilityRegistry::new());
    let bridge = CapabilityBridge::new(Arc::clone(&registry) as _);
    let bus = EventBus::new();
    let attachment = bridge.attach(&bus);
    let launcher = SystemServerLauncher::new(reqwest::Client::new(), config.request_timeout());

    let orchestrator = ServerLifecycleOrchestrator::new(
        Arc::new(store),
        Arc::new(launcher),
        Arc::new(DefaultClock),
        bus,
        Arc::new(TracingNotifier),
        config.orchestrator_settings(),
    );

    let loaded = orchestrator.load_servers().await;
    let outcomes = orchestrator.start_enabled_servers().await;
    let started = outcomes
        .iter()
        .filter(|(_, outcome)| *outcome == StartOutcome::Started)
        .count();
    info!(
        configured = loaded.len(),
        started,
        tools = ?registry.tool_names(),
        resources = ?registry.resource_keys(),
        "tool server fleet running"
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c; shutting down");
    }
    orchestrator.shutdown().await;
    attachment.detach();
}

async fn list(store: &JsonFileServerStore) -> Result<(), CliError> {
    let servers = store.load().await?;
    let mut out = std::io::stdout().lock();
    for server in &servers {
        writeln!(out, "{}", describe(server)).map_err(CliError::Output)?;
    }
    Ok(())
}

fn describe(server: &ServerDescriptor) -> String {
    let state = if server.enabled() { "enabled" } else { "disabled" };
    let target = match server.transport() {
        ServerTransport::Process(launch) => {
            std::iter::once(launch.command().to_owned())
                .chain(launch.args().iter().cloned())
                .collect::<Vec<_>>()
                .join(" ")
        }
        ServerTransport::Stream(endpoint) => endpoint.endpoint_url().to_owned(),
    };
    format!(
        "{}  {:<8}  {:<7}  {}  {}",
        server.id(),
        state,
        server.kind().as_str(),
        server.name(),
        target
    )
}

async fn add(store: &JsonFileServerStore, transport: AddTransport) -> Result<(), CliError> {
    let request = match transport {
        AddTransport::Process {
            name,
            command,
            args,
            env,
        } => {
            let launch = ProcessLaunch::new(command)?
                .with_args(args)
                .with_env(env)?;
            NewServer::new(ServerName::new(name)?, ServerTransport::Process(launch))
        }
        AddTransport::Stream { name, url, token } => {
            let mut endpoint = StreamEndpoint::new(url)?;
            if let Some(value) = token {
                endpoint = endpoint.with_auth_token(value);
            }
            NewServer::new(ServerName::new(name)?, ServerTransport::Stream(endpoint))
        }
    };

    let descriptor = ServerDescriptor::new(request, &DefaultClock);
    let mut servers = store.load().await?;
    servers.push(descriptor.clone());
    store.save(&servers).await?;

    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", descriptor.id()).map_err(CliError::Output)
}

async fn remove(store: &JsonFileServerStore, id: ServerId) -> Result<(), CliError> {
    let mut servers = store.load().await?;
    let before = servers.len();
    servers.retain(|server| server.id() != id);
    if servers.len() == before {
        return Err(CliError::NotFound(id));
    }
    store.save(&servers).await?;
    Ok(())
}

async fn set_enabled(
    store: &JsonFileServerStore,
    id: ServerId,
    enabled: bool,
) -> Result<(), CliError> {
    let mut servers = store.load().await?;
    let server = servers
        .iter_mut()
        .find(|server| server.id() == id)
        .ok_or(CliError::NotFound(id))?;
    if server.set_enabled(enabled, &DefaultClock) {
        store.save(&servers).await?;
    }
    Ok(())
}
