//! TOML configuration for the `switchboard` binary.
//!
//! Every field has a default, so an absent file or an empty table yields a
//! usable configuration.

use crate::mcp_bridge::services::{ConnectionSettings, OrchestratorSettings};
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read configuration '{path}': {source}")]
    Read {
        /// Configuration path.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("invalid configuration '{path}': {source}")]
    Parse {
        /// Configuration path.
        path: Utf8PathBuf,
        /// Underlying parse failure.
        source: toml::de::Error,
    },
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            format: LogFormat::Text,
        }
    }
}

/// Connection section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Retries after the first failed connect attempt.
    pub retries: u32,
    /// Pause between connect attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Time to wait for any single response, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay_ms: 1_000,
            request_timeout_secs: 30,
        }
    }
}

/// Process lifecycle section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Grace period after SIGTERM before a forced kill, in seconds.
    pub stop_grace_secs: u64,
    /// Stderr lines quoted in failure messages.
    pub log_tail_lines: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: 5,
            log_tail_lines: 20,
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// JSON file holding the server descriptors.
    pub servers_file: Utf8PathBuf,
    /// Connection policy.
    pub connection: ConnectionConfig,
    /// Process lifecycle policy.
    pub lifecycle: LifecycleConfig,
    /// Logging policy.
    pub logging: LoggingConfig,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            servers_file: Utf8PathBuf::from("switchboard-servers.json"),
            connection: ConnectionConfig::default(),
            lifecycle: LifecycleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SwitchboardConfig {
    /// Reads `path`, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read and
    /// [`ConfigError::Parse`] when it is not valid.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let read_error = |source| ConfigError::Read {
            path: path.to_owned(),
            source,
        };
        let Some(file_name) = path.file_name() else {
            return Err(read_error(std::io::Error::other(
                "configuration path must name a file",
            )));
        };
        let parent = path
            .parent()
            .filter(|dir| !dir.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));

        let contents = match Dir::open_ambient_dir(parent, ambient_authority())
            .and_then(|dir| dir.read_to_string(file_name))
        {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(read_error(err)),
        };
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Returns the connection retry policy.
    #[must_use]
    pub const fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            retries: self.connection.retries,
            retry_delay: Duration::from_millis(self.connection.retry_delay_ms),
        }
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.request_timeout_secs)
    }

    /// Returns the orchestrator policy.
    #[must_use]
    pub const fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            connection: self.connection_settings(),
            stop_grace: Duration::from_secs(self.lifecycle.stop_grace_secs),
            log_tail_lines: self.lifecycle.log_tail_lines,
        }
    }
}
