//! Tool server transport configuration value objects.

use super::{ParseServerKindError, ServerDomainError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a tool server, derived from its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    /// A local process spoken to over standard streams.
    Process,
    /// A network endpoint spoken to over streamable HTTP.
    Stream,
}

impl ServerKind {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ServerKind {
    type Error = ParseServerKindError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "process" | "stdio" => Ok(Self::Process),
            "stream" | "http" => Ok(Self::Stream),
            _ => Err(ParseServerKindError(value.to_owned())),
        }
    }
}

/// Launch settings for a tool server hosted as a local process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLaunch {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

impl ProcessLaunch {
    /// Creates process launch settings.
    ///
    /// # Errors
    ///
    /// Returns [`ServerDomainError::EmptyLaunchCommand`] when `command` is
    /// empty after trimming.
    pub fn new(command: impl Into<String>) -> Result<Self, ServerDomainError> {
        let normalized_command = command.into().trim().to_owned();
        if normalized_command.is_empty() {
            return Err(ServerDomainError::EmptyLaunchCommand);
        }

        Ok(Self {
            command: normalized_command,
            args: Vec::new(),
            env: BTreeMap::new(),
        })
    }

    /// Replaces command-line arguments.
    #[must_use]
    pub fn with_args(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.args = values.into_iter().collect();
        self
    }

    /// Replaces the extra environment merged over the inherited one.
    ///
    /// # Errors
    ///
    /// Returns [`ServerDomainError::InvalidEnvironmentKey`] when a key is
    /// empty or contains `=`.
    pub fn with_env(
        mut self,
        values: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ServerDomainError> {
        self.env = validate_env(values)?;
        Ok(self)
    }

    /// Returns the executable command.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns command-line arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the extra environment variables.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }
}

fn validate_env(
    values: impl IntoIterator<Item = (String, String)>,
) -> Result<BTreeMap<String, String>, ServerDomainError> {
    values
        .into_iter()
        .map(|(key, value)| {
            let trimmed = key.trim().to_owned();
            if trimmed.is_empty() || trimmed.contains('=') {
                return Err(ServerDomainError::InvalidEnvironmentKey(key));
            }
            Ok((trimmed, value))
        })
        .collect()
}

/// Connection settings for a tool server reached over the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndpoint {
    endpoint_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth_token: Option<String>,
}

impl StreamEndpoint {
    /// Creates stream endpoint settings.
    ///
    /// # Errors
    ///
    /// Returns [`ServerDomainError`] when `endpoint_url` is empty or does not
    /// start with `http://` or `https://`.
    pub fn new(endpoint_url: impl Into<String>) -> Result<Self, ServerDomainError> {
        Ok(Self {
            endpoint_url: validate_endpoint_url(endpoint_url.into())?,
            auth_token: None,
        })
    }

    /// Sets the opaque bearer token sent with every request.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = normalize_token(Some(token.into()));
        self
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Returns the bearer token, when configured.
    #[must_use]
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }
}

fn validate_endpoint_url(value: String) -> Result<String, ServerDomainError> {
    let normalized = value.trim().to_owned();
    if normalized.is_empty() {
        return Err(ServerDomainError::EmptyEndpointUrl);
    }

    let has_valid_prefix = normalized.starts_with("http://") || normalized.starts_with("https://");
    if !has_valid_prefix {
        return Err(ServerDomainError::InvalidEndpointUrl(normalized));
    }

    Ok(normalized)
}

fn normalize_token(token: Option<String>) -> Option<String> {
    token
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Supported tool server transports.
///
/// Exactly one of launch command or endpoint URL exists per descriptor; the
/// enum makes the other unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "config")]
pub enum ServerTransport {
    /// Spawned process over standard streams.
    Process(ProcessLaunch),
    /// Streamable HTTP endpoint.
    Stream(StreamEndpoint),
}

impl ServerTransport {
    /// Creates a process transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`ProcessLaunch::new`].
    pub fn process(command: impl Into<String>) -> Result<Self, ServerDomainError> {
        Ok(Self::Process(ProcessLaunch::new(command)?))
    }

    /// Creates a stream transport.
    ///
    /// # Errors
    ///
    /// Returns validation errors from [`StreamEndpoint::new`].
    pub fn stream(endpoint_url: impl Into<String>) -> Result<Self, ServerDomainError> {
        Ok(Self::Stream(StreamEndpoint::new(endpoint_url)?))
    }

    /// Returns the transport kind.
    #[must_use]
    pub const fn kind(&self) -> ServerKind {
        match self {
            Self::Process(_) => ServerKind::Process,
            Self::Stream(_) => ServerKind::Stream,
        }
    }

    pub(crate) fn set_command(&mut self, command: String) -> Result<bool, ServerDomainError> {
        let kind = self.kind();
        let Self::Process(launch) = self else {
            return Err(not_applicable("command", kind));
        };
        let normalized = ProcessLaunch::new(command)?.command;
        Ok(replace_if_changed(&mut launch.command, normalized))
    }

    pub(crate) fn set_args(&mut self, args: Vec<String>) -> Result<bool, ServerDomainError> {
        let kind = self.kind();
        let Self::Process(launch) = self else {
            return Err(not_applicable("args", kind));
        };
        Ok(replace_if_changed(&mut launch.args, args))
    }

    pub(crate) fn set_env(
        &mut self,
        env: BTreeMap<String, String>,
    ) -> Result<bool, ServerDomainError> {
        let kind = self.kind();
        let Self::Process(launch) = self else {
            return Err(not_applicable("env", kind));
        };
        let validated = validate_env(env)?;
        Ok(replace_if_changed(&mut launch.env, validated))
    }

    pub(crate) fn set_endpoint_url(&mut self, url: String) -> Result<bool, ServerDomainError> {
        let kind = self.kind();
        let Self::Stream(endpoint) = self else {
            return Err(not_applicable("endpoint_url", kind));
        };
        let validated = validate_endpoint_url(url)?;
        Ok(replace_if_changed(&mut endpoint.endpoint_url, validated))
    }

    pub(crate) fn set_auth_token(
        &mut self,
        token: Option<String>,
    ) -> Result<bool, ServerDomainError> {
        let kind = self.kind();
        let Self::Stream(endpoint) = self else {
            return Err(not_applicable("auth_token", kind));
        };
        Ok(replace_if_changed(
            &mut endpoint.auth_token,
            normalize_token(token),
        ))
    }
}

const fn not_applicable(field: &'static str, kind: ServerKind) -> ServerDomainError {
    ServerDomainError::FieldNotApplicable { field, kind }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", ServerDomainError::EmptyEndpointUrl)]
    #[case("ftp://tools", ServerDomainError::InvalidEndpointUrl("ftp://tools".to_owned()))]
    fn stream_endpoint_validation(#[case] url: &str, #[case] expected: ServerDomainError) {
        assert_eq!(StreamEndpoint::new(url), Err(expected));
    }

    #[test]
    fn process_launch_rejects_empty_command() {
        assert_eq!(
            ProcessLaunch::new("  "),
            Err(ServerDomainError::EmptyLaunchCommand)
        );
    }

    #[test]
    fn env_keys_are_validated() {
        let result = ProcessLaunch::new("server")
            .expect("valid command")
            .with_env([("A=B".to_owned(), "1".to_owned())]);
        assert!(matches!(
            result,
            Err(ServerDomainError::InvalidEnvironmentKey(_))
        ));
    }

    #[test]
    fn blank_auth_token_is_dropped() {
        let endpoint = StreamEndpoint::new("https://tools.example")
            .expect("valid url")
            .with_auth_token("   ");
        assert_eq!(endpoint.auth_token(), None);
    }

    #[test]
    fn setting_a_process_field_on_a_stream_transport_is_rejected() {
        let mut transport = ServerTransport::stream("http://localhost:9000/mcp").expect("valid");
        let result = transport.set_command("server".to_owned());
        assert_eq!(
            result,
            Err(ServerDomainError::FieldNotApplicable {
                field: "command",
                kind: ServerKind::Stream,
            })
        );
    }

    #[test]
    fn unchanged_values_report_no_change() {
        let mut transport = ServerTransport::process("server").expect("valid");
        let changed = transport
            .set_command("server".to_owned())
            .expect("same kind");
        assert!(!changed);
    }

    #[test]
    fn transport_serializes_with_kind_tag() {
        let transport = ServerTransport::process("npx").expect("valid");
        let json = serde_json::to_value(&transport).expect("serializable");
        assert_eq!(json["kind"], "process");
        assert_eq!(json["config"]["command"], "npx");
    }
}
