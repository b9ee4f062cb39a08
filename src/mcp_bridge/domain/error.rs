//! Error types for tool server domain validation and parsing.

use super::ServerKind;
use thiserror::Error;

/// Errors returned while constructing or editing tool server descriptors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServerDomainError {
    /// The server name is empty after trimming.
    #[error("tool server name must not be empty")]
    EmptyServerName,

    /// The server name contains control characters.
    #[error("tool server name '{0}' contains control characters")]
    InvalidServerName(String),

    /// The server name exceeds the 100-character limit.
    #[error("tool server name exceeds 100 character limit: {0}")]
    ServerNameTooLong(String),

    /// The launch command is empty.
    #[error("launch command must not be empty")]
    EmptyLaunchCommand,

    /// An environment variable name is empty or contains `=`.
    #[error("invalid environment variable name '{0}'")]
    InvalidEnvironmentKey(String),

    /// The endpoint URL is empty.
    #[error("endpoint URL must not be empty")]
    EmptyEndpointUrl,

    /// The endpoint URL does not have an `http://` or `https://` prefix.
    #[error("endpoint URL '{0}' must start with 'http://' or 'https://'")]
    InvalidEndpointUrl(String),

    /// An edit carried a field that belongs to the other transport kind.
    #[error("field '{field}' does not apply to {kind} tool servers")]
    FieldNotApplicable {
        /// Name of the rejected field.
        field: &'static str,
        /// Kind of the descriptor being edited.
        kind: ServerKind,
    },

    /// A tool definition name is empty after trimming.
    #[error("tool name must not be empty")]
    EmptyToolName,

    /// A resource definition URI is empty after trimming.
    #[error("resource URI must not be empty")]
    EmptyResourceUri,
}

/// Error returned while parsing a connection status from its string form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown connection status: {0}")]
pub struct ParseConnectionStatusError(pub String);

/// Error returned while parsing a server kind from its string form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown tool server kind: {0}")]
pub struct ParseServerKindError(pub String);
