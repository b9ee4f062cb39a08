//! Connection status of a protocol client session.

use super::ParseConnectionStatusError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a protocol client connection to one tool server.
///
/// `Disconnected -> Connecting -> Connected`, `Connected -> Disconnected` on
/// transport loss, and `Connecting -> Failed` once retries are exhausted.
/// `Failed` is terminal until a new connect attempt is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No live session.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Handshake completed.
    Connected,
    /// Retries were exhausted.
    Failed,
}

impl ConnectionStatus {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }

    /// Returns whether transition to `target` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Disconnected | Self::Failed, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Failed)
                | (Self::Connected, Self::Disconnected)
                | (_, Self::Disconnected)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ConnectionStatus {
    type Error = ParseConnectionStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseConnectionStatusError(value.to_owned())),
        }
    }
}
