//! Observable connection state

use serde::Serialize;

/// Snapshot returned by [`super::ConnectionClient::status`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub connected: bool,
    pub last_error: Option<String>,
    /// Reconnect attempts made since the last successful open
    pub reconnect_attempts: u32,
}

/// Lifecycle phase, published on a watch channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Link dropped; backoff retries in progress
    Reconnecting,
    /// Retry bound exhausted; only an explicit connect leaves this phase
    Offline,
    /// Credentials rejected; never retried automatically
    AuthFailed,
}

impl ConnectionPhase {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionPhase::Connected)
    }

    /// Phases the client will not leave on its own
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionPhase::Offline | ConnectionPhase::AuthFailed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionPhase::Disconnected => "disconnected",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::Reconnecting => "reconnecting",
            ConnectionPhase::Offline => "offline",
            ConnectionPhase::AuthFailed => "auth_failed",
        }
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
