//! Connection lifecycle states and the legal moves between them.

use std::fmt;

/// Lifecycle of one persistent transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Authenticating,
    Connected,
    /// Waiting out a backoff delay or re-running the handshake.
    Reconnecting { attempt: u32 },
    /// Terminal after `close()`.
    Closed,
    /// Terminal for the current token. A fresh `open()` may start over.
    Errored,
}

impl ConnectionState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (*self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Idle, Connecting) => true,
            (Connecting, Authenticating) => true,
            (Connecting, Reconnecting { .. }) => true,
            (Connecting, Errored) => true,
            (Authenticating, Connected) => true,
            (Authenticating, Reconnecting { .. }) => true,
            (Authenticating, Errored) => true,
            (Connected, Reconnecting { .. }) => true,
            (Connected, Errored) => true,
            (Reconnecting { .. }, Reconnecting { .. }) => true,
            (Reconnecting { .. }, Authenticating) => true,
            (Reconnecting { .. }, Errored) => true,
            (Errored, Connecting) => true,
            _ => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// No further transitions without a new `open()` (or ever, for `Closed`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            other => f.write_str(other.as_str()),
        }
    }
}
