//! Persistent transport errors.
//!
//! Connect and authentication failures are retried by the connection
//! manager's backoff loop and only reach the user once retries run out.

use thiserror::Error;

/// Transport-level failure variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport handshake with the daemon failed.
    #[error("failed to connect to {endpoint}: {message}")]
    ConnectFailed { endpoint: String, message: String },

    /// The transport closed underneath us.
    #[error("transport closed{}", reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Closed { reason: Option<String> },

    /// Writing a frame failed.
    #[error("failed to send frame: {0}")]
    SendFailed(String),

    /// The daemon rejected the websocket token.
    #[error("websocket token rejected: {message}")]
    AuthRejected { message: String },

    /// The token provider could not issue a token.
    #[error("could not obtain websocket token: {message}")]
    TokenUnavailable { message: String },

    /// Reconnect attempts were exhausted.
    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The connection was explicitly closed and cannot be reused.
    #[error("connection is closed")]
    ConnectionClosed,

    /// `open()` was called while a connection is already active.
    #[error("connection is already open")]
    AlreadyOpen,

    /// `open()` was called with a different server than the one bound.
    #[error("connection is bound to server {bound}")]
    IdentityMismatch { bound: String },
}

impl TransportError {
    /// Whether the backoff loop should keep trying after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectFailed { .. }
                | TransportError::Closed { .. }
                | TransportError::SendFailed(_)
        )
    }

    /// Whether this error originates from token issuance or rejection.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            TransportError::AuthRejected { .. } | TransportError::TokenUnavailable { .. }
        )
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::ConnectFailed { .. } => "E_WS_CONN",
            TransportError::Closed { .. } => "E_WS_CLOSED",
            TransportError::SendFailed(_) => "E_WS_SEND",
            TransportError::AuthRejected { .. } => "E_WS_AUTH",
            TransportError::TokenUnavailable { .. } => "E_WS_TOKEN",
            TransportError::RetriesExhausted { .. } => "E_WS_EXHAUSTED",
            TransportError::ConnectionClosed => "E_WS_TERMINAL",
            TransportError::AlreadyOpen => "E_WS_OPEN",
            TransportError::IdentityMismatch { .. } => "E_WS_IDENTITY",
        }
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            TransportError::RetriesExhausted { attempts } => format!(
                "Lost connection to the server and could not reconnect after {} attempts.",
                attempts
            ),
            TransportError::AuthRejected { .. } | TransportError::TokenUnavailable { .. } => {
                "The server rejected this session. Reload the page to reconnect.".to_string()
            }
            TransportError::ConnectionClosed => "This server view has been closed.".to_string(),
            _ => "Connection to the server was interrupted.".to_string(),
        }
    }
}
