//! Unified error type for the sync engine.
//!
//! `SyncError` gathers every failure the engine can produce so callers can
//! make one decision: retry, surface, or drop.

use std::fmt;

use super::category::ErrorCategory;
use super::command::CommandError;
use super::context::ErrorContext;
use super::network::NetworkError;
use super::protocol::ProtocolError;
use super::transport::TransportError;
use crate::traits::HttpError;

/// Unified error type for the sync engine.
#[derive(Debug)]
pub enum SyncError {
    /// Persistent transport failures (connect, auth, reconnect exhaustion).
    Transport(TransportError),

    /// Malformed or stale frames.
    Protocol(ProtocolError),

    /// Power command rejection or timeout.
    Command(CommandError),

    /// REST failures.
    Network(NetworkError),

    /// Invalid configuration.
    Config { key: String, message: String },

    /// Wrapped error with additional context.
    WithContext {
        error: Box<SyncError>,
        context: ErrorContext,
    },
}

impl SyncError {
    /// Build a configuration error.
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Get the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Transport(err) => {
                if err.is_auth() {
                    ErrorCategory::Auth
                } else {
                    ErrorCategory::Network
                }
            }
            SyncError::Protocol(_) => ErrorCategory::Protocol,
            SyncError::Command(_) => ErrorCategory::Command,
            SyncError::Network(err) => match err {
                NetworkError::HttpStatus { status: 401, .. } => ErrorCategory::Auth,
                NetworkError::HttpStatus { status, .. } if *status >= 500 => ErrorCategory::Server,
                NetworkError::InvalidResponse { .. } => ErrorCategory::Protocol,
                _ => ErrorCategory::Network,
            },
            SyncError::Config { .. } => ErrorCategory::Configuration,
            SyncError::WithContext { error, .. } => error.category(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(err) => err.is_retryable(),
            SyncError::Protocol(_) => false,
            // A power signal is never retried automatically.
            SyncError::Command(_) => false,
            SyncError::Network(err) => err.is_retryable(),
            SyncError::Config { .. } => false,
            SyncError::WithContext { error, .. } => error.is_retryable(),
        }
    }

    /// Whether the error should be hidden from the user entirely.
    pub fn is_silent(&self) -> bool {
        match self {
            SyncError::Protocol(err) => err.is_silent(),
            SyncError::WithContext { error, .. } => error.is_silent(),
            _ => false,
        }
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Transport(err) => err.user_message(),
            SyncError::Protocol(_) => "Received malformed data from the server.".to_string(),
            SyncError::Command(err) => err.user_message(),
            SyncError::Network(err) => err.user_message(),
            SyncError::Config { key, message } => {
                format!("Invalid setting {}: {}", key, message)
            }
            SyncError::WithContext { error, .. } => error.user_message(),
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Transport(err) => err.error_code(),
            SyncError::Protocol(err) => err.error_code(),
            SyncError::Command(err) => err.error_code(),
            SyncError::Network(err) => err.error_code(),
            SyncError::Config { .. } => "E_CONFIG",
            SyncError::WithContext { error, .. } => error.error_code(),
        }
    }

    /// Attach context to this error.
    pub fn with_context(self, ctx: ErrorContext) -> Self {
        SyncError::WithContext {
            error: Box::new(self),
            context: ctx,
        }
    }

    /// Get the context if this error has one attached.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            SyncError::WithContext { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Get the inner error without context.
    pub fn inner(&self) -> &SyncError {
        match self {
            SyncError::WithContext { error, .. } => error.inner(),
            _ => self,
        }
    }

    /// Get the command error, if this is one.
    pub fn as_command(&self) -> Option<&CommandError> {
        match self.inner() {
            SyncError::Command(err) => Some(err),
            _ => None,
        }
    }

    /// Get the recovery hint for this error.
    pub fn recovery_hint(&self) -> &'static str {
        self.category().recovery_hint()
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Transport(err) => write!(f, "{}", err),
            SyncError::Protocol(err) => write!(f, "{}", err),
            SyncError::Command(err) => write!(f, "{}", err),
            SyncError::Network(err) => write!(f, "{}", err),
            SyncError::Config { key, message } => write!(f, "invalid config {}: {}", key, message),
            SyncError::WithContext { error, context } => write!(f, "{} ({})", error, context),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Transport(err) => Some(err),
            SyncError::Protocol(err) => Some(err),
            SyncError::Command(err) => Some(err),
            SyncError::Network(err) => Some(err),
            SyncError::Config { .. } => None,
            SyncError::WithContext { error, .. } => error.source(),
        }
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        SyncError::Transport(err)
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err)
    }
}

impl From<CommandError> for SyncError {
    fn from(err: CommandError) -> Self {
        SyncError::Command(err)
    }
}

impl From<NetworkError> for SyncError {
    fn from(err: NetworkError) -> Self {
        SyncError::Network(err)
    }
}

impl From<HttpError> for SyncError {
    fn from(err: HttpError) -> Self {
        SyncError::Network(err.into())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Network(NetworkError::InvalidResponse {
            message: err.to_string(),
        })
    }
}
