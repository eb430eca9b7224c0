//! Error category classification for unified error handling.
//!
//! Categories drive the two decisions the sync engine makes about a failure:
//! whether it is worth retrying and whether the user should see it.

use std::fmt;

/// High-level categorization of errors for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transport or HTTP connectivity problems.
    /// Generally transient and retryable.
    Network,

    /// Token issuance or rejection.
    /// Recovered by fetching a fresh token.
    Auth,

    /// Panel or daemon reported an error (HTTP 5xx, `daemon error`).
    Server,

    /// Malformed input from the remote side. Dropped, never retried.
    Protocol,

    /// A user-issued command was rejected or went unconfirmed.
    /// Surfaced immediately, never retried automatically.
    Command,

    /// Invalid configuration values.
    Configuration,
}

impl ErrorCategory {
    /// Returns true if errors in this category are generally transient
    /// and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Network | ErrorCategory::Server)
    }

    /// Returns true if errors in this category should be shown to the user
    /// as soon as they happen.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Command | ErrorCategory::Configuration | ErrorCategory::Auth
        )
    }

    /// Returns a short label for the category suitable for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Server => "server",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Command => "command",
            ErrorCategory::Configuration => "configuration",
        }
    }

    /// Returns suggested recovery actions for this category.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Check your connection to the panel; the dashboard will keep retrying",
            ErrorCategory::Auth => "Reload the server view to request a new websocket token",
            ErrorCategory::Server => "The daemon may be restarting. Please try again shortly",
            ErrorCategory::Protocol => "The daemon sent data this client does not understand",
            ErrorCategory::Command => "Check the server status before sending another power action",
            ErrorCategory::Configuration => "Check your PANEL_SYNC_* settings",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
