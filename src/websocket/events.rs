//! Event names used on the transport and inside the dispatcher.

/// Server → client: the auth frame was accepted.
pub const AUTH_SUCCESS: &str = "auth success";
/// Server → client: the token is close to expiry.
pub const TOKEN_EXPIRING: &str = "token expiring";
/// Server → client: the token has expired.
pub const TOKEN_EXPIRED: &str = "token expired";
/// Server → client: the token was rejected.
pub const JWT_ERROR: &str = "jwt error";
pub const STATUS: &str = "status";
pub const STATS: &str = "stats";
pub const CONSOLE_OUTPUT: &str = "console output";
pub const DAEMON_ERROR: &str = "daemon error";
pub const DAEMON_MESSAGE: &str = "daemon message";
pub const INSTALL_OUTPUT: &str = "install output";
pub const INSTALL_STARTED: &str = "install started";
pub const INSTALL_COMPLETED: &str = "install completed";
pub const BACKUP_COMPLETED: &str = "backup completed";
pub const BACKUP_RESTORE_COMPLETED: &str = "backup restore completed";

/// Client → server.
pub const AUTH: &str = "auth";
pub const SEND_LOGS: &str = "send logs";
pub const SEND_STATS: &str = "send stats";
pub const SEND_COMMAND: &str = "send command";
pub const SET_STATE: &str = "set state";

/// Lifecycle events the connection manager dispatches itself.
pub const CONNECTING: &str = "connecting";
pub const CONNECTED: &str = "connected";
pub const DISCONNECTED: &str = "disconnected";
pub const ERROR: &str = "error";

/// Names reserved for the connection manager. Frames from the daemon that use
/// one of these are dispatched under the same name, so they never collide
/// with anything the daemon sends today.
pub const LIFECYCLE: [&str; 4] = [CONNECTING, CONNECTED, DISCONNECTED, ERROR];

/// How the connection manager treats an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    AuthSuccess,
    TokenExpiring,
    TokenExpired,
    JwtError,
    /// Everything else is handed to the dispatcher untouched.
    Passthrough,
}

impl InboundKind {
    pub fn classify(event: &str) -> Self {
        match event {
            AUTH_SUCCESS => InboundKind::AuthSuccess,
            TOKEN_EXPIRING => InboundKind::TokenExpiring,
            TOKEN_EXPIRED => InboundKind::TokenExpired,
            JWT_ERROR => InboundKind::JwtError,
            _ => InboundKind::Passthrough,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(InboundKind::classify("auth success"), InboundKind::AuthSuccess);
        assert_eq!(InboundKind::classify("jwt error"), InboundKind::JwtError);
        assert_eq!(InboundKind::classify("stats"), InboundKind::Passthrough);
        assert_eq!(InboundKind::classify("custom thing"), InboundKind::Passthrough);
    }
}
