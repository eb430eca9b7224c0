//! Websocket token seam.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::models::ServerIdentity;

/// A short-lived `{token, endpoint}` pair authenticating one transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketCredentials {
    /// Opaque token sent in the `auth` frame.
    pub token: String,
    /// Opaque transport endpoint.
    pub endpoint: String,
    /// Advertised lifetime, when the token carries one.
    pub lifetime: Option<Duration>,
}

impl SocketCredentials {
    pub fn new(token: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            endpoint: endpoint.into(),
            lifetime: None,
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }
}

/// Issues websocket credentials for a server. Called again whenever the
/// current token expires or is rejected.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self, identity: &ServerIdentity) -> SyncResult<SocketCredentials>;
}
