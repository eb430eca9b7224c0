//! Token provider backed by the panel's websocket endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::PanelApiClient;
use crate::error::SyncResult;
use crate::models::ServerIdentity;
use crate::traits::{HttpClient, SocketCredentials, TokenProvider};

/// Fetches a fresh `{token, socket}` pair on every call.
#[derive(Debug)]
pub struct PanelTokenProvider<H: HttpClient> {
    api: Arc<PanelApiClient<H>>,
}

impl<H: HttpClient> PanelTokenProvider<H> {
    pub fn new(api: Arc<PanelApiClient<H>>) -> Self {
        Self { api }
    }
}

impl<H: HttpClient> Clone for PanelTokenProvider<H> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
        }
    }
}

#[async_trait]
impl<H: HttpClient + 'static> TokenProvider for PanelTokenProvider<H> {
    async fn fetch_token(&self, identity: &ServerIdentity) -> SyncResult<SocketCredentials> {
        let credentials = self.api.websocket_token(identity).await?;
        debug!(
            server = %identity,
            lifetime_secs = credentials.lifetime.map(|l| l.as_secs()),
            "issued websocket token"
        );
        Ok(credentials)
    }
}
