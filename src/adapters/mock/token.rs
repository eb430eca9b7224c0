//! In-memory token provider for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};
use crate::models::ServerIdentity;
use crate::traits::{SocketCredentials, TokenProvider};

/// Issues `token-1`, `token-2`, ... for a fixed endpoint.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    endpoint: String,
    lifetime: Option<Duration>,
    calls: Arc<AtomicUsize>,
    failures: Arc<Mutex<VecDeque<SyncError>>>,
}

impl StaticTokenProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            lifetime: None,
            calls: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Advertise this lifetime on every issued token.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Make the next call fail with `err`. Failures queue up in order.
    pub fn fail_next(&self, err: SyncError) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// Number of `fetch_token` calls so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self, _identity: &ServerIdentity) -> SyncResult<SocketCredentials> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let credentials = SocketCredentials::new(format!("token-{}", n), self.endpoint.clone());
        Ok(match self.lifetime {
            Some(lifetime) => credentials.with_lifetime(lifetime),
            None => credentials,
        })
    }
}
