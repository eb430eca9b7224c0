//! Common fixtures for integration tests.
//!
//! Builds a view registry over the in-memory adapters: scripted websocket
//! transports, a canned HTTP client and a static token provider.
//!
//! # Example
//!
//! ```ignore
//! let h = Harness::new();
//! let conn = h.connector.accept();
//! let view = h.registry.mount(identity()).await.unwrap();
//! ```

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use panel_sync::adapters::mock::{MockConnector, MockHttpClient, MockResponse, StaticTokenProvider};
use panel_sync::api::PanelApiClient;
use panel_sync::config::SyncConfig;
use panel_sync::connection::ConnectionState;
use panel_sync::models::ServerIdentity;
use panel_sync::view::{ServerView, ServerViewRegistry};
use serde_json::json;
use uuid::Uuid;

pub const BASE: &str = "https://panel.test/api/client";
pub const SERVER_UUID: &str = "1a7ce997-259b-452e-8b4e-cecc464142ca";

pub fn identity() -> ServerIdentity {
    ServerIdentity::from_uuid(Uuid::parse_str(SERVER_UUID).unwrap())
}

pub fn server_url(suffix: &str) -> String {
    format!("{}/servers/1a7ce997{}", BASE, suffix)
}

/// Registry plus handles to the mocks behind it.
pub struct Harness {
    pub http: MockHttpClient,
    pub connector: MockConnector,
    pub tokens: StaticTokenProvider,
    pub registry: ServerViewRegistry<MockHttpClient>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let http = MockHttpClient::new();
        let connector = MockConnector::new();
        let tokens = StaticTokenProvider::new("wss://node.test/api/servers/1a7ce997/ws");
        let registry = ServerViewRegistry::new(
            Arc::new(PanelApiClient::new(http.clone(), BASE)),
            Arc::new(connector.clone()),
            Arc::new(tokens.clone()),
            config,
        );
        let harness = Self {
            http,
            connector,
            tokens,
            registry,
        };
        harness.serve_state("Survival", "running");
        harness
    }

    /// Answer the server and resources endpoints with this name and state.
    pub fn serve_state(&self, name: &str, current_state: &str) {
        self.http.set_response(
            &server_url(""),
            MockResponse::json(200, json!({"object": "server", "attributes": {"name": name}})),
        );
        self.http.set_response(
            &server_url("/resources"),
            MockResponse::json(
                200,
                json!({"object": "stats", "attributes": {
                    "current_state": current_state,
                    "is_suspended": false,
                    "resources": {"memory_bytes": 1073741824u64, "cpu_absolute": 12.5, "uptime": 60000}
                }}),
            ),
        );
    }
}

/// Wait (in virtual time) until the view's connection reaches `state`.
pub async fn wait_for_state(view: &ServerView<MockHttpClient>, state: ConnectionState) {
    let mut rx = view.subscribe_connection();
    tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for connection state")
        .expect("connection state channel closed");
}

/// `count` file entries named `file-0000` onwards.
pub fn listing(count: usize) -> serde_json::Value {
    let data: Vec<_> = (0..count)
        .map(|i| {
            json!({"object": "file_object", "attributes": {
                "name": format!("file-{:04}", i),
                "mode": "-rw-r--r--",
                "mode_bits": "644",
                "size": 1024,
                "is_file": true,
                "is_symlink": false,
                "mimetype": "text/plain"
            }})
        })
        .collect();
    json!({"object": "list", "data": data})
}
