//! Concrete implementations of trait abstractions.
//!
//! # Adapters
//!
//! - [`ReqwestHttpClient`] - HTTP client using reqwest
//! - [`TungsteniteConnector`] - daemon transport using tokio-tungstenite
//!
//! The panel-backed [`crate::traits::TokenProvider`] lives with the REST client in
//! [`crate::api::PanelTokenProvider`].
//!
//! # Mock Implementations
//!
//! The [`mock`] submodule provides test doubles for all adapters:
//! - [`mock::MockHttpClient`] - Configurable HTTP responses
//! - [`mock::MockConnector`] - Scripted transports with frame injection
//! - [`mock::StaticTokenProvider`] - Deterministic websocket tokens

pub mod mock;
pub mod reqwest_http;
pub mod tungstenite_ws;

pub use mock::{MockConnector, MockHttpClient, StaticTokenProvider};
pub use reqwest_http::ReqwestHttpClient;
pub use tungstenite_ws::TungsteniteConnector;
