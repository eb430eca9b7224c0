//! Mock implementations for testing.
//!
//! This module provides mock implementations of all trait abstractions,
//! enabling unit testing without network dependencies.
//!
//! # Available Mocks
//!
//! - [`MockHttpClient`] - HTTP client with configurable responses
//! - [`MockConnector`] / [`MockConnection`] - scripted transports with frame injection
//! - [`StaticTokenProvider`] - sequential websocket tokens

pub mod http;
pub mod token;
pub mod transport;

pub use http::{MockHttpClient, MockResponse, RecordedRequest};
pub use token::StaticTokenProvider;
pub use transport::{AuthReply, MockConnection, MockConnector};
