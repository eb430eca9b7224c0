//! Trait abstractions for dependency injection and testability.
//!
//! - [`HttpClient`] - REST calls to the panel
//! - [`TransportConnector`] / [`FrameSink`] / [`FrameSource`] - the persistent event transport
//! - [`TokenProvider`] - websocket credential issuance

pub mod http;
pub mod token;
pub mod transport;

pub use http::{Headers, HttpClient, HttpError, Response};
pub use token::{SocketCredentials, TokenProvider};
pub use transport::{FrameSink, FrameSource, TransportConnector, TransportHalves};
