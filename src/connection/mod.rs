//! Persistent connection lifecycle.
//!
//! - [`ConnectionState`] - the lifecycle state machine
//! - [`Backoff`] - reconnect delay schedule
//! - [`ConnectionManager`] - driver task owning one transport per server

pub mod backoff;
pub mod manager;
pub mod state;
pub mod token;

pub use backoff::Backoff;
pub use manager::{ConnectionManager, ConnectionSettings};
pub use state::ConnectionState;
pub use token::{jwt_expires_in, refresh_delay};
