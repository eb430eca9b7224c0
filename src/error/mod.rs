//! Unified error handling for the sync engine.
//!
//! | Kind | Source | Handling |
//! |------|--------|----------|
//! | [`TransportError`] | connect / auth failures | retried with backoff, surfaced after exhaustion |
//! | [`ProtocolError`] | malformed or stale frames | logged and dropped, connection kept |
//! | [`CommandError`] | power command rejection or timeout | surfaced immediately, never retried |
//! | [`NetworkError`] | REST calls | retryable per status code |
//!
//! Nothing here is fatal: every failure degrades to a stale or
//! disconnected view.

mod category;
mod command;
mod context;
mod network;
mod protocol;
mod result;
mod sync_error;
mod transport;

pub use category::ErrorCategory;
pub use command::CommandError;
pub use context::ErrorContext;
pub use network::NetworkError;
pub use protocol::ProtocolError;
pub use result::{ResultExt, SyncResult};
pub use sync_error::SyncError;
pub use transport::TransportError;
