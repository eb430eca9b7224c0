//! Persistent transport seam.
//!
//! The connection manager drives the transport through these traits so that
//! the reconnect and auth state machine can be exercised against
//! [`crate::adapters::mock::MockConnector`] with scripted frames. A connected
//! transport is split into a write half and a read half, the same way the
//! websocket stream is split in production.

use async_trait::async_trait;

use crate::error::TransportError;

/// Write half of a connected transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the transport gracefully. Errors are ignored.
    async fn close(&mut self);
}

/// Read half of a connected transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next text frame.
    ///
    /// Returns `None` once the transport has closed cleanly, or
    /// `Some(Err(_))` when it failed.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
}

/// Both halves of a freshly connected transport.
pub struct TransportHalves {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl TransportHalves {
    pub fn new(sink: Box<dyn FrameSink>, source: Box<dyn FrameSource>) -> Self {
        Self { sink, source }
    }
}

/// Opens transports to a daemon endpoint.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Perform the transport handshake with `endpoint`.
    async fn connect(&self, endpoint: &str) -> Result<TransportHalves, TransportError>;
}
