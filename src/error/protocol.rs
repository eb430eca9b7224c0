//! Frame-level protocol errors.
//!
//! A protocol error never tears the connection down: the offending frame is
//! logged and dropped.

use thiserror::Error;

/// Protocol error variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame was not a `{event, args}` JSON object.
    #[error("malformed frame: {message}")]
    MalformedFrame { message: String, raw: String },

    /// The frame decoded but its arguments did not match the event.
    #[error("invalid payload for '{event}': {message}")]
    InvalidPayload { event: String, message: String },

    /// Telemetry that arrived after a newer sample. Discarded silently.
    #[error("stale sample (epoch {epoch}, seq {seq})")]
    StaleSample { epoch: u64, seq: u64 },
}

impl ProtocolError {
    /// Stale samples are expected during reconnects and are never surfaced.
    pub fn is_silent(&self) -> bool {
        matches!(self, ProtocolError::StaleSample { .. })
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::MalformedFrame { .. } => "E_PROTO_FRAME",
            ProtocolError::InvalidPayload { .. } => "E_PROTO_PAYLOAD",
            ProtocolError::StaleSample { .. } => "E_PROTO_STALE",
        }
    }
}
