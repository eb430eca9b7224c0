//! Canonical server state.
//!
//! - [`ServerStateStore`]: single writer for status, telemetry and allocations
//! - [`transitions`]: the status transition table the store enforces for
//!   stream events

pub mod store;
pub mod transitions;

pub use store::{
    ApplyOutcome, ServerSnapshot, ServerStateStore, StatusTransition, TransitionSource,
};
pub use transitions::{allowed_from, is_legal};
