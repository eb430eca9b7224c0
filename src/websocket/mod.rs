//! Wire format of the persistent event transport.
//!
//! - [`Frame`] - the `{event, args}` codec
//! - [`events`] - reserved and well-known event names
//! - [`OutboundQueue`] - bounded FIFO for sends issued while disconnected

pub mod events;
pub mod frame;
pub mod queue;

pub use events::InboundKind;
pub use frame::Frame;
pub use queue::OutboundQueue;
