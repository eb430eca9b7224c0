//! Panel REST API.
//!
//! - [`PanelApiClient`] - the REST calls the sync engine consumes
//! - [`PanelTokenProvider`] - websocket credentials from the panel

pub mod client;
pub mod token_provider;

pub use client::{PanelApiClient, PowerAccepted};
pub use token_provider::PanelTokenProvider;
