//! panel-sync - live server state synchronization for game-server panels
//!
//! Keeps a per-server view (status, resource usage, console stream,
//! directory listings) in sync with a daemon websocket and the panel's
//! REST API, reconnecting with backoff and reconciling state after each
//! reconnect.

pub mod adapters;
pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod power;
pub mod state;
pub mod traits;
pub mod view;
pub mod websocket;
