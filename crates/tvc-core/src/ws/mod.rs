//! WebSocket connect helper and reconnect backoff.

pub mod backoff;
pub mod client;

pub use backoff::Backoff;
pub use client::{WsConnConfig, WsStream, connect_ws};
