//! Typed error definitions for the candle collector.
//!
//! Provides [`FeedError`] for domain-specific errors that are more informative
//! than plain `anyhow::Error` strings. All variants implement `std::error::Error`
//! via `thiserror`, so they integrate seamlessly with `anyhow::Result`.

use thiserror::Error;

/// Domain-specific errors for the candle collector.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Configuration parsing or validation error. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// WebSocket connection, handshake, or communication error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The remote endpoint reported a session/series/symbol error.
    #[error("protocol error: {0}")]
    Protocol(String),
}
