//! # tvc-core
//!
//! Core crate for the TradingView candle collector, providing:
//!
//! - **Types** (`types`): finalized [`Candle`]s and incremental [`BarUpdate`]s
//! - **Configuration** (`config`): JSON config deserialization + validation
//! - **Error types** (`error`): domain-specific `FeedError` via thiserror
//! - **WebSocket** (`ws`): TLS connect helper and reconnect backoff policy
//! - **Time utilities** (`time_util`): epoch milliseconds and UTC formatting
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use types::*;
