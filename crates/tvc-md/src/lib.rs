//! # tvc-md
//!
//! Real-time candle collection from the TradingView streaming endpoint.
//!
//! ## Architecture
//!
//! Each symbol gets a [`collector::Collector`] made of two tasks joined by a
//! bounded queue: a network task that decodes frames, answers keepalives and
//! reconstructs candles, and a persistence task that writes them to the
//! retention store and prunes it on a timer.
//!
//! ## Modules
//!
//! - [`framer`]: `~m~<len>~m~<payload>` frame codec
//! - [`tradingview`]: chart-session handshake and server message parsing
//! - [`reconstructor`]: in-flight bar tracking and candle finalization
//! - [`persist_worker`]: store writes, retention sweep
//! - [`collector`]: connection lifecycle and task wiring

pub mod collector;
pub mod framer;
pub mod persist_worker;
pub mod reconstructor;
pub mod tradingview;

pub use collector::{Collector, CollectorConfig, CollectorState};
