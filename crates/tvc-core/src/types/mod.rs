//! Core data types flowing through the collector.

pub mod candle;

pub use candle::*;
