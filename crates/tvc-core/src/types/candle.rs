//! Candle data structures.
//!
//! # Timestamp convention
//!
//! All timestamps are **milliseconds since Unix epoch** and mark the bar-open
//! time. The vendor sends seconds; the protocol layer converts on the way in.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// A finalized OHLCV bar. Unique per `(symbol, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// ---------------------------------------------------------------------------
// BarUpdate
// ---------------------------------------------------------------------------

/// One incremental update for the bar that is currently forming.
///
/// The vendor sends many of these per bar as trades accrue; each one carries
/// the full OHLCV snapshot so far, not a delta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarUpdate {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl BarUpdate {
    /// Promote this snapshot into a finalized candle for `symbol`.
    pub fn into_candle(self, symbol: &str) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }

    /// Prices are finite and volume is a non-negative finite number.
    pub fn is_well_formed(&self) -> bool {
        [self.open, self.high, self.low, self.close].iter().all(|p| p.is_finite())
            && self.volume.is_finite()
            && self.volume >= 0.0
    }
}

// ---------------------------------------------------------------------------
// Display impls
// ---------------------------------------------------------------------------

impl std::fmt::Display for Candle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Candle({} t={} o={:.8} h={:.8} l={:.8} c={:.8} v={:.4})",
            self.symbol, self.timestamp, self.open, self.high, self.low, self.close, self.volume
        )
    }
}

impl std::fmt::Display for BarUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bar(t={} o={:.8} h={:.8} l={:.8} c={:.8} v={:.4})",
            self.timestamp, self.open, self.high, self.low, self.close, self.volume
        )
    }
}
