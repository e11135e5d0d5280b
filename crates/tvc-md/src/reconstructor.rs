//! Candle reconstruction from incremental bar updates.
//!
//! The vendor re-sends the whole forming bar on every trade. A bar is only
//! known to be final once an update for a *later* timestamp arrives, at which
//! point the previous snapshot is emitted as a [`Candle`]. The bar still in
//! flight when the stream stops is never emitted.

use ahash::AHashMap;
use tracing::warn;
use tvc_core::{BarUpdate, Candle};

/// Result of applying one update.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// First update seen for the symbol.
    Started,
    /// Same timestamp as the in-flight bar; its fields were overwritten.
    Updated,
    /// A newer bar began; the previous in-flight bar is final.
    Finalized(Candle),
    /// Older than the in-flight bar; dropped.
    Stale { in_flight: i64 },
}

impl ApplyOutcome {
    pub fn into_candle(self) -> Option<Candle> {
        match self {
            ApplyOutcome::Finalized(c) => Some(c),
            _ => None,
        }
    }
}

/// Tracks at most one in-flight bar per symbol.
#[derive(Debug, Default)]
pub struct CandleReconstructor {
    in_flight: AHashMap<String, BarUpdate>,
}

impl CandleReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update for `symbol`.
    pub fn apply(&mut self, symbol: &str, update: BarUpdate) -> ApplyOutcome {
        let Some(current) = self.in_flight.get_mut(symbol) else {
            self.in_flight.insert(symbol.to_string(), update);
            return ApplyOutcome::Started;
        };

        if update.timestamp == current.timestamp {
            *current = update;
            ApplyOutcome::Updated
        } else if update.timestamp > current.timestamp {
            let finished = std::mem::replace(current, update);
            ApplyOutcome::Finalized(finished.into_candle(symbol))
        } else {
            warn!(
                symbol,
                timestamp = update.timestamp,
                in_flight = current.timestamp,
                "[reconstructor] dropping out-of-order bar update"
            );
            ApplyOutcome::Stale { in_flight: current.timestamp }
        }
    }

    /// Apply a batch and collect every candle it finalizes, oldest first.
    pub fn apply_all(&mut self, symbol: &str, updates: impl IntoIterator<Item = BarUpdate>) -> Vec<Candle> {
        updates
            .into_iter()
            .filter_map(|u| self.apply(symbol, u).into_candle())
            .collect()
    }

    /// Timestamp of the bar currently forming for `symbol`.
    pub fn in_flight_timestamp(&self, symbol: &str) -> Option<i64> {
        self.in_flight.get(symbol).map(|b| b.timestamp)
    }

    /// Forget the in-flight bar, e.g. on disconnect. It is not emitted.
    pub fn discard(&mut self, symbol: &str) -> Option<BarUpdate> {
        self.in_flight.remove(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYM: &str = "BINANCE:BTCUSDT";

    fn bar(t: i64, o: f64, h: f64, l: f64, c: f64, v: f64) -> BarUpdate {
        BarUpdate { timestamp: t, open: o, high: h, low: l, close: c, volume: v }
    }

    #[test]
    fn finalizes_last_update_of_bar_on_next_timestamp() {
        let mut r = CandleReconstructor::new();
        assert_eq!(r.apply(SYM, bar(1, 1.0, 5.0, 1.0, 3.0, 10.0)), ApplyOutcome::Started);
        assert_eq!(r.apply(SYM, bar(1, 1.0, 6.0, 1.0, 4.0, 15.0)), ApplyOutcome::Updated);

        let out = r.apply(SYM, bar(2, 4.0, 4.0, 4.0, 4.0, 1.0));
        assert_eq!(
            out,
            ApplyOutcome::Finalized(Candle {
                symbol: SYM.into(),
                timestamp: 1,
                open: 1.0,
                high: 6.0,
                low: 1.0,
                close: 4.0,
                volume: 15.0,
            })
        );
        assert_eq!(r.in_flight_timestamp(SYM), Some(2));
    }

    #[test]
    fn emission_is_strictly_increasing() {
        let mut r = CandleReconstructor::new();
        let updates = [1, 1, 2, 2, 2, 3, 5, 5, 8, 9]
            .into_iter()
            .map(|t| bar(t, 1.0, 1.0, 1.0, 1.0, 1.0));
        let emitted: Vec<i64> = r.apply_all(SYM, updates).iter().map(|c| c.timestamp).collect();
        assert_eq!(emitted, vec![1, 2, 3, 5, 8]);
        assert!(emitted.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn stale_update_dropped() {
        let mut r = CandleReconstructor::new();
        r.apply(SYM, bar(10, 1.0, 1.0, 1.0, 1.0, 1.0));
        assert_eq!(r.apply(SYM, bar(5, 9.0, 9.0, 9.0, 9.0, 9.0)), ApplyOutcome::Stale { in_flight: 10 });
        assert_eq!(r.in_flight_timestamp(SYM), Some(10));
        let c = r.apply(SYM, bar(11, 1.0, 1.0, 1.0, 1.0, 1.0)).into_candle().unwrap();
        assert_eq!((c.timestamp, c.close), (10, 1.0));
    }

    #[test]
    fn symbols_are_independent() {
        let mut r = CandleReconstructor::new();
        r.apply("A", bar(1, 1.0, 1.0, 1.0, 1.0, 1.0));
        assert_eq!(r.apply("B", bar(2, 1.0, 1.0, 1.0, 1.0, 1.0)), ApplyOutcome::Started);
        assert_eq!(r.in_flight_timestamp("A"), Some(1));
    }

    #[test]
    fn discarded_bar_is_never_emitted() {
        let mut r = CandleReconstructor::new();
        r.apply(SYM, bar(1, 1.0, 1.0, 1.0, 1.0, 1.0));
        assert!(r.discard(SYM).is_some());
        assert_eq!(r.apply(SYM, bar(2, 1.0, 1.0, 1.0, 1.0, 1.0)), ApplyOutcome::Started);
    }
}
