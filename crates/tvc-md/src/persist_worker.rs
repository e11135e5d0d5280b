//! Persistence worker that runs on a dedicated blocking thread.
//!
//! Receives finalized [`Candle`]s from a bounded crossbeam channel, upserts
//! each one into the symbol's [`RetentionStore`], and prunes + compacts the
//! store on a wall-clock ticker whether or not candles arrive. The loop ends
//! once every sender is dropped and the queue is drained.

use std::time::Duration;

use crossbeam_channel::{Receiver, select, tick};
use tracing::{debug, error, info};
use tvc_core::Candle;
use tvc_core::time_util::{now_ms, retention_cutoff_ms};
use tvc_store::{RetentionStore, StoreError};

/// Settings for one symbol's persistence loop.
#[derive(Debug, Clone)]
pub struct PersistConfig {
    pub label: String,
    pub symbol: String,
    pub retention_hours: u64,
    pub prune_interval: Duration,
    pub compact_after_prune: bool,
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub written: u64,
    pub failed: u64,
    pub pruned: u64,
    pub prune_runs: u64,
}

/// Delete rows for `symbol` older than the retention window, then optionally
/// compact. Returns the number of rows deleted.
pub fn prune_symbol(
    store: &RetentionStore,
    symbol: &str,
    retention_hours: u64,
    compact: bool,
) -> Result<usize, StoreError> {
    let cutoff = retention_cutoff_ms(now_ms(), retention_hours);
    let deleted = store.prune(symbol, cutoff)?;
    if compact {
        store.compact();
    }
    Ok(deleted)
}

/// Run the persistence loop on the calling thread.
///
/// Candles are written strictly in queue order; a failed write is logged and
/// the candle is dropped.
pub fn run_persist_loop(cfg: PersistConfig, rx: Receiver<Candle>, store: RetentionStore) -> PersistStats {
    let label = &cfg.label;
    let ticker = tick(cfg.prune_interval);
    let mut stats = PersistStats::default();

    info!("[{label}] persist loop started (retention={}h, prune every {:?})", cfg.retention_hours, cfg.prune_interval);

    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(candle) => match store.upsert(&candle) {
                    Ok(_) => {
                        stats.written += 1;
                        debug!("[{label}] stored {candle}");
                    }
                    Err(e) => {
                        stats.failed += 1;
                        error!(
                            symbol = %candle.symbol,
                            timestamp = candle.timestamp,
                            op = "upsert",
                            "[{label}] candle write failed: {e}"
                        );
                    }
                },
                // Every sender dropped and nothing left queued.
                Err(_) => break,
            },
            recv(ticker) -> _ => {
                stats.prune_runs += 1;
                match prune_symbol(&store, &cfg.symbol, cfg.retention_hours, cfg.compact_after_prune) {
                    Ok(n) => {
                        stats.pruned += n as u64;
                        if n > 0 {
                            info!("[{label}] retention sweep deleted {n} rows");
                        }
                    }
                    Err(e) => error!(symbol = %cfg.symbol, op = "prune", "[{label}] retention sweep failed: {e}"),
                }
            },
        }
    }

    info!(
        "[{label}] persist loop exited (written={} failed={} pruned={})",
        stats.written, stats.failed, stats.pruned
    );
    stats
}
