//! The retention store.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::{debug, error, warn};
use tvc_core::Candle;
use tvc_core::time_util::ms_to_datetime_text;

use crate::schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected before reaching SQLite (blank symbol, non-finite price, negative volume).
    #[error("invalid candle: {0}")]
    InvalidCandle(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Keyed candle table with idempotent writes, range reads and age-based deletion.
pub struct RetentionStore {
    conn: Connection,
}

impl RetentionStore {
    /// Open (creating if needed) a database file and its schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("[store] opened {} (journal_mode={mode})", path.display());
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    /// Private in-memory database, mostly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::CREATE_SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert or replace the row for `(symbol, timestamp)`.
    ///
    /// Returns the number of rows affected (1 on success, whether inserted or
    /// overwritten). Writing the same candle twice leaves the same single row.
    pub fn upsert(&self, candle: &Candle) -> Result<usize> {
        validate(candle)?;
        let mut stmt = self.conn.prepare_cached(schema::UPSERT)?;
        let n = stmt.execute(params![
            candle.symbol,
            candle.timestamp,
            ms_to_datetime_text(candle.timestamp),
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            candle.volume,
        ])?;
        Ok(n)
    }

    /// Upsert many candles in one transaction.
    ///
    /// A row that fails is logged and skipped; the rest of the batch is still
    /// committed. Returns the number of rows written.
    pub fn upsert_batch(&mut self, candles: &[Candle]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(schema::UPSERT)?;
            for candle in candles {
                let res = validate(candle).and_then(|_| {
                    stmt.execute(params![
                        candle.symbol,
                        candle.timestamp,
                        ms_to_datetime_text(candle.timestamp),
                        candle.open,
                        candle.high,
                        candle.low,
                        candle.close,
                        candle.volume,
                    ])
                    .map_err(StoreError::from)
                });
                match res {
                    Ok(n) => written += n,
                    Err(e) => warn!(
                        symbol = %candle.symbol,
                        timestamp = candle.timestamp,
                        op = "upsert_batch",
                        "[store] row skipped: {e}"
                    ),
                }
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Candles for `symbol` in ascending timestamp order.
    ///
    /// `start` and `end` are inclusive bounds. With `limit`, the newest `limit`
    /// rows inside the range are kept (still returned ascending).
    pub fn query(
        &self,
        symbol: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>> {
        let limit = limit.map(|l| l.min(i64::MAX as usize) as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare_cached(schema::QUERY_RANGE_DESC)?;
        let mut rows = stmt
            .query_map(params![symbol, start, end, limit], |row| {
                Ok(Candle {
                    symbol: row.get(0)?,
                    timestamp: row.get(1)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                    volume: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Newest-first from SQL. Reverse to chronological.
        rows.reverse();
        Ok(rows)
    }

    /// Newest stored timestamp for `symbol`, `None` when it has no rows.
    pub fn latest_timestamp(&self, symbol: &str) -> Result<Option<i64>> {
        let ts = self
            .conn
            .query_row(schema::LATEST_TIMESTAMP, params![symbol], |row| row.get::<_, Option<i64>>(0))?;
        Ok(ts)
    }

    /// Delete every row for `symbol` with `timestamp < cutoff`. Returns the
    /// number of rows deleted (0 is not an error).
    pub fn prune(&self, symbol: &str, cutoff: i64) -> Result<usize> {
        let n = self.conn.execute(schema::PRUNE, params![symbol, cutoff])?;
        Ok(n)
    }

    /// Reclaim free pages and refresh planner statistics.
    ///
    /// Best-effort: failures (typically `SQLITE_BUSY` while another symbol's
    /// task holds a write lock) are logged and otherwise ignored.
    pub fn compact(&self) {
        if let Err(e) = self.conn.execute_batch("VACUUM;") {
            error!(op = "compact", "[store] VACUUM failed: {e}");
        }
        if let Err(e) = self.conn.execute_batch("ANALYZE;") {
            error!(op = "compact", "[store] ANALYZE failed: {e}");
        }
    }

    /// Row count for `symbol`.
    pub fn count(&self, symbol: &str) -> Result<u64> {
        let n: i64 = self.conn.query_row(schema::COUNT, params![symbol], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Distinct symbols that have at least one stored row.
    pub fn symbols(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(schema::SYMBOLS)?;
        let syms = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(syms)
    }
}

fn validate(c: &Candle) -> Result<()> {
    if c.symbol.trim().is_empty() {
        return Err(StoreError::InvalidCandle("blank symbol".into()));
    }
    if ![c.open, c.high, c.low, c.close, c.volume].iter().all(|v| v.is_finite()) {
        return Err(StoreError::InvalidCandle(format!("non-finite value at t={}", c.timestamp)));
    }
    if c.volume < 0.0 {
        return Err(StoreError::InvalidCandle(format!("negative volume at t={}", c.timestamp)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYM: &str = "BINANCE:BTCUSDT";

    fn candle(symbol: &str, ts: i64, close: f64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timestamp: ts,
            open: 1.0,
            high: close.max(1.0) + 1.0,
            low: 0.5,
            close,
            volume: 10.0,
        }
    }

    fn seeded() -> RetentionStore {
        let store = RetentionStore::open_in_memory().unwrap();
        for ts in [100, 200, 300] {
            store.upsert(&candle(SYM, ts, ts as f64)).unwrap();
        }
        store
    }

    fn timestamps(candles: &[Candle]) -> Vec<i64> {
        candles.iter().map(|c| c.timestamp).collect()
    }

    #[test]
    fn upsert_is_idempotent() {
        let store = RetentionStore::open_in_memory().unwrap();
        let c = candle(SYM, 60_000, 42.0);
        assert_eq!(store.upsert(&c).unwrap(), 1);
        let once = store.query(SYM, None, None, None).unwrap();
        assert_eq!(store.upsert(&c).unwrap(), 1);
        let twice = store.query(SYM, None, None, None).unwrap();
        assert_eq!(once, twice);
        assert_eq!(store.count(SYM).unwrap(), 1);
    }

    #[test]
    fn upsert_overwrites_same_key() {
        let store = RetentionStore::open_in_memory().unwrap();
        store.upsert(&candle(SYM, 60_000, 1.0)).unwrap();
        store.upsert(&candle(SYM, 60_000, 2.0)).unwrap();
        let rows = store.query(SYM, None, None, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close, 2.0);
    }

    #[test]
    fn same_timestamp_different_symbols_are_distinct() {
        let store = RetentionStore::open_in_memory().unwrap();
        store.upsert(&candle(SYM, 60_000, 1.0)).unwrap();
        store.upsert(&candle("BINANCE:ETHUSDT", 60_000, 1.0)).unwrap();
        assert_eq!(store.count(SYM).unwrap(), 1);
        assert_eq!(store.symbols().unwrap(), vec!["BINANCE:BTCUSDT", "BINANCE:ETHUSDT"]);
    }

    #[test]
    fn range_query_is_inclusive_and_ascending() {
        let store = seeded();
        let rows = store.query(SYM, Some(150), Some(350), None).unwrap();
        assert_eq!(timestamps(&rows), vec![200, 300]);
        let rows = store.query(SYM, Some(200), Some(200), None).unwrap();
        assert_eq!(timestamps(&rows), vec![200]);
        assert!(store.query("OTHER", None, None, None).unwrap().is_empty());
    }

    #[test]
    fn limit_keeps_most_recent() {
        let store = seeded();
        let rows = store.query(SYM, None, None, Some(2)).unwrap();
        assert_eq!(timestamps(&rows), vec![200, 300]);
        let rows = store.query(SYM, None, Some(250), Some(1)).unwrap();
        assert_eq!(timestamps(&rows), vec![200]);
    }

    #[test]
    fn latest_timestamp_none_when_empty() {
        let store = RetentionStore::open_in_memory().unwrap();
        assert_eq!(store.latest_timestamp(SYM).unwrap(), None);
        store.upsert(&candle(SYM, 500, 1.0)).unwrap();
        store.upsert(&candle(SYM, 100, 1.0)).unwrap();
        assert_eq!(store.latest_timestamp(SYM).unwrap(), Some(500));
    }

    #[test]
    fn prune_deletes_strictly_older() {
        let store = seeded();
        assert_eq!(store.prune(SYM, 250).unwrap(), 2);
        assert_eq!(timestamps(&store.query(SYM, None, None, None).unwrap()), vec![300]);
        assert_eq!(store.prune(SYM, 250).unwrap(), 0);
        assert_eq!(store.prune("UNKNOWN", 1_000).unwrap(), 0);
    }

    #[test]
    fn prune_only_touches_symbol() {
        let store = seeded();
        store.upsert(&candle("OTHER", 100, 1.0)).unwrap();
        store.prune(SYM, 1_000).unwrap();
        assert_eq!(store.count("OTHER").unwrap(), 1);
    }

    #[test]
    fn batch_skips_bad_rows() {
        let mut store = RetentionStore::open_in_memory().unwrap();
        let mut bad = candle(SYM, 200, 1.0);
        bad.volume = -5.0;
        let batch = vec![candle(SYM, 100, 1.0), bad, candle(SYM, 300, 1.0), candle("", 400, 1.0)];
        assert_eq!(store.upsert_batch(&batch).unwrap(), 2);
        assert_eq!(timestamps(&store.query(SYM, None, None, None).unwrap()), vec![100, 300]);
    }

    #[test]
    fn upsert_rejects_invalid() {
        let store = RetentionStore::open_in_memory().unwrap();
        let mut c = candle(SYM, 1, 1.0);
        c.high = f64::NAN;
        assert!(matches!(store.upsert(&c), Err(StoreError::InvalidCandle(_))));
        assert_eq!(store.count(SYM).unwrap(), 0);
    }

    #[test]
    fn compact_keeps_data() {
        let store = seeded();
        store.prune(SYM, 150).unwrap();
        store.compact();
        assert_eq!(store.count(SYM).unwrap(), 2);
    }

    #[test]
    fn file_store_persists_and_shares_between_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("candles.db");

        let a = RetentionStore::open(&path).unwrap();
        let b = RetentionStore::open(&path).unwrap();
        a.upsert(&candle(SYM, 100, 1.0)).unwrap();
        b.upsert(&candle("BINANCE:ETHUSDT", 100, 1.0)).unwrap();
        drop(a);
        drop(b);

        let reopened = RetentionStore::open(&path).unwrap();
        assert_eq!(reopened.count(SYM).unwrap(), 1);
        assert_eq!(reopened.count("BINANCE:ETHUSDT").unwrap(), 1);
    }
}
