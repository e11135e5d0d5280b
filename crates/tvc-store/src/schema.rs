//! Table and index definitions.

pub(crate) const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS candles (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol    TEXT    NOT NULL,
    timestamp INTEGER NOT NULL,
    datetime  TEXT    NOT NULL,
    open      REAL    NOT NULL,
    high      REAL    NOT NULL,
    low       REAL    NOT NULL,
    close     REAL    NOT NULL,
    volume    REAL    NOT NULL CHECK (volume >= 0),
    UNIQUE (symbol, timestamp)
);
CREATE INDEX IF NOT EXISTS idx_candles_timestamp_symbol ON candles (timestamp, symbol);
"#;

pub(crate) const UPSERT: &str = r#"
INSERT INTO candles (symbol, timestamp, datetime, open, high, low, close, volume)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT(symbol, timestamp) DO UPDATE SET
    datetime = excluded.datetime,
    open     = excluded.open,
    high     = excluded.high,
    low      = excluded.low,
    close    = excluded.close,
    volume   = excluded.volume
"#;

// A NULL bound disables that side of the range; LIMIT -1 means unlimited.
pub(crate) const QUERY_RANGE_DESC: &str = r#"
SELECT symbol, timestamp, open, high, low, close, volume
FROM candles
WHERE symbol = ?1
  AND (?2 IS NULL OR timestamp >= ?2)
  AND (?3 IS NULL OR timestamp <= ?3)
ORDER BY timestamp DESC
LIMIT ?4
"#;

pub(crate) const LATEST_TIMESTAMP: &str = "SELECT MAX(timestamp) FROM candles WHERE symbol = ?1";

pub(crate) const PRUNE: &str = "DELETE FROM candles WHERE symbol = ?1 AND timestamp < ?2";

pub(crate) const COUNT: &str = "SELECT COUNT(*) FROM candles WHERE symbol = ?1";

pub(crate) const SYMBOLS: &str = "SELECT DISTINCT symbol FROM candles ORDER BY symbol";
