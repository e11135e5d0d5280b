//! Configuration parsing for the candle collector.
//!
//! The collector reads its settings from a single JSON config file. Only
//! `symbols` is required; every other option has a default.
//!
//! # Example config
//!
//! ```json
//! {
//!   "symbols": ["BINANCE:BTCUSDT", "BINANCE:ETHUSDT"],
//!   "retention_hours": 48,
//!   "prune_interval_minutes": 30,
//!   "db_path": "data/candles.db",
//!   "log_path": "/tmp/log",
//!   "tradingview": { "timeframe": "1", "history_bars": 300 },
//!   "reconnect": { "initial_backoff_ms": 500, "max_backoff_ms": 30000 }
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Deserialize;

use crate::error::FeedError;
use crate::ws::Backoff;

pub const DEFAULT_TV_URL: &str = "wss://data.tradingview.com/socket.io/websocket";
pub const DEFAULT_AUTH_TOKEN: &str = "unauthorized_user_token";

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Instruments to collect, in vendor notation (e.g. `"BINANCE:BTCUSDT"`).
    pub symbols: Vec<String>,

    /// How many hours of history the store keeps.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    /// Interval between prune + compact runs.
    #[serde(default = "default_prune_interval_minutes")]
    pub prune_interval_minutes: u64,

    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Capacity of the per-symbol candle hand-off queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Run `compact()` after each scheduled prune.
    #[serde(default = "default_true")]
    pub compact_after_prune: bool,

    /// Used as the log file prefix.
    #[serde(default = "default_module_name")]
    pub module_name: String,

    /// Optional directory for daily-rotating log files.
    pub log_path: Option<String>,

    #[serde(default)]
    pub tradingview: TradingViewConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Streaming endpoint and session settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingViewConfig {
    pub url: String,

    /// Token sent in `set_auth_token`. The anonymous token works for delayed data.
    pub auth_token: String,

    /// Bar resolution as the vendor spells it (`"1"`, `"5"`, `"60"`, `"1D"`).
    pub timeframe: String,

    /// Upper bound on bars requested in `create_series`.
    pub history_bars: u32,

    /// Pause between handshake messages.
    pub handshake_delay_ms: u64,

    /// Treat `timescale_update` history as bar updates so closed bars get stored.
    pub seed_from_history: bool,

    /// Extra HTTP headers for the WebSocket handshake.
    pub extra_headers: HashMap<String, String>,
}

impl Default for TradingViewConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_TV_URL.to_string(),
            auth_token: DEFAULT_AUTH_TOKEN.to_string(),
            timeframe: "1".to_string(),
            history_bars: 300,
            handshake_delay_ms: 100,
            seed_from_history: true,
            extra_headers: HashMap::from([(
                "Origin".to_string(),
                "https://www.tradingview.com".to_string(),
            )]),
        }
    }
}

impl TradingViewConfig {
    /// Bar duration in milliseconds, or `None` for resolutions we can't size
    /// (e.g. tick or range bars).
    pub fn timeframe_ms(&self) -> Option<i64> {
        let tf = self.timeframe.trim();
        let (num, unit_ms) = match tf.chars().last()? {
            'S' => (&tf[..tf.len() - 1], 1_000),
            'D' => (&tf[..tf.len() - 1], 86_400_000),
            'W' => (&tf[..tf.len() - 1], 7 * 86_400_000),
            'M' => (&tf[..tf.len() - 1], 30 * 86_400_000),
            c if c.is_ascii_digit() => (tf, 60_000),
            _ => return None,
        };
        // "D" alone means one day.
        let n: i64 = if num.is_empty() { 1 } else { num.parse().ok()? };
        if n <= 0 {
            return None;
        }
        n.checked_mul(unit_ms)
    }

    /// Tick (`1T`) and range (`1R`) resolutions have no fixed bar length.
    fn is_unsized_resolution(&self) -> bool {
        self.timeframe.trim().ends_with(['T', 'R'])
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Give up after this many consecutive failed attempts. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { initial_backoff_ms: 500, max_backoff_ms: 30_000, multiplier: 2.0, max_retries: None }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.multiplier,
            self.max_retries,
        )
    }
}

fn default_retention_hours() -> u64 {
    48
}
fn default_prune_interval_minutes() -> u64 {
    30
}
fn default_db_path() -> String {
    "data/candles.db".to_string()
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_true() -> bool {
    true
}
fn default_module_name() -> String {
    "tv_collector".to_string()
}

impl AppConfig {
    /// Reject configs the collector cannot run with.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.symbols.is_empty() {
            return Err(FeedError::Config("symbols must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for s in &self.symbols {
            if s.trim().is_empty() {
                return Err(FeedError::Config("symbols must not contain blank entries".into()));
            }
            if !seen.insert(s.as_str()) {
                return Err(FeedError::Config(format!("duplicate symbol: {s}")));
            }
        }
        if self.retention_hours == 0 {
            return Err(FeedError::Config("retention_hours must be > 0".into()));
        }
        if self.prune_interval_minutes == 0 {
            return Err(FeedError::Config("prune_interval_minutes must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(FeedError::Config("queue_capacity must be > 0".into()));
        }
        if self.db_path.trim().is_empty() {
            return Err(FeedError::Config("db_path must not be empty".into()));
        }

        let tv = &self.tradingview;
        if tv.auth_token.trim().is_empty() {
            return Err(FeedError::Config("tradingview.auth_token must not be empty".into()));
        }
        match url::Url::parse(&tv.url) {
            Ok(u) if matches!(u.scheme(), "ws" | "wss") => {}
            Ok(u) => {
                return Err(FeedError::Config(format!(
                    "tradingview.url must be ws:// or wss://, got {}://",
                    u.scheme()
                )));
            }
            Err(e) => return Err(FeedError::Config(format!("tradingview.url: {e}"))),
        }
        if tv.timeframe.trim().is_empty() {
            return Err(FeedError::Config("tradingview.timeframe must not be empty".into()));
        }
        if tv.timeframe_ms().is_none() && !tv.is_unsized_resolution() {
            return Err(FeedError::Config(format!("tradingview.timeframe is invalid: {}", tv.timeframe)));
        }
        if tv.history_bars == 0 {
            return Err(FeedError::Config("tradingview.history_bars must be > 0".into()));
        }

        let rc = &self.reconnect;
        if rc.initial_backoff_ms == 0 || rc.max_backoff_ms < rc.initial_backoff_ms {
            return Err(FeedError::Config(
                "reconnect: need 0 < initial_backoff_ms <= max_backoff_ms".into(),
            ));
        }
        if !(rc.multiplier >= 1.0) {
            return Err(FeedError::Config("reconnect.multiplier must be >= 1.0".into()));
        }
        Ok(())
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_minutes.saturating_mul(60))
    }
}

/// Parse and validate a config from a JSON string.
pub fn parse_config(content: &str) -> anyhow::Result<AppConfig> {
    let config: AppConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load, parse and validate a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse_config(r#"{"symbols": ["BINANCE:BTCUSDT"]}"#).unwrap();
        assert_eq!(cfg.retention_hours, 48);
        assert_eq!(cfg.prune_interval(), Duration::from_secs(30 * 60));
        assert_eq!(cfg.queue_capacity, 1024);
        assert_eq!(cfg.tradingview.url, DEFAULT_TV_URL);
        assert_eq!(cfg.tradingview.auth_token, DEFAULT_AUTH_TOKEN);
        assert!(cfg.tradingview.extra_headers.contains_key("Origin"));
        assert_eq!(cfg.reconnect.max_retries, None);
    }

    #[test]
    fn partial_nested_sections_keep_other_defaults() {
        let cfg = parse_config(
            r#"{
                "symbols": ["A", "B"],
                "retention_hours": 2,
                "tradingview": {"timeframe": "5"},
                "reconnect": {"max_retries": 3}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.tradingview.timeframe, "5");
        assert_eq!(cfg.tradingview.history_bars, 300);
        assert_eq!(cfg.reconnect.max_retries, Some(3));
        assert_eq!(cfg.reconnect.initial_backoff_ms, 500);
    }

    #[test]
    fn rejects_bad_symbol_lists() {
        assert!(parse_config(r#"{"symbols": []}"#).is_err());
        assert!(parse_config(r#"{"symbols": ["A", " "]}"#).is_err());
        assert!(parse_config(r#"{"symbols": ["A", "A"]}"#).is_err());
        assert!(parse_config(r#"{"retention_hours": 1}"#).is_err());
    }

    #[test]
    fn rejects_missing_credentials_and_bad_url() {
        assert!(parse_config(r#"{"symbols": ["A"], "tradingview": {"auth_token": ""}}"#).is_err());
        assert!(parse_config(r#"{"symbols": ["A"], "tradingview": {"url": "https://x"}}"#).is_err());
        assert!(parse_config(r#"{"symbols": ["A"], "retention_hours": 0}"#).is_err());
    }

    #[test]
    fn timeframe_to_ms() {
        let mut tv = TradingViewConfig::default();
        for (tf, ms) in [("1", 60_000), ("15", 900_000), ("1D", 86_400_000), ("D", 86_400_000), ("30S", 30_000)] {
            tv.timeframe = tf.into();
            assert_eq!(tv.timeframe_ms(), Some(ms), "timeframe {tf}");
        }
        tv.timeframe = "1T".into();
        assert_eq!(tv.timeframe_ms(), None);
        tv.timeframe = "9999999999999999D".into();
        assert_eq!(tv.timeframe_ms(), None);
    }

    #[test]
    fn rejects_unusable_timeframes() {
        let with_tf = |tf: &str| {
            parse_config(&format!(r#"{{"symbols": ["A"], "tradingview": {{"timeframe": "{tf}"}}}}"#))
        };
        let err = with_tf("9999999999999999D").unwrap_err();
        assert!(err.to_string().contains("timeframe"), "{err}");
        assert!(with_tf("99999999999999999999").is_err());
        assert!(with_tf("0").is_err());
        assert!(with_tf("5X").is_err());
        assert!(with_tf("240").is_ok());
        assert!(with_tf("1T").is_ok());
    }
}
