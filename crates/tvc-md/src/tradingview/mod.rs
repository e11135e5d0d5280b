//! TradingView chart-session protocol.
//!
//! A collector opens one chart session per symbol and creates a single series
//! on it. Control messages are JSON `{"m": <method>, "p": [<params>]}` wrapped
//! in the frame envelope from [`crate::framer`].

pub mod protocol;

use serde_json::json;

use crate::framer::encode_frame;

/// Series id used for the one series created per session.
pub const SERIES_ID: &str = "sds_1";
/// Symbol alias the series is bound to.
pub const SYMBOL_ALIAS: &str = "sds_sym_1";
const SERIES_TURNAROUND: &str = "s1";
/// Bars re-requested on top of the computed gap.
const RESUME_OVERLAP_BARS: i64 = 2;

/// Generate a chart session id: `cs_` + 12 lowercase alphanumerics.
pub fn new_chart_session_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("cs_{}", &hex[..12])
}

/// One chart session's handshake parameters.
#[derive(Debug, Clone)]
pub struct ChartSession {
    pub session_id: String,
    pub symbol: String,
    pub timeframe: String,
}

impl ChartSession {
    pub fn new(symbol: &str, timeframe: &str) -> Self {
        Self { session_id: new_chart_session_id(), symbol: symbol.to_string(), timeframe: timeframe.to_string() }
    }

    /// The framed handshake messages, in the order the server requires:
    /// auth → session → resolve → series.
    pub fn handshake(&self, auth_token: &str, bars: u32) -> Vec<String> {
        let resolve = format!(
            "={}",
            json!({"symbol": self.symbol, "adjustment": "splits"})
        );
        [
            json!({"m": "set_auth_token", "p": [auth_token]}),
            json!({"m": "chart_create_session", "p": [self.session_id, ""]}),
            json!({"m": "resolve_symbol", "p": [self.session_id, SYMBOL_ALIAS, resolve]}),
            json!({
                "m": "create_series",
                "p": [self.session_id, SERIES_ID, SERIES_TURNAROUND, SYMBOL_ALIAS, self.timeframe, bars, ""]
            }),
        ]
        .iter()
        .map(|msg| encode_frame(&msg.to_string()))
        .collect()
    }
}

/// How many bars to request so the gap since `latest_ms` is covered.
///
/// Without a known latest bar (or a sizable timeframe) the full
/// `history_bars` window is requested.
pub fn bars_to_request(
    latest_ms: Option<i64>,
    now_ms: i64,
    timeframe_ms: Option<i64>,
    history_bars: u32,
) -> u32 {
    match (latest_ms, timeframe_ms) {
        (Some(latest), Some(tf)) if tf > 0 => {
            let gap = now_ms.saturating_sub(latest).max(0) / tf + RESUME_OVERLAP_BARS;
            gap.clamp(1, history_bars as i64) as u32
        }
        _ => history_bars,
    }
}
