//! Server → client message classification.
//!
//! Routes by the `m` field:
//!
//! - `du` → incremental bar updates for our series
//! - `timescale_update` → history snapshot (treated as bar updates when seeding)
//! - `critical_error` / `protocol_error` / `symbol_error` / `series_error` →
//!   session failure, the stream is restarted
//! - anything else (server hello, `series_loading`, quote data…) → ignored

use serde_json::Value;
use tvc_core::BarUpdate;
use tvc_core::time_util::secs_f64_to_ms;

use super::SERIES_ID;
use crate::framer::DecodeError;

/// What a decoded server message means for the collector.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Bar snapshots for our series, in arrival order.
    Bars(Vec<BarUpdate>),
    /// The server rejected the session, symbol or series.
    SessionError { method: String, detail: String },
    /// Nothing for the reconstructor.
    Ignored,
}

const ERROR_METHODS: &[&str] = &["critical_error", "protocol_error", "symbol_error", "series_error"];

/// Classify one JSON message from the stream.
pub fn parse_server_message(msg: &Value, seed_from_history: bool) -> Result<ServerEvent, DecodeError> {
    let Some(method) = msg.get("m").and_then(Value::as_str) else {
        return Ok(ServerEvent::Ignored);
    };

    match method {
        "du" => parse_series_bars(msg),
        "timescale_update" if seed_from_history => parse_series_bars(msg),
        m if ERROR_METHODS.contains(&m) => Ok(ServerEvent::SessionError {
            method: m.to_string(),
            detail: msg.get("p").map(Value::to_string).unwrap_or_default(),
        }),
        _ => Ok(ServerEvent::Ignored),
    }
}

/// Pull `p[1][SERIES_ID].s[*].v` out of a data message.
fn parse_series_bars(msg: &Value) -> Result<ServerEvent, DecodeError> {
    let data = msg
        .get("p")
        .and_then(Value::as_array)
        .and_then(|p| p.get(1))
        .ok_or(DecodeError::MissingField("p[1]"))?;

    // Updates for other objects on the session (studies, quotes) are not ours.
    let Some(series) = data.get(SERIES_ID) else {
        return Ok(ServerEvent::Ignored);
    };
    let points = series.get("s").and_then(Value::as_array).ok_or(DecodeError::MissingField("s"))?;

    let mut bars = Vec::with_capacity(points.len());
    for point in points {
        let v = point.get("v").and_then(Value::as_array).ok_or(DecodeError::MissingField("v"))?;
        bars.push(parse_bar(v)?);
    }
    Ok(ServerEvent::Bars(bars))
}

/// 10000-01-01T00:00:00Z.
const MAX_BAR_TIME_SECS: f64 = 253_402_300_800.0;

/// `[time_sec, open, high, low, close, volume?]`
fn parse_bar(v: &[Value]) -> Result<BarUpdate, DecodeError> {
    if v.len() < 5 {
        return Err(DecodeError::InvalidBar(format!("expected >= 5 values, got {}", v.len())));
    }
    let num = |i: usize| {
        v[i].as_f64()
            .ok_or_else(|| DecodeError::InvalidBar(format!("value {i} is not a number: {}", v[i])))
    };
    let secs = num(0)?;
    if !(secs > 0.0 && secs < MAX_BAR_TIME_SECS) {
        return Err(DecodeError::InvalidBar(format!("bar time out of range: {secs}")));
    }
    let bar = BarUpdate {
        timestamp: secs_f64_to_ms(secs),
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: match v.get(5) {
            Some(Value::Null) | None => 0.0,
            Some(_) => num(5)?,
        },
    };
    if !bar.is_well_formed() {
        return Err(DecodeError::InvalidBar(bar.to_string()));
    }
    Ok(bar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn du(points: Value) -> Value {
        json!({"m": "du", "p": ["cs_abc", {"sds_1": {"s": points, "ns": {"d": "", "indexes": "nochange"}}}]})
    }

    #[test]
    fn parses_du_bars() {
        let msg = du(json!([{"i": 299, "v": [1700000040.0, 1.0, 5.0, 1.0, 3.0, 10.0]}]));
        let ev = parse_server_message(&msg, true).unwrap();
        assert_eq!(
            ev,
            ServerEvent::Bars(vec![BarUpdate {
                timestamp: 1_700_000_040_000,
                open: 1.0,
                high: 5.0,
                low: 1.0,
                close: 3.0,
                volume: 10.0
            }])
        );
    }

    #[test]
    fn missing_volume_is_zero() {
        let msg = du(json!([{"i": 0, "v": [60, 1, 2, 0.5, 1.5]}]));
        match parse_server_message(&msg, true).unwrap() {
            ServerEvent::Bars(b) => assert_eq!(b[0].volume, 0.0),
            other => panic!("expected bars, got {other:?}"),
        }
    }

    #[test]
    fn history_only_when_seeding() {
        let msg = json!({
            "m": "timescale_update",
            "p": ["cs_abc", {"sds_1": {"s": [
                {"i": 0, "v": [60, 1, 1, 1, 1, 1]},
                {"i": 1, "v": [120, 2, 2, 2, 2, 2]}
            ]}}]
        });
        match parse_server_message(&msg, true).unwrap() {
            ServerEvent::Bars(b) => assert_eq!(b.iter().map(|b| b.timestamp).collect::<Vec<_>>(), [60_000, 120_000]),
            other => panic!("expected bars, got {other:?}"),
        }
        assert_eq!(parse_server_message(&msg, false).unwrap(), ServerEvent::Ignored);
    }

    #[test]
    fn other_series_and_hello_ignored() {
        let study = json!({"m": "du", "p": ["cs_abc", {"st1": {"st": []}}]});
        assert_eq!(parse_server_message(&study, true).unwrap(), ServerEvent::Ignored);
        let hello = json!({"session_id": "<0.1.2>", "timestamp": 1, "release": "x"});
        assert_eq!(parse_server_message(&hello, true).unwrap(), ServerEvent::Ignored);
        let loading = json!({"m": "series_loading", "p": ["cs_abc", "sds_1", "s1"]});
        assert_eq!(parse_server_message(&loading, true).unwrap(), ServerEvent::Ignored);
    }

    #[test]
    fn session_errors_are_reported() {
        let msg = json!({"m": "symbol_error", "p": ["cs_abc", "sds_sym_1", "invalid symbol"]});
        match parse_server_message(&msg, true).unwrap() {
            ServerEvent::SessionError { method, detail } => {
                assert_eq!(method, "symbol_error");
                assert!(detail.contains("invalid symbol"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_bars_are_decode_errors() {
        assert_eq!(
            parse_server_message(&json!({"m": "du"}), true),
            Err(DecodeError::MissingField("p[1]"))
        );
        assert_eq!(
            parse_server_message(&json!({"m": "du", "p": ["cs", {"sds_1": {}}]}), true),
            Err(DecodeError::MissingField("s"))
        );
        let short = du(json!([{"i": 0, "v": [60, 1, 2]}]));
        assert!(matches!(parse_server_message(&short, true), Err(DecodeError::InvalidBar(_))));
        let text = du(json!([{"i": 0, "v": [60, "1", 2, 0.5, 1.5, 3]}]));
        assert!(matches!(parse_server_message(&text, true), Err(DecodeError::InvalidBar(_))));
        let negative = du(json!([{"i": 0, "v": [60, 1, 2, 0.5, 1.5, -3]}]));
        assert!(matches!(parse_server_message(&negative, true), Err(DecodeError::InvalidBar(_))));    }

    #[test]
    fn out_of_range_bar_times_are_rejected() {
        for t in [json!(0), json!(-60), json!(1e300)] {
            let msg = du(json!([{"i": 0, "v": [t, 1, 2, 0.5, 1.5, 3]}]));
            assert!(
                matches!(parse_server_message(&msg, true), Err(DecodeError::InvalidBar(_))),
                "time {t} accepted"
            );
        }
    }
}
