//! Establishing a single WebSocket connection.
//!
//! The read/write loop lives with the protocol code in `tvc-md`; this module
//! only knows how to open the socket with the configured handshake headers.

use std::collections::HashMap;

use anyhow::Context;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

/// A connected (possibly TLS) WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration for a single WebSocket connection.
#[derive(Debug, Clone)]
pub struct WsConnConfig {
    /// Full WebSocket URL (e.g. `wss://data.tradingview.com/socket.io/websocket`).
    pub url: String,
    /// Extra HTTP headers for the handshake (TradingView checks `Origin`).
    pub extra_headers: HashMap<String, String>,
    /// Log label for this connection.
    pub label: String,
}

/// Establish a WebSocket connection, TLS when the URL is `wss://`.
pub async fn connect_ws(config: &WsConnConfig) -> anyhow::Result<WsStream> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .with_context(|| format!("invalid websocket url {}", config.url))?;

    for (key, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .with_context(|| format!("invalid header name {key}"))?;
        let value =
            HeaderValue::from_str(value).with_context(|| format!("invalid header value for {key}"))?;
        request.headers_mut().insert(name, value);
    }

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("connect {}", config.url))?;
    Ok(stream)
}

/// Extract the host from a URL string.
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.host_str().unwrap_or("").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction() {
        assert_eq!(
            extract_host("wss://data.tradingview.com/socket.io/websocket"),
            "data.tradingview.com"
        );
        assert_eq!(extract_host("not a url"), "");
    }

    #[tokio::test]
    async fn connect_refused_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let cfg = WsConnConfig {
            url: format!("ws://{addr}/socket"),
            extra_headers: HashMap::new(),
            label: "test".into(),
        };
        assert!(connect_ws(&cfg).await.is_err());
    }
}
