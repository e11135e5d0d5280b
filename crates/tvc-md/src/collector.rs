//! Per-symbol collector: one network task plus one persistence task.
//!
//! ```text
//! network task (tokio)                       persistence task (blocking)
//! ws read ─► FrameDecoder ─► protocol ─►      crossbeam bounded queue
//!            heartbeat echo    CandleReconstructor ──Candle──► upsert
//!                                                       prune ticker ─► prune + compact
//! ```
//!
//! The network task walks `Disconnected → Connecting → Streaming` and falls
//! back to `Connecting` (after a backoff delay) on any transport or session
//! error. On stop it closes the socket and drops its queue sender; the
//! persistence task then drains what is queued and exits.

use std::time::Duration;

use anyhow::anyhow;
use crossbeam_channel::{Sender, TrySendError};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use tvc_core::config::AppConfig;
use tvc_core::error::FeedError;
use tvc_core::time_util::now_ms;
use tvc_core::ws::client::extract_host;
use tvc_core::ws::{Backoff, WsConnConfig, connect_ws};
use tvc_core::Candle;
use tvc_store::RetentionStore;

use crate::framer::{Frame, FrameDecoder, encode_frame};
use crate::persist_worker::{self, PersistConfig, PersistStats};
use crate::reconstructor::{ApplyOutcome, CandleReconstructor};
use crate::tradingview::protocol::{ServerEvent, parse_server_message};
use crate::tradingview::{ChartSession, bars_to_request};

/// Lifecycle of one collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Disconnected,
    Connecting,
    Streaming,
    Shutdown,
}

/// Everything one symbol's collector needs.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub symbol: String,
    pub ws: WsConnConfig,
    pub auth_token: String,
    pub timeframe: String,
    pub timeframe_ms: Option<i64>,
    pub history_bars: u32,
    pub handshake_delay: Duration,
    pub seed_from_history: bool,
    pub backoff: Backoff,
    pub queue_capacity: usize,
    pub retention_hours: u64,
    pub prune_interval: Duration,
    pub compact_after_prune: bool,
}

impl CollectorConfig {
    pub fn from_app(app: &AppConfig, symbol: &str) -> Self {
        let tv = &app.tradingview;
        Self {
            symbol: symbol.to_string(),
            ws: WsConnConfig {
                url: tv.url.clone(),
                extra_headers: tv.extra_headers.clone(),
                label: format!("tv-{symbol}"),
            },
            auth_token: tv.auth_token.clone(),
            timeframe: tv.timeframe.clone(),
            timeframe_ms: tv.timeframe_ms(),
            history_bars: tv.history_bars,
            handshake_delay: Duration::from_millis(tv.handshake_delay_ms),
            seed_from_history: tv.seed_from_history,
            backoff: app.reconnect.backoff(),
            queue_capacity: app.queue_capacity,
            retention_hours: app.retention_hours,
            prune_interval: app.prune_interval(),
            compact_after_prune: app.compact_after_prune,
        }
    }

    fn label(&self) -> &str {
        &self.ws.label
    }
}

/// A running collector. Dropping it without [`Collector::stop`] also shuts the
/// network task down, but the caller then can't wait for the queue to drain.
pub struct Collector {
    symbol: String,
    state_rx: watch::Receiver<CollectorState>,
    shutdown_tx: watch::Sender<bool>,
    net_task: tokio::task::JoinHandle<()>,
    persist_task: tokio::task::JoinHandle<PersistStats>,
}

impl Collector {
    /// Spawn both tasks. `store` is moved into the persistence task, which is
    /// its only user from here on.
    pub fn start(config: CollectorConfig, store: RetentionStore) -> Self {
        let (tx, rx) = crossbeam_channel::bounded::<Candle>(config.queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(CollectorState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let persist_cfg = PersistConfig {
            label: config.label().to_string(),
            symbol: config.symbol.clone(),
            retention_hours: config.retention_hours,
            prune_interval: config.prune_interval,
            compact_after_prune: config.compact_after_prune,
        };
        // The resume point is read on the blocking thread that owns the store;
        // the network task waits for it before the first connect.
        let (resume_tx, resume_rx) = oneshot::channel();
        let persist_task = tokio::task::spawn_blocking(move || {
            let _ = resume_tx.send(read_resume_point(&persist_cfg, &store));
            persist_worker::run_persist_loop(persist_cfg, rx, store)
        });

        let symbol = config.symbol.clone();
        let net_task = tokio::spawn(async move {
            let latest_ms = resume_rx.await.ok().flatten();
            network_loop(config, tx, state_tx, shutdown_rx, latest_ms).await;
        });

        Self { symbol, state_rx, shutdown_tx, net_task, persist_task }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn state(&self) -> CollectorState {
        *self.state_rx.borrow()
    }

    /// Wait until the collector reaches `target`. Returns `false` if the
    /// network task went away first.
    pub async fn wait_for_state(&self, target: CollectorState) -> bool {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|s| *s == target).await.is_ok()
    }

    /// Close the connection, let the persistence task drain, and return its
    /// counters.
    pub async fn stop(self) -> PersistStats {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.net_task.await {
            error!("[tv-{}] network task failed: {e}", self.symbol);
        }
        match self.persist_task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("[tv-{}] persistence task failed: {e}", self.symbol);
                PersistStats::default()
            }
        }
    }
}

/// Newest stored bar for the symbol, if any. A failed read only costs a full
/// history request.
fn read_resume_point(cfg: &PersistConfig, store: &RetentionStore) -> Option<i64> {
    let label = &cfg.label;
    match store.latest_timestamp(&cfg.symbol) {
        Ok(Some(ts)) => {
            info!("[{label}] resuming after stored bar t={ts}");
            Some(ts)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("[{label}] could not read latest stored timestamp: {e}");
            None
        }
    }
}

/// How a streaming session ended without a transport error.
enum SessionEnd {
    Shutdown,
    QueueClosed,
}

/// Connect, stream, reconnect with backoff, until shutdown or retry budget is
/// exhausted.
async fn network_loop(
    config: CollectorConfig,
    tx: Sender<Candle>,
    state_tx: watch::Sender<CollectorState>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut latest_ms: Option<i64>,
) {
    let label = config.label().to_string();
    let mut backoff = config.backoff.clone();
    let mut reconstructor = CandleReconstructor::new();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        state_tx.send_replace(CollectorState::Connecting);
        info!("[{label}] connecting to {}", extract_host(&config.ws.url));

        let res = run_session(
            &config,
            &tx,
            &state_tx,
            &mut shutdown_rx,
            &mut reconstructor,
            &mut latest_ms,
            &mut backoff,
        )
        .await;

        // The forming bar is never emitted across a reconnect.
        if let Some(bar) = reconstructor.discard(&config.symbol) {
            debug!("[{label}] discarded in-flight bar t={}", bar.timestamp);
        }

        match res {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::QueueClosed) => {
                error!("[{label}] persistence queue closed, stopping");
                break;
            }
            Err(e) => warn!("[{label}] session ended: {e:#}"),
        }

        state_tx.send_replace(CollectorState::Disconnected);
        let Some(delay) = backoff.next_delay() else {
            error!("[{label}] giving up after {} consecutive failed attempts", backoff.attempts());
            break;
        };
        info!("[{label}] reconnecting in {delay:?}");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = shutdown_rx.changed() => break,
        }
    }

    state_tx.send_replace(CollectorState::Shutdown);
    info!("[{label}] network task stopped");
}

/// One connection's lifetime: connect, handshake, read until something breaks.
async fn run_session(
    config: &CollectorConfig,
    tx: &Sender<Candle>,
    state_tx: &watch::Sender<CollectorState>,
    shutdown_rx: &mut watch::Receiver<bool>,
    reconstructor: &mut CandleReconstructor,
    latest_ms: &mut Option<i64>,
    backoff: &mut Backoff,
) -> anyhow::Result<SessionEnd> {
    let label = config.label();
    let symbol = config.symbol.as_str();

    let ws_stream = tokio::select! {
        res = connect_ws(&config.ws) => res?,
        _ = shutdown_rx.changed() => return Ok(SessionEnd::Shutdown),
    };
    let (mut ws_write, mut ws_read) = ws_stream.split();

    // auth → session → resolve → series, paced by the handshake delay.
    let bars = bars_to_request(*latest_ms, now_ms(), config.timeframe_ms, config.history_bars);
    let session = ChartSession::new(symbol, &config.timeframe);
    debug!("[{label}] handshake session={} bars={bars}", session.session_id);
    for (i, frame) in session.handshake(&config.auth_token, bars).into_iter().enumerate() {
        if i > 0 && !config.handshake_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(config.handshake_delay) => {},
                _ = shutdown_rx.changed() => {
                    let _ = ws_write.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
        ws_write.send(Message::Text(frame.into())).await?;
    }

    backoff.reset();
    state_tx.send_replace(CollectorState::Streaming);
    info!("[{label}] streaming ({} bars requested)", bars);

    let mut decoder = FrameDecoder::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("[{label}] shutdown signal received");
                let _ = ws_write.close().await;
                return Ok(SessionEnd::Shutdown);
            }

            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        decoder.push(text.as_str());
                        for frame in decoder.frames() {
                            match frame {
                                Ok(Frame::Heartbeat(payload)) => {
                                    let echo = encode_frame(&payload);
                                    ws_write.send(Message::Text(echo.into())).await?;
                                }
                                Ok(Frame::Message(value)) => {
                                    match parse_server_message(&value, config.seed_from_history) {
                                        Ok(ServerEvent::Bars(updates)) => {
                                            for update in updates {
                                                let outcome = reconstructor.apply(symbol, update);
                                                let ApplyOutcome::Finalized(candle) = outcome else {
                                                    continue;
                                                };
                                                let ts = candle.timestamp;
                                                *latest_ms = Some(latest_ms.map_or(ts, |t| t.max(ts)));
                                                if !hand_off(tx, candle).await {
                                                    return Ok(SessionEnd::QueueClosed);
                                                }
                                            }
                                        }
                                        Ok(ServerEvent::SessionError { method, detail }) => {
                                            let _ = ws_write.close().await;
                                            let err = FeedError::Protocol(format!("{method}: {detail}"));
                                            return Err(err.into());
                                        }
                                        Ok(ServerEvent::Ignored) => {}
                                        Err(e) => warn!(symbol, "[{label}] dropping message: {e}"),
                                    }
                                }
                                Err(e) => warn!(symbol, "[{label}] dropping frame: {e}"),
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        return Err(FeedError::WebSocket("received close frame".into()).into());
                    }
                    Some(Err(e)) => return Err(anyhow!(e).context("read error")),
                    None => return Err(FeedError::WebSocket("stream ended".into()).into()),
                    _ => {} // Ping is answered by tungstenite; Binary, Pong, Frame ignored
                }
            }
        }
    }
}

/// Queue a finalized candle, waiting for space when the queue is full.
///
/// Returns `false` once the persistence side has gone away.
async fn hand_off(tx: &Sender<Candle>, candle: Candle) -> bool {
    match tx.try_send(candle) {
        Ok(()) => true,
        Err(TrySendError::Full(candle)) => {
            let tx = tx.clone();
            tokio::task::spawn_blocking(move || tx.send(candle).is_ok())
                .await
                .unwrap_or(false)
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}
