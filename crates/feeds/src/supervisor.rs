//! Per-venue connection lifecycle.
//!
//! One supervisor owns one transport and one codec. It connects, replays the
//! desired subscriptions, keeps the connection alive, and turns decoded
//! payloads into canonical quotes. Transport failures reconnect with a fixed
//! delay up to a bounded attempt count; exhaustion and fatal codec errors
//! park the supervisor in `Terminated` and surface an event, leaving the rest
//! of the system running.

use crate::codec::{DecodeOutcome, QuoteCodec, RawQuote, TransportKind};
use crate::router::SymbolRouter;
use crate::FeedError;
use compact_str::CompactString;
use futures_util::{SinkExt, StreamExt};
use rtd_core::{Exchange, Quote};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Supervisor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Open,
    Subscribing,
    Live,
    Reconnecting,
    Closing,
    Terminated,
}

/// Events flowing from supervisors to the embedder.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// An enriched canonical quote.
    Quote(Quote),
    /// The supervisor gave up (reconnect exhaustion or fatal codec error).
    Exhausted(Exchange),
}

/// Runtime subscription changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorCommand {
    Subscribe(String),
    Unsubscribe(String),
}

/// Tunables for one supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Attempts before giving up.
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    /// Pacing between subscribe frames.
    pub subscribe_delay: Duration,
    /// HTTP budget for one poll fetch.
    pub poll_timeout: Duration,
    /// Consecutive undecodable binary frames tolerated before reconnecting.
    pub max_undecodable_frames: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(5),
            subscribe_delay: Duration::from_millis(100),
            poll_timeout: Duration::from_secs(10),
            max_undecodable_frames: 16,
        }
    }
}

/// Why a connected session ended.
enum SessionEnd {
    Shutdown,
    Disconnected(String),
    Fatal(String),
}

/// Handle to a spawned supervisor.
pub struct SupervisorHandle {
    exchange: Exchange,
    cmd_tx: mpsc::Sender<SupervisorCommand>,
    state_rx: watch::Receiver<SupervisorState>,
    join: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    pub fn state(&self) -> SupervisorState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions.
    pub fn state_stream(&self) -> watch::Receiver<SupervisorState> {
        self.state_rx.clone()
    }

    /// Request an additional subscription on the live connection.
    pub async fn subscribe(&self, native_ticker: &str) -> Result<(), FeedError> {
        self.cmd_tx
            .send(SupervisorCommand::Subscribe(native_ticker.to_string()))
            .await
            .map_err(|_| FeedError::ChannelClosed)
    }

    pub async fn unsubscribe(&self, native_ticker: &str) -> Result<(), FeedError> {
        self.cmd_tx
            .send(SupervisorCommand::Unsubscribe(native_ticker.to_string()))
            .await
            .map_err(|_| FeedError::ChannelClosed)
    }

    /// Await supervisor exit within `grace`, aborting on expiry.
    pub async fn join(self, grace: Duration) {
        let mut join = self.join;
        if tokio::time::timeout(grace, &mut join).await.is_err() {
            warn!(
                "{}: supervisor did not stop within grace period, aborting",
                self.exchange
            );
            join.abort();
        }
    }
}

/// Drives one venue connection.
pub struct ConnectionSupervisor {
    codec: Box<dyn QuoteCodec>,
    router: Arc<SymbolRouter>,
    config: SupervisorConfig,
    /// Subscriptions to hold, in configuration order. Survives reconnects.
    desired: Vec<String>,
    events_tx: mpsc::Sender<FeedEvent>,
    cmd_rx: mpsc::Receiver<SupervisorCommand>,
    state_tx: watch::Sender<SupervisorState>,
    shutdown_rx: watch::Receiver<bool>,
    undecodable: u32,
}

impl ConnectionSupervisor {
    /// Spawn a supervisor task for one venue.
    pub fn spawn(
        codec: Box<dyn QuoteCodec>,
        router: Arc<SymbolRouter>,
        tickers: Vec<String>,
        config: SupervisorConfig,
        events_tx: mpsc::Sender<FeedEvent>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> SupervisorHandle {
        let exchange = codec.exchange();
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(SupervisorState::Idle);

        let supervisor = Self {
            codec,
            router,
            config,
            desired: dedup_preserving_order(tickers),
            events_tx,
            cmd_rx,
            state_tx,
            shutdown_rx,
            undecodable: 0,
        };
        let join = tokio::spawn(supervisor.run());

        SupervisorHandle {
            exchange,
            cmd_tx,
            state_rx,
            join,
        }
    }

    fn set_state(&self, state: SupervisorState) {
        let _ = self.state_tx.send(state);
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    async fn run(mut self) {
        let exchange = self.codec.exchange();
        let mut attempts = 0u32;

        loop {
            if self.shutting_down() {
                break;
            }

            self.set_state(SupervisorState::Connecting);
            let outcome = match self.codec.transport() {
                TransportKind::Stream { url } => self.stream_session(&url).await,
                TransportKind::Poll { url, cadence } => self.poll_session(&url, cadence).await,
            };

            match outcome {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Fatal(message)) => {
                    error!("{exchange}: fatal: {message}");
                    let _ = self.events_tx.send(FeedEvent::Exhausted(exchange)).await;
                    self.set_state(SupervisorState::Terminated);
                    return;
                }
                Ok(SessionEnd::Disconnected(reason)) => {
                    // A session only starts after a successful handshake, so
                    // the attempt budget resets here.
                    attempts = 1;
                    warn!("{exchange}: disconnected: {reason}");
                }
                Err(e) if e.is_fatal() => {
                    error!("{exchange}: {e}");
                    let _ = self.events_tx.send(FeedEvent::Exhausted(exchange)).await;
                    self.set_state(SupervisorState::Terminated);
                    return;
                }
                Err(e) => {
                    attempts += 1;
                    warn!(
                        "{exchange}: connection failed ({attempts}/{}): {e}",
                        self.config.max_reconnect_attempts
                    );
                    if attempts >= self.config.max_reconnect_attempts {
                        error!("{exchange}: max reconnection attempts reached");
                        let _ = self.events_tx.send(FeedEvent::Exhausted(exchange)).await;
                        self.set_state(SupervisorState::Terminated);
                        return;
                    }
                }
            }

            self.set_state(SupervisorState::Reconnecting);
            let delay = tokio::time::sleep(self.config.reconnect_delay);
            tokio::pin!(delay);
            tokio::select! {
                _ = &mut delay => {}
                _ = self.shutdown_rx.changed() => break,
            }
        }

        self.set_state(SupervisorState::Closing);
        self.set_state(SupervisorState::Terminated);
        info!("{exchange}: supervisor stopped");
    }

    /// One websocket connection from handshake to teardown.
    async fn stream_session(&mut self, default_url: &str) -> Result<SessionEnd, FeedError> {
        let exchange = self.codec.exchange();
        let url = self.codec.prepare().await?.unwrap_or_else(|| default_url.to_string());

        debug!("{exchange}: connecting to {url}");
        let (ws, _response) =
            tokio::time::timeout(self.config.connect_timeout, connect_async(&url))
                .await
                .map_err(|_| {
                    FeedError::Timeout(format!(
                        "connect to {exchange} exceeded {:?}",
                        self.config.connect_timeout
                    ))
                })??;
        info!("{exchange}: connected");
        self.set_state(SupervisorState::Open);
        self.undecodable = 0;

        let (mut write, mut read) = ws.split();

        // Replay every desired subscription in order, paced.
        self.set_state(SupervisorState::Subscribing);
        for i in 0..self.desired.len() {
            let ticker = self.desired[i].clone();
            if let Some(frame) = self.codec.subscribe_frame(&ticker) {
                if let Err(e) = write.send(Message::Text(frame)).await {
                    return Ok(SessionEnd::Disconnected(format!("subscribe write: {e}")));
                }
            }
            if i + 1 < self.desired.len() {
                tokio::time::sleep(self.config.subscribe_delay).await;
            }
        }
        debug!("{exchange}: sent {} subscription(s)", self.desired.len());
        if !self.codec.acks_subscriptions() {
            self.set_state(SupervisorState::Live);
        }

        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(end) = self.on_payload(&text).await {
                                return Ok(end);
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            match String::from_utf8(bytes) {
                                Ok(text) => {
                                    if let Some(end) = self.on_payload(&text).await {
                                        return Ok(end);
                                    }
                                }
                                Err(_) => {
                                    self.undecodable += 1;
                                    if self.undecodable >= self.config.max_undecodable_frames {
                                        return Ok(SessionEnd::Disconnected(
                                            "too many undecodable binary frames".to_string(),
                                        ));
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if write.send(Message::Pong(payload)).await.is_err() {
                                return Ok(SessionEnd::Disconnected("pong write failed".to_string()));
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("{exchange}: pong");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Ok(SessionEnd::Disconnected(format!("server close: {frame:?}")));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Ok(SessionEnd::Disconnected(format!("read error: {e}")));
                        }
                        None => {
                            return Ok(SessionEnd::Disconnected("stream ended".to_string()));
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    let frame = match self.codec.heartbeat_frame() {
                        Some(text) => Message::Text(text),
                        None => Message::Ping(Vec::new()),
                    };
                    let send = tokio::time::timeout(self.config.heartbeat_timeout, write.send(frame));
                    match send.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            return Ok(SessionEnd::Disconnected(format!("heartbeat write: {e}")));
                        }
                        Err(_) => {
                            return Ok(SessionEnd::Disconnected("heartbeat timed out".to_string()));
                        }
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        return Ok(SessionEnd::Shutdown);
                    };
                    let frame = self.apply_command(cmd);
                    if let Some(frame) = frame {
                        if let Err(e) = write.send(Message::Text(frame)).await {
                            return Ok(SessionEnd::Disconnected(format!("command write: {e}")));
                        }
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    self.set_state(SupervisorState::Closing);
                    // Best-effort unsubscribe before closing the transport.
                    for ticker in self.desired.clone() {
                        if let Some(frame) = self.codec.unsubscribe_frame(&ticker) {
                            let _ = write.send(Message::Text(frame)).await;
                        }
                    }
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    /// One polled-REST session: periodic fetches instead of a read loop.
    async fn poll_session(
        &mut self,
        url: &str,
        cadence: Duration,
    ) -> Result<SessionEnd, FeedError> {
        let exchange = self.codec.exchange();
        let client = reqwest::Client::builder()
            .timeout(self.config.poll_timeout)
            .build()?;

        self.set_state(SupervisorState::Open);
        self.set_state(SupervisorState::Subscribing);
        for ticker in self.desired.clone() {
            self.codec.subscribe_frame(&ticker);
        }
        self.set_state(SupervisorState::Live);
        info!("{exchange}: polling {url} every {cadence:?}");

        let mut tick = tokio::time::interval(cadence);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let body = match client.get(url).send().await {
                        Ok(response) if response.status().is_success() => response.text().await,
                        Ok(response) => {
                            return Ok(SessionEnd::Disconnected(format!(
                                "poll returned HTTP {}",
                                response.status()
                            )));
                        }
                        Err(e) => return Ok(SessionEnd::Disconnected(format!("poll failed: {e}"))),
                    };
                    match body {
                        Ok(text) => {
                            if let Some(end) = self.on_payload(&text).await {
                                return Ok(end);
                            }
                        }
                        Err(e) => return Ok(SessionEnd::Disconnected(format!("poll body: {e}"))),
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        return Ok(SessionEnd::Shutdown);
                    };
                    self.apply_command(cmd);
                }
                _ = self.shutdown_rx.changed() => {
                    self.set_state(SupervisorState::Closing);
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    /// Update the desired set and return the wire frame to send, if any.
    fn apply_command(&mut self, cmd: SupervisorCommand) -> Option<String> {
        match cmd {
            SupervisorCommand::Subscribe(ticker) => {
                if !self.desired.contains(&ticker) {
                    self.desired.push(ticker.clone());
                }
                self.codec.subscribe_frame(&ticker)
            }
            SupervisorCommand::Unsubscribe(ticker) => {
                self.desired.retain(|t| *t != ticker);
                self.codec.unsubscribe_frame(&ticker)
            }
        }
    }

    /// Decode one inbound payload and act on the outcome. Returns the session
    /// end when the payload terminates it.
    async fn on_payload(&mut self, text: &str) -> Option<SessionEnd> {
        let exchange = self.codec.exchange();
        match self.codec.decode(text) {
            DecodeOutcome::Quotes(raws) => {
                self.undecodable = 0;
                for raw in raws {
                    if let Some(quote) = enrich(exchange, &self.router, raw) {
                        if self.events_tx.send(FeedEvent::Quote(quote)).await.is_err() {
                            return Some(SessionEnd::Shutdown);
                        }
                    }
                }
                None
            }
            DecodeOutcome::Ack(ack) => {
                self.undecodable = 0;
                debug!("{exchange}: subscription confirmed ({ack:?})");
                if *self.state_tx.borrow() == SupervisorState::Subscribing {
                    self.set_state(SupervisorState::Live);
                }
                None
            }
            DecodeOutcome::Heartbeat => {
                self.undecodable = 0;
                debug!("{exchange}: heartbeat reply");
                None
            }
            DecodeOutcome::Error { message, is_fatal } => {
                if is_fatal {
                    Some(SessionEnd::Fatal(message))
                } else {
                    warn!("{exchange}: venue error: {message}");
                    None
                }
            }
            DecodeOutcome::Ignore => None,
        }
    }
}

/// Tag a decoded quote with venue and receive time, and re-key it to the
/// display symbol. Returns `None` when the ticker has no mapping (the book is
/// never fed an unmapped symbol).
fn enrich(exchange: Exchange, router: &SymbolRouter, raw: RawQuote) -> Option<Quote> {
    if raw.last <= 0.0 {
        debug!("{exchange}: dropping non-positive quote for {}", raw.native_ticker);
        return None;
    }
    let Some(display_symbol) = router.lookup(exchange, &raw.native_ticker) else {
        warn!(
            "{exchange}: no display symbol mapping for ticker {}, dropping quote",
            raw.native_ticker
        );
        return None;
    };

    Some(Quote {
        exchange,
        display_symbol,
        native_ticker: CompactString::from(raw.native_ticker),
        last: raw.last,
        bid: raw.bid.filter(|v| *v > 0.0),
        ask: raw.ask.filter(|v| *v > 0.0),
        exchange_ts_ms: raw.exchange_ts_ms,
        recv_ts_ms: now_ms(),
    })
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn dedup_preserving_order(tickers: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        if !out.contains(&ticker) {
            out.push(ticker);
        }
    }
    out
}
