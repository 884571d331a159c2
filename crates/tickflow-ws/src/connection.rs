//! WebSocket connection manager.
//!
//! Owns the single venue connection: connect/reconnect with exponential
//! backoff, heartbeat, replay of active subscriptions after every reconnect,
//! and inbound frame decoding. Everything the application needs to know is
//! posted as a [`ConnectionEvent`] on one queue.

use crate::error::{WsError, WsResult};
use crate::event::ConnectionEvent;
use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::message::{decode_frame, InboundFrame, WsRequest};
use crate::subscription::{RemoteBinding, SubscriptionRegistry};
use crate::ws_write_handle::{WsOutbound, WsWriteHandle};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff (jitter included).
    pub reconnect_max_delay_ms: u64,
    /// Upper bound of the random jitter added to each delay.
    pub reconnect_jitter_ms: u64,
    /// Heartbeat interval.
    pub heartbeat_interval_ms: u64,
    /// Heartbeat timeout (pong must arrive within this).
    pub heartbeat_timeout_ms: u64,
    /// Consecutive missed pongs that force a reconnect.
    pub heartbeat_max_missed: u32,
    /// Timeout of a single connect attempt.
    pub connect_timeout_ms: u64,
    /// Capacity of the outbound queue.
    pub outbound_queue_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30000,
            reconnect_jitter_ms: 1000,
            heartbeat_interval_ms: 30000,
            heartbeat_timeout_ms: 10000,
            heartbeat_max_missed: 2,
            connect_timeout_ms: 10000,
            outbound_queue_capacity: 256,
        }
    }
}

impl ConnectionConfig {
    /// Delay before reconnect attempt `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)` plus jitter, never above the configured cap.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = self
            .reconnect_base_delay_ms
            .saturating_mul(1u64 << exponent);
        let jitter = rand_jitter(self.reconnect_jitter_ms);
        Duration::from_millis(delay.saturating_add(jitter).min(self.reconnect_max_delay_ms))
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    /// Numeric code for gauges.
    pub fn as_code(&self) -> i64 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Reconnecting => 3,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    registry: Arc<SubscriptionRegistry>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    reconnect_count: AtomicU32,
    /// Request id sequence shared with write handles.
    req_ids: Arc<AtomicU64>,
    /// Outbound message sender (for WsWriteHandle).
    outbound_tx: mpsc::Sender<WsOutbound>,
    /// Outbound message receiver (consumed by message loop).
    outbound_rx: TokioMutex<mpsc::Receiver<WsOutbound>>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    /// Create a new connection manager posting events to `event_tx`.
    pub fn new(config: ConnectionConfig, event_tx: mpsc::Sender<ConnectionEvent>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity.max(1));
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            registry: Arc::new(SubscriptionRegistry::new()),
            event_tx,
            reconnect_count: AtomicU32::new(0),
            req_ids: Arc::new(AtomicU64::new(1)),
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a write handle for sending messages.
    ///
    /// The write handle can be cloned and shared across tasks.
    pub fn write_handle(&self) -> WsWriteHandle {
        WsWriteHandle::new(
            self.outbound_tx.clone(),
            self.state.clone(),
            self.registry.clone(),
            self.req_ids.clone(),
        )
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Subscription registry shared with write handles.
    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        self.registry.clone()
    }

    /// Reconnect attempts since the last successful connection.
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// Signal graceful shutdown.
    ///
    /// Cancels the shutdown token, which stops the message loop, the
    /// heartbeat and any pending backoff.
    pub fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect and keep the connection alive until shutdown.
    ///
    /// Returns `Ok(())` after shutdown, or `ConnectionFailed` once a finite
    /// `max_reconnect_attempts` is exhausted.
    pub async fn connect(&self) -> WsResult<()> {
        let result = self.connect_with_retry().await;

        if result.is_ok() {
            self.registry.deactivate_all();
        }
        self.set_state(ConnectionState::Disconnected).await;
        if result.is_ok() {
            info!("Connection manager stopped");
            self.emit(ConnectionEvent::Stopped).await;
        }
        result
    }

    async fn connect_with_retry(&self) -> WsResult<()> {
        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting).await;

            match self.try_connect().await {
                Ok(()) => return Ok(()),
                Err(WsError::ConnectionClosed { code, reason }) => {
                    warn!(code, %reason, "WebSocket connection closed");
                    self.emit(ConnectionEvent::Closed(format!("{code}: {reason}")))
                        .await;
                }
                Err(e) => {
                    error!(error = %e, "WebSocket connection error");
                    self.emit(ConnectionEvent::TransportError(e.to_string()))
                        .await;
                }
            }

            // Venue stream ids and unsent requests die with the connection
            self.registry.clear_remote_ids();
            {
                let mut rx = self.outbound_rx.lock().await;
                self.discard_stale_outbound(&mut rx).await;
            }

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                return Ok(());
            }

            let attempt = self.reconnect_count.fetch_add(1, Ordering::Relaxed) + 1;
            let max = self.config.max_reconnect_attempts;
            if max > 0 && attempt > max {
                error!(attempts = max, "Max reconnection attempts reached");
                self.emit(ConnectionEvent::GaveUp { attempts: max }).await;
                return Err(WsError::ConnectionFailed(format!(
                    "gave up after {max} reconnection attempts"
                )));
            }

            self.set_state(ConnectionState::Reconnecting).await;

            let delay = self.config.backoff_delay(attempt);
            let delay_ms = delay.as_millis() as u64;
            warn!(attempt, delay_ms, "Reconnecting");
            self.emit(ConnectionEvent::Reconnecting { attempt, delay_ms })
                .await;

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    return Ok(());
                }
            }
        }
    }

    /// Run one connection until it ends. `Ok(())` means shutdown.
    async fn try_connect(&self) -> WsResult<()> {
        info!(url = %self.config.url, "Connecting to WebSocket");

        let timeout_ms = self.config.connect_timeout_ms;
        let connect = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            connect_async_tls_with_config(&self.config.url, None, true, None),
        );
        let (ws_stream, _response) = tokio::select! {
            biased;
            () = self.shutdown_token.cancelled() => return Ok(()),
            result = connect => result.map_err(|_| WsError::ConnectTimeout(timeout_ms))??,
        };
        let (mut write, mut read) = ws_stream.split();

        let mut outbound_rx = self.outbound_rx.lock().await;
        self.discard_stale_outbound(&mut outbound_rx).await;

        // No subscription can slip in between the snapshot and the state flip
        let replay = self.registry.begin_replay(|| {
            *self.state.write() = ConnectionState::Connected;
        });
        self.reconnect_count.store(0, Ordering::Relaxed);
        info!(replay = replay.len(), "WebSocket connected");
        self.emit(ConnectionEvent::StateChanged(ConnectionState::Connected))
            .await;

        for sub in &replay {
            let request = WsRequest::subscribe(&sub.kind, self.next_req_id());
            write.send(Message::Text(request.to_text()?)).await?;
            debug!(id = %sub.id, kind = %sub.kind, "Replayed subscription");
        }
        self.emit(ConnectionEvent::Connected {
            replayed: replay.len(),
        })
        .await;

        let mut heartbeat = HeartbeatMonitor::new(
            self.config.heartbeat_interval_ms,
            self.config.heartbeat_timeout_ms,
            self.config.heartbeat_max_missed,
            Instant::now(),
        );
        let mut heartbeat_check = tokio::time::interval(heartbeat.check_period());
        heartbeat_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        heartbeat_check.tick().await;

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(error = %e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text, &mut heartbeat, &mut write).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            heartbeat.record_pong(Instant::now());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            return Err(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "Stream ended".to_string(),
                            });
                        }
                        _ => {}
                    }
                }

                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(WsOutbound::Text(text)) => {
                            write.send(Message::Text(text)).await?;
                        }
                        Some(WsOutbound::Buy { req_id, payload }) => {
                            write.send(Message::Text(payload)).await?;
                            debug!(req_id, "Buy request sent");
                        }
                        None => {}
                    }
                }

                _ = heartbeat_check.tick() => {
                    match heartbeat.on_tick(Instant::now()) {
                        HeartbeatAction::SendPing => {
                            write.send(Message::Text(WsRequest::ping().to_text()?)).await?;
                            heartbeat.record_ping(Instant::now());
                            debug!("Sent heartbeat ping");
                        }
                        HeartbeatAction::Wait => {}
                        HeartbeatAction::Expired { missed } => {
                            error!(missed, "Heartbeat timeout");
                            return Err(WsError::HeartbeatTimeout { missed });
                        }
                    }
                }
            }
        }
    }

    async fn handle_text_message(
        &self,
        text: &str,
        heartbeat: &mut HeartbeatMonitor,
        write: &mut WsSink,
    ) -> WsResult<()> {
        let frame = decode_frame(text);

        match &frame {
            InboundFrame::Pong => {
                heartbeat.record_pong(Instant::now());
                return Ok(());
            }
            InboundFrame::Malformed { reason } => {
                warn!(%reason, len = text.len(), "Dropping malformed frame");
                return Ok(());
            }
            InboundFrame::ForgetAck => {
                debug!("Forget acknowledged");
                return Ok(());
            }
            InboundFrame::Unrecognized { msg_type } => {
                debug!(%msg_type, "Unrecognized frame type");
            }
            _ => {}
        }

        let unwanted = frame.stream_binding().and_then(|(kind, remote_id)| {
            match self.registry.bind_remote(&kind, remote_id) {
                RemoteBinding::Bound | RemoteBinding::AlreadyBound => None,
                RemoteBinding::Stale(remote) => {
                    debug!(%kind, %remote, "Frame from inactive subscription");
                    Some(remote)
                }
                RemoteBinding::Unknown => {
                    debug!(%kind, remote_id, "Frame from unregistered stream");
                    Some(remote_id.to_string())
                }
            }
        });
        if let Some(remote) = unwanted {
            write
                .send(Message::Text(WsRequest::forget(remote).to_text()?))
                .await?;
            return Ok(());
        }

        self.emit(ConnectionEvent::FrameReceived(frame)).await;
        Ok(())
    }

    /// Drop everything still queued from a previous connection.
    async fn discard_stale_outbound(&self, rx: &mut mpsc::Receiver<WsOutbound>) {
        let mut dropped = 0usize;
        while let Ok(msg) = rx.try_recv() {
            dropped += 1;
            if let WsOutbound::Buy { req_id, .. } = msg {
                warn!(req_id, "Dropping unsent buy request");
                self.emit(ConnectionEvent::RequestDropped { req_id }).await;
            }
        }
        if dropped > 0 {
            info!(dropped, "Discarded stale outbound messages");
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        {
            let mut current = self.state.write();
            if *current == state {
                return;
            }
            *current = state;
        }
        self.emit(ConnectionEvent::StateChanged(state)).await;
    }

    async fn emit(&self, event: ConnectionEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }

    fn next_req_id(&self) -> u64 {
        self.req_ids.fetch_add(1, Ordering::Relaxed)
    }
}

/// Generate random jitter in `0..=max_ms`.
fn rand_jitter(max_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    if max_ms == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % (max_ms + 1)
}
