//! Upstream WebSocket Connector
//!
//! Owns the single WebSocket connection to the upstream feed. Runs the
//! connect / authenticate / read loop, drives liveness pings, applies
//! subscription deltas arriving over the command channel, and emits
//! [`UpstreamEvent`]s for the broadcaster.
//!
//! # Authentication
//!
//! A signed auth frame is sent immediately after the socket opens. No
//! subscription traffic is forwarded until the upstream confirms with
//! `auth_success`; at that point the registry's upstream-active key set is
//! replayed, so deltas that raced the handshake are never lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::domain::subscription::{SubscriptionDelta, SubscriptionRegistry};
use crate::infrastructure::metrics;

use super::auth::{AuthError, Credentials};
use super::codec::{CodecError, JsonCodec, UpstreamFrame};
use super::heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatSignal, LivenessState};
use super::messages::{
    AuthRequest, ChannelSubscription, L1OrderbookMessage, L2OrderbookMessage, SubscriptionRequest,
    TickerMessage,
};
use super::reconnect::{ReconnectConfig, ReconnectController};

/// Deadline for the upstream auth verdict after the socket opens.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Type
// =============================================================================

/// Errors from the upstream connection loop.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The upstream connection went silent.
    #[error("upstream connection is stale")]
    Stale,

    /// Connection closed by the upstream.
    #[error("connection closed")]
    ConnectionClosed,

    /// Reconnection budget spent.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

// =============================================================================
// Published Connection State
// =============================================================================

/// Authentication phase of the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Socket not open or handshake not started.
    Unauthenticated,
    /// Auth frame sent; waiting for the verdict.
    Authenticating,
    /// Upstream confirmed authentication.
    Authenticated,
    /// The connection task has stopped.
    Closed,
}

/// Observable state of the connector, shared with health checks.
#[derive(Debug)]
pub struct ConnectorState {
    phase: RwLock<ConnectionPhase>,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
    frames_dropped: AtomicU64,
    last_error: RwLock<Option<String>>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    terminated: AtomicBool,
}

impl Default for ConnectorState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorState {
    /// Create state in the `Unauthenticated` phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: RwLock::new(ConnectionPhase::Unauthenticated),
            reconnect_attempts: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            last_error: RwLock::new(None),
            last_connected_at: RwLock::new(None),
            terminated: AtomicBool::new(false),
        }
    }

    /// Current authentication phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.read()
    }

    /// Set the phase. Reaching `Authenticated` resets the attempt counter
    /// and stamps the connection time.
    pub fn set_phase(&self, phase: ConnectionPhase) {
        *self.phase.write() = phase;
        if phase == ConnectionPhase::Authenticated {
            self.reconnect_attempts.store(0, Ordering::SeqCst);
            *self.last_connected_at.write() = Some(Utc::now());
        }
    }

    /// Record a reconnection attempt number.
    pub fn set_reconnect_attempt(&self, attempt: u32) {
        self.reconnect_attempts.store(attempt, Ordering::SeqCst);
    }

    /// Reconnection attempts since the last successful connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Count one decoded inbound frame.
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Total decoded inbound frames.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Count one dropped (undecodable or unknown) frame.
    pub fn record_dropped_frame(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Total dropped frames.
    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Record the most recent connection error.
    pub fn set_last_error(&self, error: String) {
        *self.last_error.write() = Some(error);
    }

    /// The most recent connection error, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// When the connection last authenticated.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Mark the connection task as permanently finished.
    pub fn mark_terminated(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.set_phase(ConnectionPhase::Closed);
    }

    /// Whether the connection task has permanently finished.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Commands and Events
// =============================================================================

/// Commands sent to the connector task.
#[derive(Debug)]
pub enum UpstreamCommand {
    /// Apply a subscription delta upstream.
    Apply(SubscriptionDelta),
}

/// Events emitted by the connector for the broadcaster.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// Connected and authenticated.
    Online,
    /// Connection lost; reconnection may follow.
    Offline,
    /// Reconnecting after a failure.
    Reconnecting {
        /// Attempt number since the last successful connection.
        attempt: u32,
    },
    /// Authentication failed.
    AuthFailed(AuthError),
    /// Degraded mode notice (mock data active).
    AuthWarning(String),
    /// Ticker update.
    Ticker(TickerMessage),
    /// Top-of-book update.
    OrderbookL1(L1OrderbookMessage),
    /// Order book depth update.
    OrderbookL2(L2OrderbookMessage),
    /// Product catalog snapshot.
    Products(serde_json::Value),
    /// Subscription change accepted upstream.
    SubscriptionAccepted(Vec<ChannelSubscription>),
    /// Subscription change rejected upstream.
    SubscriptionRejected(String),
    /// The connection task stopped and will not retry on its own.
    Terminal(String),
}

// =============================================================================
// Connector
// =============================================================================

/// Configuration for the upstream connector.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// WebSocket URL of the upstream feed.
    pub url: String,
    /// API credentials for the auth handshake.
    pub credentials: Credentials,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Liveness configuration.
    pub heartbeat: HeartbeatConfig,
}

/// The upstream WebSocket client.
///
/// Exactly one connector task runs at a time; the deduplicator enforces
/// this across client sessions.
pub struct UpstreamConnector {
    config: ConnectorConfig,
    registry: Arc<SubscriptionRegistry>,
    state: Arc<ConnectorState>,
    event_tx: mpsc::Sender<UpstreamEvent>,
    cancel: CancellationToken,
}

impl UpstreamConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new(
        config: ConnectorConfig,
        registry: Arc<SubscriptionRegistry>,
        state: Arc<ConnectorState>,
        event_tx: mpsc::Sender<UpstreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the connection loop until cancelled or a terminal failure.
    pub async fn run(self, mut command_rx: mpsc::Receiver<UpstreamCommand>) {
        let mut controller = ReconnectController::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Upstream connector cancelled");
                break;
            }

            controller.on_connecting();
            match self.connect_and_run(&mut command_rx, &mut controller).await {
                Ok(()) => {
                    tracing::info!("Upstream connection closed gracefully");
                    break;
                }
                Err(ConnectorError::Auth(err)) if err.is_fatal() => {
                    tracing::error!(error = %err, "Fatal authentication error, not retrying");
                    self.state.set_last_error(err.to_string());
                    let _ = self.event_tx.send(UpstreamEvent::AuthFailed(err.clone())).await;
                    let _ = self.event_tx.send(UpstreamEvent::Terminal(err.to_string())).await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream connection error");
                    self.state.set_last_error(e.to_string());
                    self.state.set_phase(ConnectionPhase::Unauthenticated);
                    let _ = self.event_tx.send(UpstreamEvent::Offline).await;

                    controller.on_disconnected();
                    if let Some(delay) = controller.next_delay() {
                        let attempt = controller.attempt_count();
                        self.state.set_reconnect_attempt(attempt);
                        metrics::record_reconnect();
                        tracing::info!(
                            attempt,
                            delay_ms = delay.as_millis(),
                            "Reconnecting to upstream feed"
                        );

                        let _ = self
                            .event_tx
                            .send(UpstreamEvent::Reconnecting { attempt })
                            .await;

                        tokio::select! {
                            () = self.cancel.cancelled() => {
                                tracing::info!("Connector cancelled during reconnect delay");
                                break;
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    } else {
                        tracing::error!("Reconnection attempts exhausted");
                        let _ = self
                            .event_tx
                            .send(UpstreamEvent::Terminal(
                                ConnectorError::MaxReconnectAttemptsExceeded.to_string(),
                            ))
                            .await;
                        break;
                    }
                }
            }
        }

        self.state.mark_terminated();
    }

    /// Connect, authenticate, and process frames until error or cancellation.
    async fn connect_and_run(
        &self,
        command_rx: &mut mpsc::Receiver<UpstreamCommand>,
        controller: &mut ReconnectController,
    ) -> Result<(), ConnectorError> {
        tracing::info!(url = %self.config.url, "Connecting to upstream feed");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;
        metrics::record_upstream_connection();

        let (mut write, mut read) = ws_stream.split();

        // Authenticate before anything else
        self.state.set_phase(ConnectionPhase::Authenticating);
        let auth = AuthRequest::signed(
            self.config.credentials.api_key(),
            self.config.credentials.api_secret(),
            Utc::now().timestamp_millis(),
        );
        send_json(&mut write, &auth).await?;

        let mut authenticated = false;
        let auth_deadline = tokio::time::sleep(AUTH_TIMEOUT);
        tokio::pin!(auth_deadline);

        // Liveness loop for this connection
        let liveness = Arc::new(LivenessState::new());
        let (signal_tx, mut signal_rx) = mpsc::channel::<HeartbeatSignal>(10);
        let heartbeat_cancel = CancellationToken::new();
        let heartbeat = Heartbeat::new(
            self.config.heartbeat.clone(),
            liveness.clone(),
            signal_tx,
            heartbeat_cancel.clone(),
        );
        let _heartbeat_handle = tokio::spawn(heartbeat.run());

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    heartbeat_cancel.cancel();
                    return Ok(());
                }
                () = &mut auth_deadline, if !authenticated => {
                    heartbeat_cancel.cancel();
                    return Err(AuthError::Timeout.into());
                }
                signal = signal_rx.recv() => {
                    match signal {
                        Some(HeartbeatSignal::Ping) => {
                            liveness.mark_ping_sent();
                            write.send(Message::Ping(vec![].into())).await?;
                        }
                        Some(HeartbeatSignal::Stale) => {
                            heartbeat_cancel.cancel();
                            return Err(ConnectorError::Stale);
                        }
                        None => {
                            tracing::debug!("Heartbeat channel closed");
                        }
                    }
                }
                command = command_rx.recv(), if authenticated => {
                    match command {
                        Some(UpstreamCommand::Apply(delta)) => {
                            self.apply_delta(&mut write, &delta).await?;
                        }
                        None => {
                            tracing::info!("Command channel closed, shutting down connector");
                            heartbeat_cancel.cancel();
                            return Ok(());
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            liveness.record_activity();
                            if let Err(e) = self
                                .handle_frame(&text, &mut write, &mut authenticated, controller)
                                .await
                            {
                                heartbeat_cancel.cancel();
                                return Err(e);
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            liveness.record_activity();
                        }
                        Some(Ok(Message::Ping(data))) => {
                            liveness.record_activity();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Upstream sent close frame");
                            heartbeat_cancel.cancel();
                            return Err(ConnectorError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Ignore binary and raw frames
                        }
                        Some(Err(e)) => {
                            heartbeat_cancel.cancel();
                            return Err(e.into());
                        }
                        None => {
                            tracing::info!("Upstream stream ended");
                            heartbeat_cancel.cancel();
                            return Err(ConnectorError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Handle one decoded text frame.
    async fn handle_frame<W>(
        &self,
        text: &str,
        write: &mut W,
        authenticated: &mut bool,
        controller: &mut ReconnectController,
    ) -> Result<(), ConnectorError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        let frame = match JsonCodec::decode(text) {
            Ok(frame) => frame,
            Err(CodecError::UnknownFrameType(frame_type)) => {
                tracing::trace!(frame_type = %frame_type, "Dropping unknown frame type");
                self.state.record_dropped_frame();
                metrics::record_dropped_frame();
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(error = %e, "Dropping undecodable frame");
                self.state.record_dropped_frame();
                metrics::record_dropped_frame();
                return Ok(());
            }
        };

        self.state.record_message();
        metrics::record_received_frame();

        match frame {
            UpstreamFrame::AuthSuccess => {
                *authenticated = true;
                self.state.set_phase(ConnectionPhase::Authenticated);
                controller.on_connected();
                tracing::info!("Upstream feed authenticated");
                let _ = self.event_tx.send(UpstreamEvent::Online).await;

                // Replay the registry's upstream-active keys so deltas that
                // raced the handshake are restored.
                let keys = self.registry.current_upstream_state();
                if let Some(request) = SubscriptionRequest::subscribe(&keys) {
                    send_json(write, &request).await?;
                    tracing::info!(keys = keys.len(), "Replayed upstream subscriptions");
                }
            }
            UpstreamFrame::AuthError(err) => {
                tracing::error!(code = err.code, msg = %err.message, "Upstream rejected auth");
                return Err(AuthError::from_upstream(err.code, &err.message).into());
            }
            UpstreamFrame::Ticker(ticker) => {
                let _ = self.event_tx.send(UpstreamEvent::Ticker(ticker)).await;
            }
            UpstreamFrame::L1Orderbook(book) => {
                let _ = self.event_tx.send(UpstreamEvent::OrderbookL1(book)).await;
            }
            UpstreamFrame::L2Orderbook(book) => {
                let _ = self.event_tx.send(UpstreamEvent::OrderbookL2(book)).await;
            }
            UpstreamFrame::Products(value) => {
                let _ = self.event_tx.send(UpstreamEvent::Products(value)).await;
            }
            UpstreamFrame::Subscriptions(ack) => {
                tracing::debug!(channels = ack.channels.len(), "Subscription confirmed");
                let _ = self
                    .event_tx
                    .send(UpstreamEvent::SubscriptionAccepted(ack.channels))
                    .await;
            }
            UpstreamFrame::Error(err) => {
                tracing::error!(code = err.code, msg = %err.message, "Upstream error");
                if !*authenticated {
                    return Err(AuthError::from_upstream(err.code, &err.message).into());
                }
                let _ = self
                    .event_tx
                    .send(UpstreamEvent::SubscriptionRejected(err.message))
                    .await;
            }
        }

        Ok(())
    }

    /// Send the subscribe/unsubscribe frames for a delta.
    async fn apply_delta<W>(
        &self,
        write: &mut W,
        delta: &SubscriptionDelta,
    ) -> Result<(), ConnectorError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        for request in SubscriptionRequest::from_delta(delta) {
            tracing::debug!(
                kind = request.message_type,
                channels = request.payload.channels.len(),
                "Sending subscription change"
            );
            send_json(write, &request).await?;
        }
        Ok(())
    }
}

/// Serialize a value and send it as a text frame.
async fn send_json<W, T>(write: &mut W, value: &T) -> Result<(), ConnectorError>
where
    W: SinkExt<Message> + Unpin,
    W::Error: std::fmt::Display,
    T: serde::Serialize,
{
    let json = serde_json::to_string(value)
        .map_err(|e| ConnectorError::ConnectionFailed(format!("failed to serialize frame: {e}")))?;

    write
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| ConnectorError::ConnectionFailed(format!("failed to send frame: {e}")))?;

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
