//! Upstream Liveness
//!
//! Tracks upstream activity and drives periodic WebSocket pings. Any inbound
//! frame counts as activity; the connection is declared stale when no
//! activity arrives within the timeout after a ping, which makes the
//! connector tear the socket down and reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for liveness checking.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Maximum silence after a ping before the connection is declared stale.
    pub stale_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            stale_timeout: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            stale_timeout: settings.heartbeat_timeout,
        }
    }
}

// =============================================================================
// Signals
// =============================================================================

/// Signals emitted by the liveness loop.
#[derive(Debug, Clone)]
pub enum HeartbeatSignal {
    /// The connector should send a ping frame.
    Ping,
    /// The upstream went silent; the connection should be restarted.
    Stale,
}

// =============================================================================
// Liveness State
// =============================================================================

/// Activity tracking shared between the read loop and the liveness loop.
#[derive(Debug)]
pub struct LivenessState {
    last_activity: RwLock<Instant>,
    awaiting_response: AtomicBool,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessState {
    /// Create fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
            awaiting_response: AtomicBool::new(false),
        }
    }

    /// Record that any frame arrived from upstream.
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
        self.awaiting_response.store(false, Ordering::SeqCst);
    }

    /// Mark that a ping was sent and a response is expected.
    pub fn mark_ping_sent(&self) {
        self.awaiting_response.store(true, Ordering::SeqCst);
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub fn awaiting_response(&self) -> bool {
        self.awaiting_response.load(Ordering::SeqCst)
    }

    /// Reset for a new connection.
    pub fn reset(&self) {
        *self.last_activity.write() = Instant::now();
        self.awaiting_response.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// Heartbeat Loop
// =============================================================================

/// Liveness loop for one upstream connection.
pub struct Heartbeat {
    config: HeartbeatConfig,
    state: Arc<LivenessState>,
    signal_tx: mpsc::Sender<HeartbeatSignal>,
    cancel: CancellationToken,
}

impl Heartbeat {
    /// Create a liveness loop.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<LivenessState>,
        signal_tx: mpsc::Sender<HeartbeatSignal>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            signal_tx,
            cancel,
        }
    }

    /// Run until cancelled or the connection goes stale.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Liveness loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.tick().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Check staleness and request a ping.
    ///
    /// Returns `Err(())` when the loop should exit.
    async fn tick(&self) -> Result<(), ()> {
        if self.state.awaiting_response() {
            let idle = self.state.idle_time();
            if idle > self.config.stale_timeout {
                tracing::warn!(
                    idle_secs = idle.as_secs(),
                    timeout_secs = self.config.stale_timeout.as_secs(),
                    "Upstream connection is stale"
                );
                let _ = self.signal_tx.send(HeartbeatSignal::Stale).await;
                return Err(());
            }
        }

        if self.signal_tx.send(HeartbeatSignal::Ping).await.is_err() {
            tracing::debug!("Signal channel closed, stopping liveness loop");
            return Err(());
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_tracks_outstanding_ping() {
        let state = LivenessState::new();
        assert!(!state.awaiting_response());

        state.mark_ping_sent();
        assert!(state.awaiting_response());

        state.record_activity();
        assert!(!state.awaiting_response());
    }

    #[test]
    fn any_activity_clears_outstanding_ping() {
        let state = LivenessState::new();
        state.mark_ping_sent();

        // A data frame, not only a pong, proves the connection is alive
        state.record_activity();
        assert!(!state.awaiting_response());
        assert!(state.idle_time() < Duration::from_millis(100));
    }

    #[test]
    fn reset_clears_state() {
        let state = LivenessState::new();
        state.mark_ping_sent();
        state.reset();
        assert!(!state.awaiting_response());
    }

    #[tokio::test]
    async fn loop_emits_pings() {
        let config = HeartbeatConfig {
            ping_interval: Duration::from_millis(50),
            stale_timeout: Duration::from_secs(1),
        };
        let state = Arc::new(LivenessState::new());
        let (signal_tx, mut signal_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let heartbeat = Heartbeat::new(config, state, signal_tx, cancel.clone());
        let handle = tokio::spawn(heartbeat.run());

        let signal = tokio::time::timeout(Duration::from_millis(200), signal_rx.recv())
            .await
            .expect("should receive signal")
            .expect("channel should not close");
        assert!(matches!(signal, HeartbeatSignal::Ping));

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn loop_detects_stale_connection() {
        let config = HeartbeatConfig {
            ping_interval: Duration::from_millis(50),
            stale_timeout: Duration::from_millis(100),
        };
        let state = Arc::new(LivenessState::new());
        let (signal_tx, mut signal_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        state.mark_ping_sent();
        {
            *state.last_activity.write() = Instant::now()
                .checked_sub(Duration::from_millis(200))
                .unwrap();
        }

        let heartbeat = Heartbeat::new(config, state, signal_tx, cancel.clone());
        let handle = tokio::spawn(heartbeat.run());

        let mut saw_stale = false;
        while let Ok(Some(signal)) =
            tokio::time::timeout(Duration::from_millis(500), signal_rx.recv()).await
        {
            if matches!(signal, HeartbeatSignal::Stale) {
                saw_stale = true;
                break;
            }
        }
        assert!(saw_stale, "should emit a stale signal");

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_millis(100), handle).await;
    }

    #[tokio::test]
    async fn loop_stops_on_cancellation() {
        let config = HeartbeatConfig {
            ping_interval: Duration::from_secs(10),
            stale_timeout: Duration::from_secs(10),
        };
        let state = Arc::new(LivenessState::new());
        let (signal_tx, _signal_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let heartbeat = Heartbeat::new(config, state, signal_tx, cancel.clone());
        let handle = tokio::spawn(heartbeat.run());

        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "loop should shut down on cancellation");
    }
}
