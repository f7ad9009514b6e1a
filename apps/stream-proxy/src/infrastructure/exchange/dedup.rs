//! Connection Deduplication
//!
//! Guarantees at most one upstream connection regardless of how many client
//! sessions are active. The first acquire spawns the connector task; later
//! acquires share it; the last release tears it down. A slot whose teardown
//! is still in flight refuses new acquires until the task has fully exited,
//! at which point the next acquire starts a fresh connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{SinkError, SubscriptionSink};
use crate::domain::subscription::{SubscriptionDelta, SubscriptionRegistry};

use super::auth::{API_KEY_VAR, AuthError, Credentials};
use super::connector::{
    ConnectionPhase, ConnectorConfig, ConnectorState, UpstreamCommand, UpstreamConnector,
    UpstreamEvent,
};
use super::heartbeat::HeartbeatConfig;
use super::mock::MockFeed;
use super::reconnect::ReconnectConfig;

/// Command channel depth between the HTTP layer and the connector.
const COMMAND_BUFFER: usize = 64;

// =============================================================================
// Errors
// =============================================================================

/// Errors acquiring the shared upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    /// The previous connection is still tearing down; retry shortly.
    #[error("upstream connection is unavailable, retry shortly")]
    ConnectionUnavailable,
}

// =============================================================================
// Options
// =============================================================================

/// How the deduplicator builds upstream connections.
#[derive(Debug, Clone)]
pub struct UpstreamOptions {
    /// WebSocket URL of the upstream feed.
    pub url: String,
    /// Credentials, if configured.
    pub credentials: Option<Credentials>,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Liveness configuration.
    pub heartbeat: HeartbeatConfig,
    /// Serve synthetic data when no credentials are configured.
    pub mock_fallback: bool,
}

// =============================================================================
// Shared Connection
// =============================================================================

/// The live upstream connection shared by all sessions.
#[derive(Debug)]
struct UpstreamShared {
    command_tx: mpsc::Sender<UpstreamCommand>,
    state: Arc<ConnectorState>,
    users: AtomicUsize,
    cancel: CancellationToken,
}

/// Cloneable handle to the shared upstream connection.
#[derive(Debug, Clone)]
pub struct UpstreamHandle {
    shared: Arc<UpstreamShared>,
}

impl UpstreamHandle {
    /// Current authentication phase of the connection.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.shared.state.phase()
    }

    /// Observable connection state, for health reporting.
    #[must_use]
    pub fn state(&self) -> Arc<ConnectorState> {
        Arc::clone(&self.shared.state)
    }
}

#[async_trait]
impl SubscriptionSink for UpstreamHandle {
    async fn apply(&self, delta: SubscriptionDelta) -> Result<(), SinkError> {
        if delta.is_empty() {
            return Ok(());
        }
        self.shared
            .command_tx
            .send(UpstreamCommand::Apply(delta))
            .await
            .map_err(|_| SinkError::Closed)
    }
}

// =============================================================================
// Deduplicator
// =============================================================================

/// Arbitrates access to the single upstream connection.
pub struct ConnectionDeduplicator {
    options: UpstreamOptions,
    registry: Arc<SubscriptionRegistry>,
    event_tx: mpsc::Sender<UpstreamEvent>,
    cancel: CancellationToken,
    slot: Mutex<Option<Arc<UpstreamShared>>>,
}

impl ConnectionDeduplicator {
    /// Create a deduplicator with an empty slot.
    #[must_use]
    pub const fn new(
        options: UpstreamOptions,
        registry: Arc<SubscriptionRegistry>,
        event_tx: mpsc::Sender<UpstreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            options,
            registry,
            event_tx,
            cancel,
            slot: Mutex::new(None),
        }
    }

    /// Acquire a handle to the shared connection, spawning it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DedupError::ConnectionUnavailable`] while a previous
    /// connection is still tearing down.
    pub fn acquire(&self) -> Result<UpstreamHandle, DedupError> {
        let mut slot = self.slot.lock();

        if let Some(shared) = slot.as_ref() {
            if shared.state.is_terminated() {
                // The task has exited; replace the slot with a fresh one.
            } else if shared.state.phase() == ConnectionPhase::Closed {
                // Teardown in flight: the cancel was issued but the task is
                // still winding down.
                return Err(DedupError::ConnectionUnavailable);
            } else {
                shared.users.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    users = shared.users.load(Ordering::SeqCst),
                    "Joined existing upstream connection"
                );
                return Ok(UpstreamHandle {
                    shared: Arc::clone(shared),
                });
            }
        }

        let shared = self.spawn_connection();
        *slot = Some(Arc::clone(&shared));
        Ok(UpstreamHandle { shared })
    }

    /// Release a handle. The last release cancels the connection.
    ///
    /// Holds the slot lock so the decrement and the teardown decision are
    /// atomic with respect to `acquire`; an acquire can never join a
    /// connection between its user count hitting zero and the cancel.
    pub fn release(&self, handle: &UpstreamHandle) {
        let _slot = self.slot.lock();

        let remaining = handle.shared.users.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            tracing::info!("Last session released, closing upstream connection");
            handle.shared.state.set_phase(ConnectionPhase::Closed);
            handle.shared.cancel.cancel();
        } else {
            tracing::debug!(users = remaining, "Released upstream handle");
        }
    }

    /// Number of sessions currently holding the connection.
    #[must_use]
    pub fn active_users(&self) -> usize {
        self.slot
            .lock()
            .as_ref()
            .filter(|shared| !shared.state.is_terminated())
            .map_or(0, |shared| shared.users.load(Ordering::SeqCst))
    }

    /// Phase of the current connection, if one exists.
    #[must_use]
    pub fn phase(&self) -> Option<ConnectionPhase> {
        self.slot
            .lock()
            .as_ref()
            .map(|shared| shared.state.phase())
    }

    /// Observable state of the current connection, if one exists.
    #[must_use]
    pub fn connection_state(&self) -> Option<Arc<ConnectorState>> {
        self.slot
            .lock()
            .as_ref()
            .map(|shared| Arc::clone(&shared.state))
    }

    fn spawn_connection(&self) -> Arc<UpstreamShared> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let state = Arc::new(ConnectorState::new());
        let cancel = self.cancel.child_token();

        match &self.options.credentials {
            Some(credentials) => {
                tracing::info!(url = %self.options.url, "Starting upstream connection");
                let connector = UpstreamConnector::new(
                    ConnectorConfig {
                        url: self.options.url.clone(),
                        credentials: credentials.clone(),
                        reconnect: self.options.reconnect.clone(),
                        heartbeat: self.options.heartbeat.clone(),
                    },
                    Arc::clone(&self.registry),
                    Arc::clone(&state),
                    self.event_tx.clone(),
                    cancel.clone(),
                );
                tokio::spawn(connector.run(command_rx));
            }
            None if self.options.mock_fallback => {
                tracing::warn!("No credentials configured, starting synthetic data feed");
                let mock = MockFeed::new(
                    Arc::clone(&self.registry),
                    Arc::clone(&state),
                    self.event_tx.clone(),
                    cancel.clone(),
                );
                tokio::spawn(mock.run(command_rx));
            }
            None => {
                tracing::error!("No credentials configured and mock fallback is disabled");
                let event_tx = self.event_tx.clone();
                let task_state = Arc::clone(&state);
                tokio::spawn(async move {
                    // Keep command_rx alive so sends fail with Closed only
                    // after the error events are delivered.
                    let _command_rx = command_rx;
                    let err = AuthError::MissingCredentials { var: API_KEY_VAR };
                    let _ = event_tx.send(UpstreamEvent::AuthFailed(err.clone())).await;
                    let _ = event_tx.send(UpstreamEvent::Terminal(err.to_string())).await;
                    task_state.mark_terminated();
                });
            }
        }

        Arc::new(UpstreamShared {
            command_tx,
            state,
            users: AtomicUsize::new(1),
            cancel,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn deduplicator(mock_fallback: bool) -> (ConnectionDeduplicator, mpsc::Receiver<UpstreamEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let dedup = ConnectionDeduplicator::new(
            UpstreamOptions {
                url: "wss://localhost:1/live".to_string(),
                credentials: None,
                reconnect: ReconnectConfig::default(),
                heartbeat: HeartbeatConfig::default(),
                mock_fallback,
            },
            Arc::new(SubscriptionRegistry::new()),
            event_tx,
            CancellationToken::new(),
        );
        (dedup, event_rx)
    }

    #[tokio::test]
    async fn acquires_share_one_connection() {
        let (dedup, _event_rx) = deduplicator(true);

        let first = dedup.acquire().unwrap();
        let second = dedup.acquire().unwrap();

        assert_eq!(dedup.active_users(), 2);
        assert!(Arc::ptr_eq(&first.shared, &second.shared));

        dedup.release(&second);
        assert_eq!(dedup.active_users(), 1);
        dedup.release(&first);
    }

    #[tokio::test]
    async fn last_release_closes_connection() {
        let (dedup, _event_rx) = deduplicator(true);

        let handle = dedup.acquire().unwrap();
        dedup.release(&handle);

        assert_eq!(dedup.phase(), Some(ConnectionPhase::Closed));
    }

    #[tokio::test]
    async fn acquire_during_teardown_is_unavailable() {
        let (dedup, _event_rx) = deduplicator(true);

        let handle = dedup.acquire().unwrap();
        // Give the mock task a moment to start so cancellation is observed
        // as a teardown rather than an instant exit.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        dedup.release(&handle);

        // The slot is closed but the task may not have exited yet; either
        // outcome (unavailable, or a fresh connection after full exit) is
        // acceptable, but a shared handle to the closed slot is not.
        match dedup.acquire() {
            Err(DedupError::ConnectionUnavailable) => {}
            Ok(fresh) => {
                assert!(!Arc::ptr_eq(&fresh.shared, &handle.shared));
                dedup.release(&fresh);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_release_and_acquire_never_join_cancelled_connection() {
        async fn acquire_eventually(dedup: &ConnectionDeduplicator) -> UpstreamHandle {
            for _ in 0..500 {
                if let Ok(handle) = dedup.acquire() {
                    return handle;
                }
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
            panic!("upstream connection never became available");
        }

        let (dedup, _event_rx) = deduplicator(true);
        let dedup = Arc::new(dedup);

        for _ in 0..200 {
            let holder = acquire_eventually(&dedup).await;

            let releaser = {
                let dedup = Arc::clone(&dedup);
                let handle = holder.clone();
                tokio::spawn(async move { dedup.release(&handle) })
            };
            let acquirer = {
                let dedup = Arc::clone(&dedup);
                tokio::spawn(async move { dedup.acquire() })
            };

            releaser.await.unwrap();
            // A handle that joined the holder's connection must have done so
            // before the last release, so its token cannot be cancelled. An
            // Unavailable error or a replacement connection is also fine.
            if let Ok(joined) = acquirer.await.unwrap() {
                if Arc::ptr_eq(&joined.shared, &holder.shared) {
                    assert!(
                        !joined.shared.cancel.is_cancelled(),
                        "acquire returned a connection that was already cancelled"
                    );
                }
                dedup.release(&joined);
            }
        }
    }

    #[tokio::test]
    async fn terminated_slot_is_replaced() {
        let (dedup, mut event_rx) = deduplicator(false);

        // Without credentials or fallback the task terminates immediately
        let first = dedup.acquire().unwrap();
        let event = tokio::time::timeout(std::time::Duration::from_millis(200), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, UpstreamEvent::AuthFailed(_)));

        // Wait for the task to mark itself terminated
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(first.shared.state.is_terminated());

        let second = dedup.acquire().unwrap();
        assert!(!Arc::ptr_eq(&first.shared, &second.shared));
    }

    #[tokio::test]
    async fn missing_credentials_failure_names_variable() {
        let (dedup, mut event_rx) = deduplicator(false);
        let _handle = dedup.acquire().unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_millis(200), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            UpstreamEvent::AuthFailed(AuthError::MissingCredentials { var }) => {
                assert_eq!(var, API_KEY_VAR);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
