//! Session Fan-Out
//!
//! Per-session bounded delivery queues and the broadcaster task that routes
//! upstream events into them.
//!
//! # Architecture
//!
//! Each client session owns a [`DeliveryQueue`]: a bounded drop-oldest
//! buffer. The broadcaster never blocks on a slow client; when a queue is
//! full the oldest envelope is evicted and counted. Data events are routed
//! through the subscription registry to interested sessions only; control
//! events go to every session.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::{EventType, StreamEnvelope};
use crate::domain::subscription::{Channel, SessionId, SubscriptionRegistry};
use crate::infrastructure::exchange::UpstreamEvent;
use crate::infrastructure::metrics;

// =============================================================================
// Delivery Queue
// =============================================================================

/// Bounded drop-oldest envelope queue for one session.
#[derive(Debug)]
pub struct DeliveryQueue {
    queue: Mutex<VecDeque<StreamEnvelope>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl DeliveryQueue {
    /// Create a queue with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Push an envelope without blocking.
    ///
    /// When the queue is full the oldest envelope is evicted. Returns
    /// `true` if an eviction occurred.
    pub fn push(&self, envelope: StreamEnvelope) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }

        let evicted = {
            let mut queue = self.queue.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(envelope);
            evicted
        };

        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    /// Pop the next envelope, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<StreamEnvelope> {
        loop {
            let notified = self.notify.notified();

            if let Some(envelope) = self.queue.lock().pop_front() {
                return Some(envelope);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }

            notified.await;
        }
    }

    /// Close the queue; pending pops drain the remainder and then end.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Whether the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Envelopes evicted because the session was too slow.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Current queue depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

// =============================================================================
// Session Handle
// =============================================================================

/// One connected client session.
#[derive(Debug)]
pub struct SessionHandle {
    /// Session identifier.
    pub id: SessionId,
    /// The session's delivery queue.
    pub queue: Arc<DeliveryQueue>,
    /// When the session connected.
    pub connected_at: DateTime<Utc>,
}

impl SessionHandle {
    /// Create a session with a fresh queue.
    #[must_use]
    pub fn new(id: SessionId, queue_capacity: usize) -> Self {
        Self {
            id,
            queue: Arc::new(DeliveryQueue::new(queue_capacity)),
            connected_at: Utc::now(),
        }
    }

    /// Enqueue an envelope for this session.
    pub fn enqueue(&self, envelope: StreamEnvelope) {
        if self.queue.push(envelope) {
            metrics::record_dropped_envelope();
        } else {
            metrics::record_relayed_envelope();
        }
    }
}

// =============================================================================
// Session Registry
// =============================================================================

/// All connected sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session.
    pub fn insert(&self, handle: Arc<SessionHandle>) {
        self.sessions.write().insert(handle.id, handle);
        metrics::set_active_sessions(self.len());
    }

    /// Remove a session, closing its queue.
    pub fn remove(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        let handle = self.sessions.write().remove(&id);
        if let Some(handle) = &handle {
            handle.queue.close();
        }
        metrics::set_active_sessions(self.len());
        handle
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Number of connected sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Enqueue an envelope for every session.
    pub fn broadcast_all(&self, envelope: &StreamEnvelope) {
        for handle in self.sessions.read().values() {
            handle.enqueue(envelope.clone());
        }
    }

    /// Enqueue an envelope for the given sessions.
    pub fn broadcast_to(&self, ids: &[SessionId], envelope: &StreamEnvelope) {
        let sessions = self.sessions.read();
        for id in ids {
            if let Some(handle) = sessions.get(id) {
                handle.enqueue(envelope.clone());
            }
        }
    }
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Routes upstream events into session queues.
pub struct Broadcaster {
    sessions: Arc<SessionRegistry>,
    registry: Arc<SubscriptionRegistry>,
    cancel: CancellationToken,
}

impl Broadcaster {
    /// Create a broadcaster.
    #[must_use]
    pub const fn new(
        sessions: Arc<SessionRegistry>,
        registry: Arc<SubscriptionRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sessions,
            registry,
            cancel,
        }
    }

    /// Consume upstream events until the channel closes or cancellation.
    pub async fn run(self, mut event_rx: mpsc::Receiver<UpstreamEvent>) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Broadcaster cancelled");
                    break;
                }
                event = event_rx.recv() => {
                    match event {
                        Some(event) => self.dispatch(event),
                        None => {
                            tracing::info!("Upstream event channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Map one upstream event onto session queues.
    fn dispatch(&self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Online => {
                self.broadcast_control(
                    EventType::AuthSuccess,
                    serde_json::json!({"message": "upstream feed authenticated"}),
                );
            }
            UpstreamEvent::Offline => {
                self.broadcast_control(
                    EventType::ConnectionError,
                    serde_json::json!({"message": "upstream connection lost, reconnecting"}),
                );
            }
            UpstreamEvent::Reconnecting { attempt } => {
                tracing::debug!(attempt, "Upstream reconnecting");
            }
            UpstreamEvent::AuthFailed(err) => {
                self.broadcast_control(
                    EventType::AuthError,
                    serde_json::json!({"message": err.to_string()}),
                );
            }
            UpstreamEvent::AuthWarning(message) => {
                self.broadcast_control(
                    EventType::AuthWarning,
                    serde_json::json!({"message": message}),
                );
            }
            UpstreamEvent::Ticker(ticker) => {
                self.route_data(EventType::Ticker, Channel::Ticker, &ticker.symbol, &ticker);
            }
            UpstreamEvent::OrderbookL1(book) => {
                self.route_data(
                    EventType::L1Orderbook,
                    Channel::L1Orderbook,
                    &book.symbol,
                    &book,
                );
            }
            UpstreamEvent::OrderbookL2(book) => {
                self.route_data(
                    EventType::L2Orderbook,
                    Channel::L2Orderbook,
                    &book.symbol,
                    &book,
                );
            }
            UpstreamEvent::Products(value) => {
                self.broadcast_control(EventType::Products, value);
            }
            UpstreamEvent::SubscriptionAccepted(channels) => {
                let data = serde_json::to_value(&channels).unwrap_or_default();
                self.broadcast_control(
                    EventType::SubscriptionSuccess,
                    serde_json::json!({"channels": data}),
                );
            }
            UpstreamEvent::SubscriptionRejected(message) => {
                self.broadcast_control(
                    EventType::SubscriptionError,
                    serde_json::json!({"message": message}),
                );
            }
            UpstreamEvent::Terminal(message) => {
                self.broadcast_control(
                    EventType::ConnectionError,
                    serde_json::json!({"message": message, "terminal": true}),
                );
            }
        }
    }

    fn broadcast_control(&self, event: EventType, data: serde_json::Value) {
        self.sessions
            .broadcast_all(&StreamEnvelope::new(event, data));
    }

    fn route_data<T: serde::Serialize>(
        &self,
        event: EventType,
        channel: Channel,
        symbol: &str,
        message: &T,
    ) {
        let targets = self.registry.sessions_for(channel, symbol);
        if targets.is_empty() {
            return;
        }

        let data = match serde_json::to_value(message) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize data event");
                return;
            }
        };

        self.sessions
            .broadcast_to(&targets, &StreamEnvelope::new(event, data));
    }
}

// =============================================================================
// Tests
// =============================================================================
