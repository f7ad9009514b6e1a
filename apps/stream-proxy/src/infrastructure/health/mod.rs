//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, connection status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks the upstream feed)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::subscription::{Channel, SubscriptionRegistry};
use crate::infrastructure::broadcast::SessionRegistry;
use crate::infrastructure::exchange::{ConnectionDeduplicator, ConnectionPhase};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Proxy version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed status.
    pub upstream: UpstreamInfo,
    /// Active client count.
    pub clients: ClientStatus,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Upstream feed connected and authenticated.
    Healthy,
    /// Upstream connecting, reconnecting, or idle.
    Degraded,
    /// Upstream permanently unavailable.
    Unhealthy,
}

/// Upstream feed status.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamInfo {
    /// Connection phase.
    pub state: String,
    /// Whether the feed is authenticated.
    pub connected: bool,
    /// Decoded frames received.
    pub messages_received: u64,
    /// Undecodable frames dropped.
    pub frames_dropped: u64,
    /// Reconnection attempts since the last successful connection.
    pub reconnect_attempts: u32,
    /// When the feed last authenticated.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent connection error.
    pub last_error: Option<String>,
}

/// Active client information.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    /// Connected streaming sessions.
    pub total: usize,
}

/// Per-channel subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    /// Channel name.
    pub channel: &'static str,
    /// Symbols with at least one interested session.
    pub symbols: usize,
    /// Sessions holding the channel wildcard.
    pub wildcard_sessions: usize,
    /// Keys active upstream.
    pub upstream_keys: usize,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Per-channel breakdown.
    pub channels: Vec<ChannelStatus>,
    /// Total keys active upstream.
    pub upstream_keys: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    dedup: Arc<ConnectionDeduplicator>,
    sessions: Arc<SessionRegistry>,
    registry: Arc<SubscriptionRegistry>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        dedup: Arc<ConnectionDeduplicator>,
        sessions: Arc<SessionRegistry>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            dedup,
            sessions,
            registry,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let ready = state.dedup.phase() == Some(ConnectionPhase::Authenticated);

    if ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let upstream = upstream_info(state);
    let status = determine_health_status(&upstream);

    let channels: Vec<ChannelStatus> = Channel::all()
        .iter()
        .map(|channel| {
            let stats = state.registry.stats(*channel);
            ChannelStatus {
                channel: channel.as_str(),
                symbols: stats.symbol_count,
                wildcard_sessions: stats.wildcard_sessions,
                upstream_keys: stats.upstream_keys,
            }
        })
        .collect();

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream,
        clients: ClientStatus {
            total: state.sessions.len(),
        },
        subscriptions: SubscriptionStatus {
            channels,
            upstream_keys: state.registry.upstream_key_count(),
        },
    }
}

fn upstream_info(state: &HealthServerState) -> UpstreamInfo {
    state.dedup.connection_state().map_or_else(
        || UpstreamInfo {
            state: "idle".to_string(),
            connected: false,
            messages_received: 0,
            frames_dropped: 0,
            reconnect_attempts: 0,
            last_connected_at: None,
            last_error: None,
        },
        |connection| {
            let phase = connection.phase();
            UpstreamInfo {
                state: phase_to_string(phase),
                connected: phase == ConnectionPhase::Authenticated,
                messages_received: connection.messages_received(),
                frames_dropped: connection.frames_dropped(),
                reconnect_attempts: connection.reconnect_attempts(),
                last_connected_at: connection.last_connected_at(),
                last_error: connection.last_error(),
            }
        },
    )
}

fn phase_to_string(phase: ConnectionPhase) -> String {
    match phase {
        ConnectionPhase::Unauthenticated => "unauthenticated".to_string(),
        ConnectionPhase::Authenticating => "authenticating".to_string(),
        ConnectionPhase::Authenticated => "authenticated".to_string(),
        ConnectionPhase::Closed => "closed".to_string(),
    }
}

fn determine_health_status(upstream: &UpstreamInfo) -> HealthStatus {
    if upstream.connected {
        HealthStatus::Healthy
    } else if upstream.state == "closed" {
        HealthStatus::Unhealthy
    } else {
        // Idle (no sessions yet), connecting, or reconnecting
        HealthStatus::Degraded
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
