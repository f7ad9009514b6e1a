//! HTTP Streaming Endpoints
//!
//! The client-facing surface of the proxy:
//!
//! - `GET /stream` opens a long-lived newline-delimited JSON response and
//!   creates a session
//! - `POST /stream` changes the subscriptions of an existing session,
//!   correlated by the `x-session-id` header
//!
//! Every request passes the security gate before any session or upstream
//! state is touched. Session teardown is driven by the delivery task: when
//! the client disconnects or the server shuts down, the session's interest
//! is withdrawn and the shared upstream connection is released.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Response, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::application::ports::SubscriptionSink;
use crate::domain::streaming::{EventType, StreamEnvelope};
use crate::domain::subscription::{
    Channel, SessionId, SubscriptionDelta, SubscriptionRegistry, SymbolSpec,
};
use crate::infrastructure::broadcast::{SessionHandle, SessionRegistry};
use crate::infrastructure::exchange::{ConnectionDeduplicator, ConnectionPhase, UpstreamHandle};
use crate::infrastructure::metrics::{self, RejectionReason};
use crate::infrastructure::security::{SecurityError, SecurityGate};

/// Channel depth between the delivery task and the response body.
const STREAM_BUFFER: usize = 32;

// =============================================================================
// Application State
// =============================================================================

/// Shared state for the streaming endpoints.
#[derive(Clone)]
pub struct AppState {
    /// Connected sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Subscription interest tracking.
    pub registry: Arc<SubscriptionRegistry>,
    /// Arbiter of the single upstream connection.
    pub dedup: Arc<ConnectionDeduplicator>,
    /// Origin, rate-limit, and capacity checks.
    pub gate: Arc<SecurityGate>,
    /// Per-session upstream handles, for command correlation and release.
    upstreams: Arc<RwLock<HashMap<SessionId, UpstreamHandle>>>,
    /// Per-session delivery queue capacity.
    queue_capacity: usize,
    /// Application shutdown token.
    cancel: CancellationToken,
}

impl AppState {
    /// Create the state shared by the streaming handlers.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionRegistry>,
        registry: Arc<SubscriptionRegistry>,
        dedup: Arc<ConnectionDeduplicator>,
        gate: Arc<SecurityGate>,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sessions,
            registry,
            dedup,
            gate,
            upstreams: Arc::new(RwLock::new(HashMap::new())),
            queue_capacity,
            cancel,
        }
    }
}

/// Build the streaming router.
pub fn stream_router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(open_stream).post(manage_stream))
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

/// Client-facing errors from the streaming endpoints.
#[derive(Debug)]
pub enum ApiError {
    /// The request was malformed.
    Validation(String),
    /// The security gate rejected the request.
    Security(SecurityError),
    /// The upstream connection cannot be used right now.
    Unavailable(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body, retry_after) = match self {
            Self::Validation(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "validation_error",
                    message,
                    retry_after_secs: None,
                    limit: None,
                },
                None,
            ),
            Self::Security(SecurityError::OriginNotAllowed { origin }) => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    error: "origin_not_allowed",
                    message: format!("origin not allowed: {origin}"),
                    retry_after_secs: None,
                    limit: None,
                },
                None,
            ),
            Self::Security(SecurityError::RateLimitExceeded {
                limit,
                window_secs,
                retry_after_secs,
            }) => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody {
                    error: "rate_limit_exceeded",
                    message: format!("rate limit exceeded: {limit} requests per {window_secs}s"),
                    retry_after_secs: Some(retry_after_secs),
                    limit: Some(limit),
                },
                Some(retry_after_secs),
            ),
            Self::Security(SecurityError::CapacityExceeded { max }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    error: "capacity_exceeded",
                    message: format!("session capacity exceeded: {max} sessions"),
                    retry_after_secs: None,
                    limit: None,
                },
                None,
            ),
            Self::Unavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    error: "upstream_unavailable",
                    message,
                    retry_after_secs: None,
                    limit: None,
                },
                None,
            ),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = secs.to_string().parse()
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

// =============================================================================
// Request / Response Types
// =============================================================================

/// Subscription action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamAction {
    /// Add interest.
    Subscribe,
    /// Withdraw interest.
    Unsubscribe,
}

/// One channel entry in a subscription change request.
#[derive(Debug, Deserialize)]
pub struct ChannelRequest {
    /// Channel name.
    pub name: String,
    /// Symbols; omitted or containing `"all"` means the whole channel.
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
}

/// Body of `POST /stream`.
#[derive(Debug, Deserialize)]
pub struct StreamCommand {
    /// What to do.
    pub action: StreamAction,
    /// Channels to change.
    pub channels: Vec<ChannelRequest>,
}

#[derive(Serialize)]
struct StreamCommandResponse {
    success: bool,
    action: StreamAction,
    session_id: SessionId,
}

// =============================================================================
// GET /stream
// =============================================================================

async fn open_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response<Body>, ApiError> {
    admit(&state, &headers)?;
    state
        .gate
        .check_capacity(state.sessions.len())
        .map_err(reject)?;

    let upstream = state
        .dedup
        .acquire()
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    let session_id = SessionId::new_v4();
    let session = Arc::new(SessionHandle::new(session_id, state.queue_capacity));
    state.sessions.insert(Arc::clone(&session));
    state.upstreams.write().insert(session_id, upstream.clone());

    tracing::info!(
        session_id = %session_id,
        clients = state.sessions.len(),
        "Client session opened"
    );

    let phase = phase_str(upstream.phase());
    session.enqueue(StreamEnvelope::new(
        EventType::Connected,
        serde_json::json!({
            "session_id": session_id,
            "upstream": phase,
        }),
    ));

    let (line_tx, line_rx) = mpsc::channel::<Result<String, Infallible>>(STREAM_BUFFER);
    tokio::spawn(deliver(state.clone(), session, line_tx));

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-session-id", session_id.to_string())
        .header("x-connection-status", phase)
        .header("x-active-clients", state.sessions.len().to_string())
        .header("x-rate-limit-limit", state.gate.rate_limit().to_string())
        .body(Body::from_stream(ReceiverStream::new(line_rx)))
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    Ok(response)
}

/// Drain a session's queue into the response body until the client
/// disconnects, the session is removed, or the server shuts down.
async fn deliver(
    state: AppState,
    session: Arc<SessionHandle>,
    line_tx: mpsc::Sender<Result<String, Infallible>>,
) {
    loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                let goodbye = StreamEnvelope::new(
                    EventType::ConnectionClosed,
                    serde_json::json!({"message": "server shutting down"}),
                );
                if let Ok(line) = goodbye.to_ndjson_line() {
                    let _ = line_tx.send(Ok(line)).await;
                }
                break;
            }
            envelope = session.queue.pop() => {
                let Some(envelope) = envelope else {
                    break;
                };
                let line = match envelope.to_ndjson_line() {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to serialize envelope");
                        continue;
                    }
                };
                if line_tx.send(Ok(line)).await.is_err() {
                    // Client went away
                    break;
                }
            }
        }
    }

    teardown(&state, session.id).await;
}

/// Withdraw the session's interest and release the upstream connection.
async fn teardown(state: &AppState, session_id: SessionId) {
    let upstream = state.upstreams.write().remove(&session_id);
    state.sessions.remove(session_id);

    let delta = state.registry.remove_session(session_id);
    if let Some(upstream) = upstream {
        if !delta.is_empty()
            && let Err(e) = upstream.apply(delta).await
        {
            tracing::debug!(error = %e, "Upstream gone during session teardown");
        }
        state.dedup.release(&upstream);
    }

    tracing::info!(
        session_id = %session_id,
        clients = state.sessions.len(),
        "Client session closed"
    );
}

// =============================================================================
// POST /stream
// =============================================================================

async fn manage_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(command): Json<StreamCommand>,
) -> Result<impl IntoResponse, ApiError> {
    admit(&state, &headers)?;

    let session_id = session_from_headers(&headers)?;
    if state.sessions.get(session_id).is_none() {
        return Err(ApiError::Validation(format!(
            "unknown session: {session_id}"
        )));
    }
    let upstream = state
        .upstreams
        .read()
        .get(&session_id)
        .cloned()
        .ok_or_else(|| ApiError::Validation(format!("unknown session: {session_id}")))?;

    if command.channels.is_empty() {
        return Err(ApiError::Validation(
            "at least one channel is required".to_string(),
        ));
    }

    let mut delta = SubscriptionDelta::default();
    for entry in &command.channels {
        let channel = Channel::parse(&entry.name)
            .ok_or_else(|| ApiError::Validation(format!("unknown channel: {}", entry.name)))?;
        let specs = parse_specs(entry.symbols.as_deref())?;

        let change = match command.action {
            StreamAction::Subscribe => state.registry.add_interest(session_id, channel, &specs),
            StreamAction::Unsubscribe => {
                state.registry.remove_interest(session_id, channel, &specs)
            }
        };
        delta.merge(change);
    }

    tracing::debug!(
        session_id = %session_id,
        action = ?command.action,
        subscribe = delta.subscribe.len(),
        unsubscribe = delta.unsubscribe.len(),
        "Subscription change"
    );

    upstream
        .apply(delta)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    Ok(Json(StreamCommandResponse {
        success: true,
        action: command.action,
        session_id,
    }))
}

// =============================================================================
// Helpers
// =============================================================================

/// Origin and rate-limit checks shared by both endpoints.
fn admit(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    state.gate.check_origin(origin).map_err(reject)?;
    state.gate.check_rate(&client_identity(headers)).map_err(reject)?;
    Ok(())
}

fn reject(err: SecurityError) -> ApiError {
    let reason = match &err {
        SecurityError::OriginNotAllowed { .. } => RejectionReason::Origin,
        SecurityError::RateLimitExceeded { .. } => RejectionReason::RateLimit,
        SecurityError::CapacityExceeded { .. } => RejectionReason::Capacity,
    };
    metrics::record_security_rejection(reason);
    tracing::warn!(error = %err, "Request rejected by security gate");
    ApiError::Security(err)
}

/// Rate-limit identity: the first forwarded address, or a shared bucket for
/// direct connections.
fn client_identity(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("direct")
        .to_string()
}

fn session_from_headers(headers: &HeaderMap) -> Result<SessionId, ApiError> {
    headers
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation("missing x-session-id header".to_string()))?
        .parse()
        .map_err(|_| ApiError::Validation("invalid x-session-id header".to_string()))
}

fn parse_specs(symbols: Option<&[String]>) -> Result<Vec<SymbolSpec>, ApiError> {
    let Some(symbols) = symbols else {
        return Ok(vec![SymbolSpec::All]);
    };

    if symbols.iter().any(|s| s == "all") {
        return Ok(vec![SymbolSpec::All]);
    }
    if symbols.is_empty() {
        return Ok(vec![SymbolSpec::All]);
    }

    symbols
        .iter()
        .map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Err(ApiError::Validation("empty symbol".to_string()))
            } else {
                Ok(SymbolSpec::Symbol(trimmed.to_string()))
            }
        })
        .collect()
}

const fn phase_str(phase: ConnectionPhase) -> &'static str {
    match phase {
        ConnectionPhase::Unauthenticated => "unauthenticated",
        ConnectionPhase::Authenticating => "authenticating",
        ConnectionPhase::Authenticated => "authenticated",
        ConnectionPhase::Closed => "closed",
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::Request;
    use http_body_util::BodyExt;
    use tokio_stream::StreamExt;
    use tower::ServiceExt;

    use super::*;
    use crate::infrastructure::exchange::{
        HeartbeatConfig, ReconnectConfig, UpstreamEvent, UpstreamOptions,
    };
    use crate::infrastructure::security::SecurityGateConfig;

    fn test_state(gate_config: SecurityGateConfig) -> (AppState, mpsc::Receiver<UpstreamEvent>) {
        let sessions = Arc::new(SessionRegistry::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let (event_tx, event_rx) = mpsc::channel(64);
        let dedup = Arc::new(ConnectionDeduplicator::new(
            UpstreamOptions {
                url: "wss://localhost:1/live".to_string(),
                credentials: None,
                reconnect: ReconnectConfig::default(),
                heartbeat: HeartbeatConfig::default(),
                mock_fallback: true,
            },
            Arc::clone(&registry),
            event_tx,
            CancellationToken::new(),
        ));
        let gate = Arc::new(SecurityGate::new(gate_config));

        let state = AppState::new(
            sessions,
            registry,
            dedup,
            gate,
            16,
            CancellationToken::new(),
        );
        (state, event_rx)
    }

    fn default_state() -> (AppState, mpsc::Receiver<UpstreamEvent>) {
        test_state(SecurityGateConfig::default())
    }

    async fn open_session(router: &Router) -> SessionId {
        let response = router
            .clone()
            .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response
            .headers()
            .get("x-session-id")
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn get_stream_opens_session_with_headers() {
        let (state, _event_rx) = default_state();
        let router = stream_router(state.clone());

        let response = router
            .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-ndjson"
        );
        assert!(response.headers().contains_key("x-session-id"));
        assert_eq!(response.headers().get("x-active-clients").unwrap(), "1");
        assert_eq!(state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn disallowed_origin_is_rejected() {
        let (state, _event_rx) = test_state(SecurityGateConfig {
            allowed_origins: vec!["https://app.example.com".to_string()],
            ..SecurityGateConfig::default()
        });
        let router = stream_router(state);

        let response = router
            .oneshot(
                Request::get("/stream")
                    .header(header::ORIGIN, "https://evil.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn rate_limit_returns_retry_after() {
        let (state, _event_rx) = test_state(SecurityGateConfig {
            rate_limit_max: 1,
            ..SecurityGateConfig::default()
        });
        let router = stream_router(state);

        let first = router
            .clone()
            .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = router
            .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key(header::RETRY_AFTER));

        let body = second.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "rate_limit_exceeded");
        assert_eq!(value["limit"], 1);
    }

    #[tokio::test]
    async fn capacity_cap_rejects_new_sessions() {
        let (state, _event_rx) = test_state(SecurityGateConfig {
            max_sessions: 1,
            ..SecurityGateConfig::default()
        });
        let router = stream_router(state);

        let _session = open_session(&router).await;

        let response = router
            .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn first_line_is_connected_envelope() {
        let (state, _event_rx) = default_state();
        let router = stream_router(state);

        let response = router
            .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let session_id = response
            .headers()
            .get("x-session-id")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let mut body = response.into_body().into_data_stream();
        let chunk = tokio::time::timeout(Duration::from_secs(1), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let line = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(line.ends_with('\n'));
        let envelope: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(envelope["type"], "connected");
        assert_eq!(envelope["data"]["session_id"], session_id);
    }

    #[tokio::test]
    async fn post_subscribe_updates_registry() {
        let (state, _event_rx) = default_state();
        let router = stream_router(state.clone());

        let session_id = open_session(&router).await;

        let body = serde_json::json!({
            "action": "subscribe",
            "channels": [{"name": "ticker", "symbols": ["BTCUSDT"]}]
        });
        let response = router
            .oneshot(
                Request::post("/stream")
                    .header("x-session-id", session_id.to_string())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.registry.upstream_key_count(), 1);
        assert_eq!(
            state.registry.sessions_for(Channel::Ticker, "BTCUSDT"),
            vec![session_id]
        );
    }

    #[tokio::test]
    async fn post_without_symbols_means_wildcard() {
        let (state, _event_rx) = default_state();
        let router = stream_router(state.clone());

        let session_id = open_session(&router).await;

        let body = serde_json::json!({
            "action": "subscribe",
            "channels": [{"name": "l2_orderbook"}]
        });
        let response = router
            .oneshot(
                Request::post("/stream")
                    .header("x-session-id", session_id.to_string())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let stats = state.registry.stats(Channel::L2Orderbook);
        assert_eq!(stats.wildcard_sessions, 1);
    }

    #[tokio::test]
    async fn post_unknown_session_is_rejected() {
        let (state, _event_rx) = default_state();
        let router = stream_router(state);

        let body = serde_json::json!({
            "action": "subscribe",
            "channels": [{"name": "ticker", "symbols": ["BTCUSDT"]}]
        });
        let response = router
            .oneshot(
                Request::post("/stream")
                    .header("x-session-id", SessionId::new_v4().to_string())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn post_unknown_channel_is_rejected() {
        let (state, _event_rx) = default_state();
        let router = stream_router(state);

        let session_id = open_session(&router).await;

        let body = serde_json::json!({
            "action": "subscribe",
            "channels": [{"name": "candles", "symbols": ["BTCUSDT"]}]
        });
        let response = router
            .oneshot(
                Request::post("/stream")
                    .header("x-session-id", session_id.to_string())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value: serde_json::Value = serde_json::from_slice(
            &response.into_body().collect().await.unwrap().to_bytes(),
        )
        .unwrap();
        assert_eq!(value["error"], "validation_error");
    }

    #[tokio::test]
    async fn post_missing_session_header_is_rejected() {
        let (state, _event_rx) = default_state();
        let router = stream_router(state);

        let body = serde_json::json!({
            "action": "subscribe",
            "channels": [{"name": "ticker", "symbols": ["BTCUSDT"]}]
        });
        let response = router
            .oneshot(
                Request::post("/stream")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unsubscribe_withdraws_interest() {
        let (state, _event_rx) = default_state();
        let router = stream_router(state.clone());

        let session_id = open_session(&router).await;

        let subscribe = serde_json::json!({
            "action": "subscribe",
            "channels": [{"name": "ticker", "symbols": ["BTCUSDT"]}]
        });
        let response = router
            .clone()
            .oneshot(
                Request::post("/stream")
                    .header("x-session-id", session_id.to_string())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(subscribe.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let unsubscribe = serde_json::json!({
            "action": "unsubscribe",
            "channels": [{"name": "ticker", "symbols": ["BTCUSDT"]}]
        });
        let response = router
            .oneshot(
                Request::post("/stream")
                    .header("x-session-id", session_id.to_string())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(unsubscribe.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.registry.upstream_key_count(), 0);
    }
}
