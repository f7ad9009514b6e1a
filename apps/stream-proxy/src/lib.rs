#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Delta Stream Proxy - Market Data Fan-Out Gateway
//!
//! An HTTP streaming proxy that maintains a single authenticated WebSocket
//! connection to the Delta Exchange real-time feed and fans market data out
//! to many browser clients over newline-delimited JSON.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core streaming logic and data types
//!   - `streaming`: Client wire envelope (`{type, data, timestamp}`)
//!   - `subscription`: Subscription registry with wildcard subsumption
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interface for forwarding subscription deltas upstream
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `exchange`: WebSocket client for the upstream feed (auth, signing,
//!     reconnection, heartbeat, connection deduplication, mock fallback)
//!   - `broadcast`: Session registry and per-session delivery queues
//!   - `http`: HTTP streaming endpoints (`GET /stream`, `POST /stream`)
//!   - `security`: Origin allow-list, rate limiting, connection caps
//!   - `config`: Configuration loaded from environment variables
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Exchange WS ──► Connector ──► Broadcaster ──► per-session queues ──► Client 1
//!                                                                  ──► Client 2
//!                                                                  ──► Client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{EventType, StreamEnvelope};
pub use domain::subscription::{
    Channel, SessionId, SubscriptionDelta, SubscriptionKey, SubscriptionRegistry,
    SubscriptionStats, SymbolSpec,
};

// Application ports
pub use application::ports::{SinkError, SubscriptionSink};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, Credentials, Environment, ProxyConfig, SecuritySettings, ServerSettings,
    StreamSettings, WebSocketSettings,
};

// Upstream exchange adapter
pub use infrastructure::exchange::{
    AuthError, ConnectionDeduplicator, ConnectionPhase, ConnectorState, DedupError,
    HeartbeatConfig, ReconnectConfig, ReconnectController, ReconnectionState, UpstreamEvent,
    UpstreamHandle, UpstreamOptions,
};

// Broadcast layer (for integration tests)
pub use infrastructure::broadcast::{
    Broadcaster, DeliveryQueue, SessionHandle, SessionRegistry,
};

// Security gate
pub use infrastructure::security::{SecurityError, SecurityGate, SecurityGateConfig};

// HTTP surface
pub use infrastructure::http::{AppState, stream_router};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
