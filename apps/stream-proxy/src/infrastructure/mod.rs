//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the upstream WebSocket adapter, the HTTP fan-out
//! surface, and the operational plumbing (config, health, metrics,
//! telemetry).

/// Session registry and per-session delivery queues.
pub mod broadcast;

/// Configuration loaded from environment variables.
pub mod config;

/// Upstream exchange WebSocket adapter.
pub mod exchange;

/// Health check HTTP endpoint.
pub mod health;

/// HTTP streaming endpoints.
pub mod http;

/// Prometheus metrics.
pub mod metrics;

/// Origin allow-list, rate limiting, and connection caps.
pub mod security;

/// Tracing and OpenTelemetry setup.
pub mod telemetry;
