//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Counts of upstream frames received and dropped
//! - **Envelopes**: Counts of envelopes relayed to and dropped by sessions
//! - **Sessions**: Active session gauge and security rejections
//! - **Upstream**: Connection and reconnection counters
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Upstream frame counters
    describe_counter!(
        "stream_proxy_frames_received_total",
        "Total decoded frames received from the upstream feed"
    );
    describe_counter!(
        "stream_proxy_frames_dropped_total",
        "Total undecodable or unknown upstream frames dropped"
    );

    // Client delivery counters
    describe_counter!(
        "stream_proxy_envelopes_relayed_total",
        "Total envelopes enqueued for client sessions"
    );
    describe_counter!(
        "stream_proxy_envelopes_dropped_total",
        "Total envelopes evicted from slow session queues"
    );

    // Session gauges and security counters
    describe_gauge!(
        "stream_proxy_active_sessions",
        "Number of connected client sessions"
    );
    describe_counter!(
        "stream_proxy_security_rejections_total",
        "Total requests rejected by the security gate, by reason"
    );

    // Upstream connection counters
    describe_counter!(
        "stream_proxy_upstream_connections_total",
        "Total upstream WebSocket connections opened"
    );
    describe_counter!(
        "stream_proxy_reconnects_total",
        "Total upstream reconnection attempts"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for security rejection reasons.
#[derive(Debug, Clone, Copy)]
pub enum RejectionReason {
    /// Origin not on the allow-list.
    Origin,
    /// Rate limit exceeded.
    RateLimit,
    /// Session capacity exceeded.
    Capacity,
}

impl RejectionReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::RateLimit => "rate_limit",
            Self::Capacity => "capacity",
        }
    }
}

/// Record one decoded upstream frame.
pub fn record_received_frame() {
    counter!("stream_proxy_frames_received_total").increment(1);
}

/// Record one dropped upstream frame.
pub fn record_dropped_frame() {
    counter!("stream_proxy_frames_dropped_total").increment(1);
}

/// Record one envelope enqueued for a session.
pub fn record_relayed_envelope() {
    counter!("stream_proxy_envelopes_relayed_total").increment(1);
}

/// Record one envelope evicted from a slow session queue.
pub fn record_dropped_envelope() {
    counter!("stream_proxy_envelopes_dropped_total").increment(1);
}

/// Set the active session gauge.
pub fn set_active_sessions(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("stream_proxy_active_sessions").set(count as f64);
}

/// Record one request rejected by the security gate.
pub fn record_security_rejection(reason: RejectionReason) {
    counter!(
        "stream_proxy_security_rejections_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record one upstream WebSocket connection opened.
pub fn record_upstream_connection() {
    counter!("stream_proxy_upstream_connections_total").increment(1);
}

/// Record one upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("stream_proxy_reconnects_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_reason_labels() {
        assert_eq!(RejectionReason::Origin.as_str(), "origin");
        assert_eq!(RejectionReason::RateLimit.as_str(), "rate_limit");
        assert_eq!(RejectionReason::Capacity.as_str(), "capacity");
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        // The global recorder may not be installed in unit tests; recording
        // must not panic either way.
        record_received_frame();
        record_dropped_frame();
        record_relayed_envelope();
        record_dropped_envelope();
        set_active_sessions(3);
        record_security_rejection(RejectionReason::RateLimit);
        record_upstream_connection();
        record_reconnect();
    }
}
