//! Application Ports
//!
//! Interfaces the HTTP layer uses to reach the upstream connection without
//! depending on the WebSocket adapter directly.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::subscription::SubscriptionDelta;

// =============================================================================
// Errors
// =============================================================================

/// Errors forwarding a subscription delta upstream.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The upstream connection task has exited.
    #[error("upstream connection is closed")]
    Closed,
}

// =============================================================================
// Subscription Sink Port
// =============================================================================

/// Forwards subscription deltas to the upstream feed.
///
/// Implementations must tolerate deltas arriving before the upstream
/// connection is authenticated; the registry's upstream state is replayed
/// after every successful authentication, so a dropped pre-auth delta is
/// never lost.
#[async_trait]
pub trait SubscriptionSink: Send + Sync {
    /// Apply a subscription delta to the upstream feed.
    ///
    /// Empty deltas are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Closed`] if the upstream connection task has
    /// exited and can no longer accept commands.
    async fn apply(&self, delta: SubscriptionDelta) -> Result<(), SinkError>;
}
