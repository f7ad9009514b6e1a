//! Client Wire Envelope
//!
//! Every line written to a client stream is one JSON envelope:
//!
//! ```json
//! {"type": "ticker", "data": {...}, "timestamp": 1756500000000}
//! ```
//!
//! Data events (`ticker`, `l1_orderbook`, `l2_orderbook`, `products`) carry
//! relayed market data; the remaining event types are control messages about
//! the session or the upstream connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Event Types
// =============================================================================

/// The `type` discriminator of a client envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Session established; `data` carries the session id.
    Connected,
    /// Upstream feed authenticated.
    AuthSuccess,
    /// Upstream authentication failed.
    AuthError,
    /// Degraded mode notice (e.g. mock data active).
    AuthWarning,
    /// Ticker update.
    Ticker,
    /// Top-of-book update.
    L1Orderbook,
    /// Order book depth update.
    L2Orderbook,
    /// Product catalog snapshot.
    Products,
    /// Subscription change accepted upstream.
    SubscriptionSuccess,
    /// Subscription change rejected upstream.
    SubscriptionError,
    /// Server is closing this client stream.
    ConnectionClosed,
    /// Upstream connection failed.
    ConnectionError,
}

impl EventType {
    /// Whether this event carries relayed market data (vs. control traffic).
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(
            self,
            Self::Ticker | Self::L1Orderbook | Self::L2Orderbook | Self::Products
        )
    }
}

// =============================================================================
// Stream Envelope
// =============================================================================

/// One newline-delimited JSON line on the client wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEnvelope {
    /// Event type discriminator.
    #[serde(rename = "type")]
    pub event: EventType,

    /// Event payload.
    pub data: serde_json::Value,

    /// Server-side envelope timestamp, unix milliseconds on the wire.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl StreamEnvelope {
    /// Create an envelope stamped with the current time.
    #[must_use]
    pub fn new(event: EventType, data: serde_json::Value) -> Self {
        Self {
            event,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Serialize to a single NDJSON line (including the trailing newline).
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_ndjson_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

// =============================================================================
// Tests
// =============================================================================
