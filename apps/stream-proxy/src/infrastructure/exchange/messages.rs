//! Upstream Wire Messages
//!
//! Serde types for the JSON frames exchanged with the upstream feed. Every
//! frame carries a `type` discriminator; outbound frames wrap their fields
//! in a `payload` object.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::subscription::{SubscriptionDelta, SubscriptionKey};
use crate::infrastructure::exchange::signer;

// =============================================================================
// Outbound: Authentication
// =============================================================================

/// Signed auth frame sent immediately after the socket opens.
#[derive(Debug, Serialize)]
pub struct AuthRequest {
    /// Frame discriminator, always `"auth"`.
    #[serde(rename = "type")]
    pub message_type: &'static str,
    /// Signed credential payload.
    pub payload: AuthPayload,
}

/// Credential payload of an [`AuthRequest`].
#[derive(Debug, Serialize)]
pub struct AuthPayload {
    /// API key identifying the caller.
    #[serde(rename = "api-key")]
    pub api_key: String,
    /// Hex HMAC-SHA256 over `GET + timestamp + /live`.
    pub signature: String,
    /// Unix milliseconds the signature covers.
    pub timestamp: String,
}

impl AuthRequest {
    /// Build a signed auth frame for the given credentials and timestamp.
    #[must_use]
    pub fn signed(api_key: &str, api_secret: &str, timestamp_ms: i64) -> Self {
        let timestamp = timestamp_ms.to_string();
        let signature = signer::sign_ws_auth(api_secret, &timestamp);
        Self {
            message_type: "auth",
            payload: AuthPayload {
                api_key: api_key.to_string(),
                signature,
                timestamp,
            },
        }
    }
}

// =============================================================================
// Outbound: Subscription Management
// =============================================================================

/// One channel entry in a subscribe/unsubscribe payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelSubscription {
    /// Channel name (e.g. `"ticker"`).
    pub name: String,
    /// Symbols on the channel; `"all"` is the channel-wide wildcard.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<String>,
}

/// Subscribe or unsubscribe frame.
#[derive(Debug, Serialize)]
pub struct SubscriptionRequest {
    /// Frame discriminator, `"subscribe"` or `"unsubscribe"`.
    #[serde(rename = "type")]
    pub message_type: &'static str,
    /// Channels being changed.
    pub payload: SubscriptionPayload,
}

/// Channel list of a [`SubscriptionRequest`].
#[derive(Debug, Serialize)]
pub struct SubscriptionPayload {
    /// Channels being changed.
    pub channels: Vec<ChannelSubscription>,
}

impl SubscriptionRequest {
    /// Build a subscribe frame from subscription keys.
    ///
    /// Returns `None` when `keys` is empty.
    #[must_use]
    pub fn subscribe(keys: &[SubscriptionKey]) -> Option<Self> {
        Self::build("subscribe", keys)
    }

    /// Build an unsubscribe frame from subscription keys.
    ///
    /// Returns `None` when `keys` is empty.
    #[must_use]
    pub fn unsubscribe(keys: &[SubscriptionKey]) -> Option<Self> {
        Self::build("unsubscribe", keys)
    }

    /// Build the frames (at most one subscribe, one unsubscribe) for a delta.
    #[must_use]
    pub fn from_delta(delta: &SubscriptionDelta) -> Vec<Self> {
        let mut frames = Vec::new();
        if let Some(frame) = Self::subscribe(&delta.subscribe) {
            frames.push(frame);
        }
        if let Some(frame) = Self::unsubscribe(&delta.unsubscribe) {
            frames.push(frame);
        }
        frames
    }

    fn build(message_type: &'static str, keys: &[SubscriptionKey]) -> Option<Self> {
        if keys.is_empty() {
            return None;
        }

        // Group keys by channel, preserving first-seen channel order.
        let mut order = Vec::new();
        let mut grouped: HashMap<&str, Vec<String>> = HashMap::new();
        for key in keys {
            let name = key.channel.as_str();
            let symbols = grouped.entry(name).or_insert_with(|| {
                order.push(name);
                Vec::new()
            });
            symbols.push(key.spec.as_wire_str().to_string());
        }

        let channels = order
            .into_iter()
            .filter_map(|name| {
                grouped.remove(name).map(|symbols| ChannelSubscription {
                    name: name.to_string(),
                    symbols,
                })
            })
            .collect();

        Some(Self {
            message_type,
            payload: SubscriptionPayload { channels },
        })
    }
}

// =============================================================================
// Inbound: Market Data
// =============================================================================

/// Ticker update frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerMessage {
    /// Market symbol.
    pub symbol: String,
    /// Last trade price.
    pub price: Decimal,
    /// Mark price, when the market publishes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<Decimal>,
    /// 24h traded volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
    /// Exchange timestamp in microseconds.
    pub timestamp: i64,
}

/// Top-of-book frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L1OrderbookMessage {
    /// Market symbol.
    pub symbol: String,
    /// Best bid price.
    pub best_bid: Decimal,
    /// Best ask price.
    pub best_ask: Decimal,
    /// Size at the best bid.
    pub bid_qty: Decimal,
    /// Size at the best ask.
    pub ask_qty: Decimal,
    /// Exchange timestamp in microseconds.
    pub timestamp: i64,
}

/// One price level of an order book frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    pub limit_price: Decimal,
    /// Aggregate size at the level.
    pub size: Decimal,
}

/// Order book depth frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L2OrderbookMessage {
    /// Market symbol.
    pub symbol: String,
    /// Bid levels, best first.
    pub buy: Vec<PriceLevel>,
    /// Ask levels, best first.
    pub sell: Vec<PriceLevel>,
    /// Exchange timestamp in microseconds.
    pub timestamp: i64,
}

// =============================================================================
// Inbound: Control
// =============================================================================

/// Acknowledgement of a subscribe/unsubscribe frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionAckMessage {
    /// Channels now active upstream.
    #[serde(default)]
    pub channels: Vec<ChannelSubscription>,
}

/// Upstream error frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Upstream error code.
    #[serde(default)]
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
}

// =============================================================================
// Tests
// =============================================================================
