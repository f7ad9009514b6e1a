//! Frame Decoding
//!
//! Inbound frames are dispatched by their `type` discriminator. Frames with
//! an unrecognized `type` are surfaced as [`CodecError::UnknownFrameType`]
//! so the connector can count and drop them without tearing the connection
//! down.

use serde_json::Value;
use thiserror::Error;

use super::messages::{
    ErrorMessage, L1OrderbookMessage, L2OrderbookMessage, SubscriptionAckMessage, TickerMessage,
};

// =============================================================================
// Errors
// =============================================================================

/// Errors decoding an inbound frame.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The text was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame had no string `type` field.
    #[error("frame has no type discriminator")]
    MissingType,

    /// The `type` value is not one we handle.
    #[error("unknown frame type: {0}")]
    UnknownFrameType(String),
}

// =============================================================================
// Decoded Frames
// =============================================================================

/// A decoded upstream frame.
#[derive(Debug, Clone)]
pub enum UpstreamFrame {
    /// Authentication accepted.
    AuthSuccess,
    /// Authentication rejected.
    AuthError(ErrorMessage),
    /// Ticker update.
    Ticker(TickerMessage),
    /// Top-of-book update.
    L1Orderbook(L1OrderbookMessage),
    /// Order book depth update.
    L2Orderbook(L2OrderbookMessage),
    /// Product catalog snapshot, relayed opaquely.
    Products(Value),
    /// Subscription change acknowledged.
    Subscriptions(SubscriptionAckMessage),
    /// Upstream error outside the auth handshake.
    Error(ErrorMessage),
}

// =============================================================================
// Codec
// =============================================================================

/// Decodes upstream JSON text frames.
pub struct JsonCodec;

impl JsonCodec {
    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for malformed JSON, a missing discriminator,
    /// or an unrecognized frame type.
    pub fn decode(text: &str) -> Result<UpstreamFrame, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        let frame_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(CodecError::MissingType)?;

        match frame_type {
            "auth_success" => Ok(UpstreamFrame::AuthSuccess),
            "auth_error" => Ok(UpstreamFrame::AuthError(serde_json::from_value(value)?)),
            "ticker" => Ok(UpstreamFrame::Ticker(serde_json::from_value(value)?)),
            "l1_orderbook" => Ok(UpstreamFrame::L1Orderbook(serde_json::from_value(value)?)),
            "l2_orderbook" => Ok(UpstreamFrame::L2Orderbook(serde_json::from_value(value)?)),
            "products" => Ok(UpstreamFrame::Products(value)),
            "subscriptions" => Ok(UpstreamFrame::Subscriptions(serde_json::from_value(value)?)),
            "error" => Ok(UpstreamFrame::Error(serde_json::from_value(value)?)),
            other => Err(CodecError::UnknownFrameType(other.to_string())),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_auth_success() {
        let frame = JsonCodec::decode(r#"{"type":"auth_success"}"#).unwrap();
        assert!(matches!(frame, UpstreamFrame::AuthSuccess));
    }

    #[test]
    fn decodes_auth_error_with_message() {
        let frame =
            JsonCodec::decode(r#"{"type":"auth_error","code":401,"message":"bad signature"}"#)
                .unwrap();
        match frame {
            UpstreamFrame::AuthError(err) => {
                assert_eq!(err.code, 401);
                assert_eq!(err.message, "bad signature");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn decodes_ticker() {
        let frame = JsonCodec::decode(
            r#"{"type":"ticker","symbol":"BTCUSDT","price":"50000.5","timestamp":1700000000000000}"#,
        )
        .unwrap();
        match frame {
            UpstreamFrame::Ticker(ticker) => assert_eq!(ticker.symbol, "BTCUSDT"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn products_relayed_opaquely() {
        let frame = JsonCodec::decode(
            r#"{"type":"products","result":[{"symbol":"BTCUSDT","state":"live"}]}"#,
        )
        .unwrap();
        match frame {
            UpstreamFrame::Products(value) => {
                assert_eq!(value["result"][0]["symbol"], "BTCUSDT");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn decodes_subscription_ack() {
        let frame = JsonCodec::decode(
            r#"{"type":"subscriptions","channels":[{"name":"ticker","symbols":["all"]}]}"#,
        )
        .unwrap();
        match frame {
            UpstreamFrame::Subscriptions(ack) => {
                assert_eq!(ack.channels.len(), 1);
                assert_eq!(ack.channels[0].name, "ticker");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_distinct_error() {
        let err = JsonCodec::decode(r#"{"type":"candlestick_1m","symbol":"X"}"#).unwrap_err();
        assert!(matches!(err, CodecError::UnknownFrameType(t) if t == "candlestick_1m"));
    }

    #[test]
    fn missing_type_is_rejected() {
        let err = JsonCodec::decode(r#"{"symbol":"BTCUSDT"}"#).unwrap_err();
        assert!(matches!(err, CodecError::MissingType));
    }

    #[test]
    fn invalid_json_is_rejected() {
        let err = JsonCodec::decode("not json").unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }
}
