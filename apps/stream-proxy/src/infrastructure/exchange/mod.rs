//! Upstream Exchange Adapter
//!
//! WebSocket client for the Delta Exchange real-time feed:
//! - Signed authentication handshake ([`auth`], [`signer`])
//! - Wire message types and decoding ([`messages`], [`codec`])
//! - Connection loop with reconnection and liveness ([`connector`],
//!   [`reconnect`], [`heartbeat`])
//! - Single-connection guarantee across all clients ([`dedup`])
//! - Synthetic data fallback for development ([`mock`])

/// Authentication state machine and credential handling.
pub mod auth;

/// Frame decoding by `type` discriminator.
pub mod codec;

/// WebSocket connection loop.
pub mod connector;

/// Connection deduplication across client sessions.
pub mod dedup;

/// Upstream liveness tracking.
pub mod heartbeat;

/// Wire message types.
pub mod messages;

/// Synthetic data feed for development without credentials.
pub mod mock;

/// Reconnection state machine with exponential backoff.
pub mod reconnect;

/// HMAC request signing.
pub mod signer;

pub use auth::{AuthError, Credentials};
pub use codec::{CodecError, JsonCodec, UpstreamFrame};
pub use connector::{
    ConnectionPhase, ConnectorConfig, ConnectorState, UpstreamCommand, UpstreamConnector,
    UpstreamEvent,
};
pub use dedup::{ConnectionDeduplicator, DedupError, UpstreamHandle, UpstreamOptions};
pub use heartbeat::HeartbeatConfig;
pub use reconnect::{ReconnectConfig, ReconnectController, ReconnectionState};
