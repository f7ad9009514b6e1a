//! Subscription Registry
//!
//! Domain types for tracking which client sessions want which market data
//! channels, and for computing the exact deltas that must be sent to the
//! single upstream connection.
//!
//! # Design
//!
//! The registry tracks, per channel:
//! - Which sessions are interested in each specific symbol
//! - Which sessions hold the channel-wide wildcard ("all")
//! - A mirror of the keys currently subscribed upstream
//!
//! A key is subscribed upstream iff at least one session wants it **and**
//! no wildcard on its channel subsumes it. First interest (0→1) emits
//! exactly one subscribe; last interest (1→0) exactly one unsubscribe.
//! Activating a wildcard withdraws the channel's specific keys from
//! upstream (interest stays tracked); deactivating it re-subscribes
//! exactly the specific keys that still have interested sessions.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a client session.
pub type SessionId = uuid::Uuid;

/// A market symbol string (e.g. "BTCUSDT").
pub type Symbol = String;

/// Market data channels exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Ticker updates.
    Ticker,
    /// Top-of-book (best bid/ask) updates.
    L1Orderbook,
    /// Order book depth updates.
    L2Orderbook,
}

impl Channel {
    /// Get all channels.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Ticker, Self::L1Orderbook, Self::L2Orderbook]
    }

    /// Channel name on both the client and upstream wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::L1Orderbook => "l1_orderbook",
            Self::L2Orderbook => "l2_orderbook",
        }
    }

    /// Parse a channel name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ticker" => Some(Self::Ticker),
            "l1_orderbook" => Some(Self::L1Orderbook),
            "l2_orderbook" => Some(Self::L2Orderbook),
            _ => None,
        }
    }
}

/// What a subscription targets: one symbol or the whole channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolSpec {
    /// A specific symbol.
    Symbol(Symbol),
    /// Channel-wide wildcard ("all").
    All,
}

impl SymbolSpec {
    /// Symbol string as sent upstream ("all" for the wildcard).
    #[must_use]
    pub fn as_wire_str(&self) -> &str {
        match self {
            Self::Symbol(s) => s,
            Self::All => "all",
        }
    }
}

/// A (channel, symbol-spec) pair as tracked against the upstream feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    /// The channel.
    pub channel: Channel,
    /// The symbol or wildcard.
    pub spec: SymbolSpec,
}

impl SubscriptionKey {
    /// Create a key for a specific symbol.
    #[must_use]
    pub const fn symbol(channel: Channel, symbol: Symbol) -> Self {
        Self {
            channel,
            spec: SymbolSpec::Symbol(symbol),
        }
    }

    /// Create a wildcard key.
    #[must_use]
    pub const fn wildcard(channel: Channel) -> Self {
        Self {
            channel,
            spec: SymbolSpec::All,
        }
    }
}

// =============================================================================
// Subscription Delta
// =============================================================================

/// Net change to apply to the upstream subscription set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDelta {
    /// Keys to subscribe upstream.
    pub subscribe: Vec<SubscriptionKey>,
    /// Keys to unsubscribe upstream.
    pub unsubscribe: Vec<SubscriptionKey>,
}

impl SubscriptionDelta {
    /// Check if there is any change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Merge another delta into this one.
    pub fn merge(&mut self, other: Self) {
        self.subscribe.extend(other.subscribe);
        self.unsubscribe.extend(other.unsubscribe);
    }
}

// =============================================================================
// Per-Channel State
// =============================================================================

/// Tracks interest and upstream mirror for a single channel.
#[derive(Debug, Default)]
struct ChannelState {
    /// Map from symbol to the sessions interested in it.
    interest: HashMap<Symbol, HashSet<SessionId>>,
    /// Sessions holding the channel-wide wildcard.
    wildcard: HashSet<SessionId>,
    /// Specs currently subscribed upstream for this channel.
    upstream: HashSet<SymbolSpec>,
}

impl ChannelState {
    fn wildcard_active(&self) -> bool {
        !self.wildcard.is_empty()
    }

    /// Add interest in one spec. Returns upstream ops for this channel.
    fn add(&mut self, session: SessionId, spec: &SymbolSpec) -> ChannelOps {
        let mut ops = ChannelOps::default();

        match spec {
            SymbolSpec::All => {
                let was_active = self.wildcard_active();
                self.wildcard.insert(session);

                if !was_active {
                    // Wildcard activation: subscribe "all", withdraw the
                    // specific keys it subsumes.
                    ops.subscribe.push(SymbolSpec::All);
                    self.upstream.insert(SymbolSpec::All);

                    let specifics: Vec<SymbolSpec> = self
                        .upstream
                        .iter()
                        .filter(|s| matches!(s, SymbolSpec::Symbol(_)))
                        .cloned()
                        .collect();
                    for s in specifics {
                        self.upstream.remove(&s);
                        ops.unsubscribe.push(s);
                    }
                }
            }
            SymbolSpec::Symbol(symbol) => {
                let sessions = self.interest.entry(symbol.clone()).or_default();
                let first = sessions.is_empty();
                sessions.insert(session);

                if first && !self.wildcard_active() {
                    let spec = SymbolSpec::Symbol(symbol.clone());
                    self.upstream.insert(spec.clone());
                    ops.subscribe.push(spec);
                }
            }
        }

        ops
    }

    /// Remove interest in one spec. Returns upstream ops for this channel.
    fn remove(&mut self, session: SessionId, spec: &SymbolSpec) -> ChannelOps {
        let mut ops = ChannelOps::default();

        match spec {
            SymbolSpec::All => {
                if self.wildcard.remove(&session) && !self.wildcard_active() {
                    ops.merge(self.deactivate_wildcard());
                }
            }
            SymbolSpec::Symbol(symbol) => {
                let Some(sessions) = self.interest.get_mut(symbol) else {
                    return ops;
                };
                if !sessions.remove(&session) {
                    return ops;
                }

                if sessions.is_empty() {
                    self.interest.remove(symbol);
                    let spec = SymbolSpec::Symbol(symbol.clone());
                    if self.upstream.remove(&spec) {
                        ops.unsubscribe.push(spec);
                    }
                }
            }
        }

        ops
    }

    /// Remove every trace of a session from this channel.
    fn remove_session(&mut self, session: SessionId) -> ChannelOps {
        let mut ops = ChannelOps::default();

        // Specific interest first, so wildcard deactivation below sees the
        // final interest set.
        let symbols: Vec<Symbol> = self
            .interest
            .iter()
            .filter(|(_, sessions)| sessions.contains(&session))
            .map(|(symbol, _)| symbol.clone())
            .collect();
        for symbol in symbols {
            ops.merge(self.remove(session, &SymbolSpec::Symbol(symbol)));
        }

        if self.wildcard.remove(&session) && !self.wildcard_active() {
            ops.merge(self.deactivate_wildcard());
        }

        ops
    }

    /// Last wildcard holder left: unsubscribe "all", re-subscribe exactly
    /// the still-wanted specific keys.
    fn deactivate_wildcard(&mut self) -> ChannelOps {
        let mut ops = ChannelOps::default();

        if self.upstream.remove(&SymbolSpec::All) {
            ops.unsubscribe.push(SymbolSpec::All);
        }

        for symbol in self.interest.keys() {
            let spec = SymbolSpec::Symbol(symbol.clone());
            self.upstream.insert(spec.clone());
            ops.subscribe.push(spec);
        }

        ops
    }

    fn sessions_for(&self, symbol: &str) -> Vec<SessionId> {
        let mut sessions: HashSet<SessionId> = self.wildcard.iter().copied().collect();
        if let Some(interested) = self.interest.get(symbol) {
            sessions.extend(interested.iter().copied());
        }
        sessions.into_iter().collect()
    }

    fn upstream_specs(&self) -> Vec<SymbolSpec> {
        self.upstream.iter().cloned().collect()
    }
}

/// Upstream ops scoped to one channel (specs only).
#[derive(Debug, Default)]
struct ChannelOps {
    subscribe: Vec<SymbolSpec>,
    unsubscribe: Vec<SymbolSpec>,
}

impl ChannelOps {
    fn merge(&mut self, other: Self) {
        self.subscribe.extend(other.subscribe);
        self.unsubscribe.extend(other.unsubscribe);
    }

    fn into_delta(self, channel: Channel) -> SubscriptionDelta {
        SubscriptionDelta {
            subscribe: self
                .subscribe
                .into_iter()
                .map(|spec| SubscriptionKey { channel, spec })
                .collect(),
            unsubscribe: self
                .unsubscribe
                .into_iter()
                .map(|spec| SubscriptionKey { channel, spec })
                .collect(),
        }
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of session interest across all channels.
///
/// # Example
///
/// ```rust
/// use delta_stream_proxy::domain::subscription::{
///     Channel, SubscriptionRegistry, SymbolSpec,
/// };
///
/// let registry = SubscriptionRegistry::new();
/// let session = uuid::Uuid::new_v4();
///
/// // First interest emits a subscribe
/// let delta = registry.add_interest(
///     session,
///     Channel::Ticker,
///     &[SymbolSpec::Symbol("BTCUSDT".to_string())],
/// );
/// assert_eq!(delta.subscribe.len(), 1);
///
/// // Session teardown emits the matching unsubscribe
/// let delta = registry.remove_session(session);
/// assert_eq!(delta.unsubscribe.len(), 1);
/// ```
pub struct SubscriptionRegistry {
    ticker: RwLock<ChannelState>,
    l1_orderbook: RwLock<ChannelState>,
    l2_orderbook: RwLock<ChannelState>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ticker: RwLock::new(ChannelState::default()),
            l1_orderbook: RwLock::new(ChannelState::default()),
            l2_orderbook: RwLock::new(ChannelState::default()),
        }
    }

    /// Register interest for a session.
    ///
    /// Returns the net upstream delta (possibly empty).
    pub fn add_interest(
        &self,
        session: SessionId,
        channel: Channel,
        specs: &[SymbolSpec],
    ) -> SubscriptionDelta {
        let mut ops = ChannelOps::default();
        {
            let mut state = self.state_for(channel).write();
            for spec in specs {
                ops.merge(state.add(session, spec));
            }
        }
        ops.into_delta(channel)
    }

    /// Withdraw interest for a session.
    ///
    /// Returns the net upstream delta (possibly empty).
    pub fn remove_interest(
        &self,
        session: SessionId,
        channel: Channel,
        specs: &[SymbolSpec],
    ) -> SubscriptionDelta {
        let mut ops = ChannelOps::default();
        {
            let mut state = self.state_for(channel).write();
            for spec in specs {
                ops.merge(state.remove(session, spec));
            }
        }
        ops.into_delta(channel)
    }

    /// Remove a session from every channel (disconnect cleanup).
    ///
    /// Emits the same deltas the equivalent per-key removals would.
    pub fn remove_session(&self, session: SessionId) -> SubscriptionDelta {
        let mut delta = SubscriptionDelta::default();
        for channel in Channel::all() {
            let ops = self.state_for(*channel).write().remove_session(session);
            delta.merge(ops.into_delta(*channel));
        }
        delta
    }

    /// Current upstream-active key set, for replay after reconnect.
    #[must_use]
    pub fn current_upstream_state(&self) -> Vec<SubscriptionKey> {
        let mut keys = Vec::new();
        for channel in Channel::all() {
            for spec in self.state_for(*channel).read().upstream_specs() {
                keys.push(SubscriptionKey {
                    channel: *channel,
                    spec,
                });
            }
        }
        keys
    }

    /// Sessions that should receive a data message for (channel, symbol).
    ///
    /// Includes wildcard holders on the channel.
    #[must_use]
    pub fn sessions_for(&self, channel: Channel, symbol: &str) -> Vec<SessionId> {
        self.state_for(channel).read().sessions_for(symbol)
    }

    /// Statistics for a channel.
    #[must_use]
    pub fn stats(&self, channel: Channel) -> SubscriptionStats {
        let state = self.state_for(channel).read();
        SubscriptionStats {
            symbol_count: state.interest.len(),
            wildcard_sessions: state.wildcard.len(),
            upstream_keys: state.upstream.len(),
        }
    }

    /// Total number of upstream-active keys across all channels.
    #[must_use]
    pub fn upstream_key_count(&self) -> usize {
        Channel::all()
            .iter()
            .map(|c| self.state_for(*c).read().upstream.len())
            .sum()
    }

    const fn state_for(&self, channel: Channel) -> &RwLock<ChannelState> {
        match channel {
            Channel::Ticker => &self.ticker,
            Channel::L1Orderbook => &self.l1_orderbook,
            Channel::L2Orderbook => &self.l2_orderbook,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for a single channel.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionStats {
    /// Number of symbols with at least one interested session.
    pub symbol_count: usize,
    /// Number of sessions holding the wildcard.
    pub wildcard_sessions: usize,
    /// Number of keys currently subscribed upstream.
    pub upstream_keys: usize,
}

// =============================================================================
// Tests
// =============================================================================
