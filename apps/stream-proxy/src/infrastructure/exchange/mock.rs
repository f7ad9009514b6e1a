//! Synthetic Data Feed
//!
//! Stands in for the upstream connection when no credentials are configured
//! and the fallback is explicitly enabled. Emits a degraded-mode warning
//! once, then publishes random-walk ticker updates for whatever symbols the
//! registry has active, so the client-facing behavior can be exercised
//! end to end without exchange access.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::subscription::{Channel, SubscriptionRegistry, SymbolSpec};

use super::connector::{ConnectionPhase, ConnectorState, UpstreamCommand, UpstreamEvent};
use super::messages::TickerMessage;

/// Tick interval for synthetic updates.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Symbols emitted when a ticker wildcard is active.
const WILDCARD_SYMBOLS: &[&str] = &["BTCUSDT", "ETHUSDT", "SOLUSDT"];

/// Starting price for every synthetic symbol.
const BASE_PRICE: f64 = 100.0;

/// Synthetic ticker feed.
pub struct MockFeed {
    registry: Arc<SubscriptionRegistry>,
    state: Arc<ConnectorState>,
    event_tx: mpsc::Sender<UpstreamEvent>,
    cancel: CancellationToken,
}

impl MockFeed {
    /// Create a synthetic feed.
    #[must_use]
    pub const fn new(
        registry: Arc<SubscriptionRegistry>,
        state: Arc<ConnectorState>,
        event_tx: mpsc::Sender<UpstreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled.
    pub async fn run(self, mut command_rx: mpsc::Receiver<UpstreamCommand>) {
        self.state.set_phase(ConnectionPhase::Authenticated);
        let _ = self
            .event_tx
            .send(UpstreamEvent::AuthWarning(
                "no upstream credentials configured, serving synthetic data".to_string(),
            ))
            .await;

        let mut prices: HashMap<String, f64> = HashMap::new();
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Synthetic feed cancelled");
                    break;
                }
                command = command_rx.recv() => {
                    match command {
                        Some(UpstreamCommand::Apply(delta)) => {
                            // The registry is the source of truth; nothing to
                            // forward anywhere.
                            tracing::trace!(
                                subscribe = delta.subscribe.len(),
                                unsubscribe = delta.unsubscribe.len(),
                                "Synthetic feed absorbing subscription delta"
                            );
                        }
                        None => {
                            tracing::info!("Command channel closed, stopping synthetic feed");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    self.emit_ticks(&mut prices).await;
                }
            }
        }

        self.state.mark_terminated();
    }

    async fn emit_ticks(&self, prices: &mut HashMap<String, f64>) {
        for symbol in self.active_symbols() {
            let price = prices.entry(symbol.clone()).or_insert(BASE_PRICE);

            // Random walk, ±0.5% per tick
            let step: f64 = rand::rng().random_range(-0.005..=0.005);
            *price = (*price * (1.0 + step)).max(0.01);

            let ticker = TickerMessage {
                symbol,
                price: Decimal::from_f64(*price).unwrap_or_default().round_dp(2),
                mark_price: None,
                volume: None,
                timestamp: Utc::now().timestamp_micros(),
            };

            self.state.record_message();
            if self.event_tx.send(UpstreamEvent::Ticker(ticker)).await.is_err() {
                return;
            }
        }
    }

    /// Symbols to emit this tick, derived from registry state.
    fn active_symbols(&self) -> Vec<String> {
        let mut symbols = Vec::new();
        for key in self.registry.current_upstream_state() {
            if key.channel != Channel::Ticker {
                continue;
            }
            match key.spec {
                SymbolSpec::All => {
                    for symbol in WILDCARD_SYMBOLS {
                        symbols.push((*symbol).to_string());
                    }
                }
                SymbolSpec::Symbol(symbol) => symbols.push(symbol),
            }
        }
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

// =============================================================================
// Tests
// =============================================================================
