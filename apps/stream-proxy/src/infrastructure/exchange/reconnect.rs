//! Reconnection Controller
//!
//! Explicit state machine for the upstream connection lifecycle, with
//! exponential backoff and jitter between attempts. The controller is owned
//! by the connector task; only its observable state is published (via
//! `ConnectorState`).

use std::time::Duration;

use rand::Rng;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Backoff multiplier (2.0 doubles the delay each attempt).
    pub multiplier: f64,
    /// Jitter fraction (0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

// =============================================================================
// State Machine
// =============================================================================

/// Lifecycle state of the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionState {
    /// No connection attempt has been made yet.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and authenticated.
    Connected,
    /// Connection lost; waiting to retry.
    Disconnected,
    /// Retry budget spent; a new acquire must restart the cycle.
    Exhausted,
}

/// Reconnection state machine with exponential backoff.
///
/// # Example
///
/// ```rust
/// use delta_stream_proxy::infrastructure::exchange::reconnect::{
///     ReconnectConfig, ReconnectController, ReconnectionState,
/// };
///
/// let mut controller = ReconnectController::new(ReconnectConfig::default());
/// assert_eq!(controller.state(), ReconnectionState::Idle);
///
/// controller.on_connecting();
/// controller.on_connected();
/// assert_eq!(controller.state(), ReconnectionState::Connected);
///
/// controller.on_disconnected();
/// let delay = controller.next_delay();
/// assert!(delay.is_some());
/// ```
#[derive(Debug)]
pub struct ReconnectController {
    config: ReconnectConfig,
    state: ReconnectionState,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectController {
    /// Create a controller in the `Idle` state.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            state: ReconnectionState::Idle,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ReconnectionState {
        self.state
    }

    /// Number of attempts since the last successful connection.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// A connection attempt is starting.
    pub const fn on_connecting(&mut self) {
        self.state = ReconnectionState::Connecting;
    }

    /// The connection authenticated successfully; the backoff resets.
    pub const fn on_connected(&mut self) {
        self.state = ReconnectionState::Connected;
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// The connection was lost or the attempt failed.
    pub const fn on_disconnected(&mut self) {
        self.state = ReconnectionState::Disconnected;
    }

    /// Get the delay before the next attempt, advancing the backoff.
    ///
    /// Returns `None` and transitions to `Exhausted` when the attempt budget
    /// is spent. Once exhausted, only an external restart (a fresh
    /// controller) resumes reconnection.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts {
            self.state = ReconnectionState::Exhausted;
            return None;
        }

        self.attempt_count += 1;

        let delay_with_jitter = self.apply_jitter(self.current_delay);

        // Advance the base delay for the next call
        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        let capped_u64 = u64::try_from(capped).unwrap_or(u64::MAX);
        self.current_delay = Duration::from_millis(capped_u64);

        Some(delay_with_jitter)
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!((config.jitter_factor - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 10);
    }

    #[test]
    fn starts_idle() {
        let controller = ReconnectController::new(no_jitter(0));
        assert_eq!(controller.state(), ReconnectionState::Idle);
        assert_eq!(controller.attempt_count(), 0);
    }

    #[test]
    fn exponential_backoff_doubles() {
        let mut controller = ReconnectController::new(no_jitter(0));

        assert_eq!(controller.next_delay().unwrap(), Duration::from_millis(100));
        assert_eq!(controller.next_delay().unwrap(), Duration::from_millis(200));
        assert_eq!(controller.next_delay().unwrap(), Duration::from_millis(400));
        assert_eq!(controller.next_delay().unwrap(), Duration::from_millis(800));
    }

    #[test]
    fn delay_caps_at_max() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(2000),
            multiplier: 4.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        };
        let mut controller = ReconnectController::new(config);

        let _ = controller.next_delay();
        assert_eq!(
            controller.next_delay().unwrap(),
            Duration::from_millis(2000)
        );
        assert_eq!(
            controller.next_delay().unwrap(),
            Duration::from_millis(2000)
        );
    }

    #[test]
    fn connected_resets_backoff() {
        let mut controller = ReconnectController::new(no_jitter(3));

        let _ = controller.next_delay();
        let _ = controller.next_delay();
        assert_eq!(controller.attempt_count(), 2);

        controller.on_connected();
        assert_eq!(controller.state(), ReconnectionState::Connected);
        assert_eq!(controller.attempt_count(), 0);
        assert!(controller.should_retry());

        assert_eq!(controller.next_delay().unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn budget_exhaustion_transitions_state() {
        let mut controller = ReconnectController::new(no_jitter(3));

        assert!(controller.next_delay().is_some());
        assert!(controller.next_delay().is_some());
        assert!(controller.next_delay().is_some());

        assert!(controller.next_delay().is_none());
        assert_eq!(controller.state(), ReconnectionState::Exhausted);
        assert!(!controller.should_retry());

        // Exhausted is sticky: repeated polls stay exhausted
        assert!(controller.next_delay().is_none());
        assert_eq!(controller.state(), ReconnectionState::Exhausted);
    }

    #[test]
    fn lifecycle_transitions() {
        let mut controller = ReconnectController::new(no_jitter(0));

        controller.on_connecting();
        assert_eq!(controller.state(), ReconnectionState::Connecting);

        controller.on_connected();
        assert_eq!(controller.state(), ReconnectionState::Connected);

        controller.on_disconnected();
        assert_eq!(controller.state(), ReconnectionState::Disconnected);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut controller = ReconnectController::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1000),
                max_delay: Duration::from_secs(10),
                multiplier: 2.0,
                jitter_factor: 0.1,
                max_attempts: 0,
            });

            let millis = controller.next_delay().unwrap().as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test]
    fn unlimited_attempts() {
        let mut controller = ReconnectController::new(ReconnectConfig {
            max_attempts: 0,
            ..Default::default()
        });

        for _ in 0..1000 {
            assert!(controller.should_retry());
            assert!(controller.next_delay().is_some());
        }
    }
}
