//! Security Gate
//!
//! Pre-admission checks for the streaming endpoints: origin allow-list,
//! per-client fixed-window rate limiting, and a global session cap. All
//! checks run before a session is created or the upstream connection is
//! touched.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Rejections issued by the security gate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecurityError {
    /// The request's Origin header is not on the allow-list.
    #[error("origin not allowed: {origin}")]
    OriginNotAllowed {
        /// The rejected origin.
        origin: String,
    },

    /// The client exceeded its request budget for the current window.
    #[error("rate limit exceeded: {limit} requests per {window_secs}s")]
    RateLimitExceeded {
        /// Requests allowed per window.
        limit: u32,
        /// Window length in seconds.
        window_secs: u64,
        /// Seconds until the window resets.
        retry_after_secs: u64,
    },

    /// The global session cap is reached.
    #[error("session capacity exceeded: {max} sessions")]
    CapacityExceeded {
        /// Maximum concurrent sessions.
        max: usize,
    },
}

// =============================================================================
// Rate Limit Buckets
// =============================================================================

/// Fixed-window counter for one client identity.
#[derive(Debug)]
struct RateLimitBucket {
    count: u32,
    window_start: Instant,
}

// =============================================================================
// Security Gate
// =============================================================================

/// Configuration for the security gate.
#[derive(Debug, Clone)]
pub struct SecurityGateConfig {
    /// Allowed origins; `"*"` allows any.
    pub allowed_origins: Vec<String>,
    /// Requests allowed per window per client.
    pub rate_limit_max: u32,
    /// Rate limit window length.
    pub rate_limit_window: Duration,
    /// Maximum concurrent sessions.
    pub max_sessions: usize,
    /// How long an idle bucket survives before the sweeper removes it.
    pub bucket_ttl: Duration,
}

impl Default for SecurityGateConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            rate_limit_max: 100,
            rate_limit_window: Duration::from_secs(60),
            max_sessions: 50,
            bucket_ttl: Duration::from_secs(300),
        }
    }
}

/// Origin, rate-limit, and capacity checks shared by the HTTP handlers.
#[derive(Debug)]
pub struct SecurityGate {
    config: SecurityGateConfig,
    buckets: Mutex<HashMap<String, RateLimitBucket>>,
}

impl SecurityGate {
    /// Create a gate with no recorded traffic.
    #[must_use]
    pub fn new(config: SecurityGateConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Check an Origin header against the allow-list.
    ///
    /// Requests without an Origin header (non-browser clients) pass.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::OriginNotAllowed`] for a disallowed origin.
    pub fn check_origin(&self, origin: Option<&str>) -> Result<(), SecurityError> {
        let Some(origin) = origin else {
            return Ok(());
        };

        if self
            .config
            .allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
        {
            Ok(())
        } else {
            Err(SecurityError::OriginNotAllowed {
                origin: origin.to_string(),
            })
        }
    }

    /// Count one request for `identity`, rejecting when over budget.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::RateLimitExceeded`] with the time until the
    /// window resets.
    pub fn check_rate(&self, identity: &str) -> Result<(), SecurityError> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        let bucket = buckets
            .entry(identity.to_string())
            .or_insert(RateLimitBucket {
                count: 0,
                window_start: now,
            });

        // Fixed window: the counter resets when the window elapses
        if now.duration_since(bucket.window_start) >= self.config.rate_limit_window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        if bucket.count >= self.config.rate_limit_max {
            let elapsed = now.duration_since(bucket.window_start);
            let retry_after = self.config.rate_limit_window.saturating_sub(elapsed);
            return Err(SecurityError::RateLimitExceeded {
                limit: self.config.rate_limit_max,
                window_secs: self.config.rate_limit_window.as_secs(),
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        bucket.count += 1;
        Ok(())
    }

    /// Check the global session cap.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::CapacityExceeded`] when `current_sessions`
    /// has reached the configured maximum.
    pub fn check_capacity(&self, current_sessions: usize) -> Result<(), SecurityError> {
        if current_sessions >= self.config.max_sessions {
            Err(SecurityError::CapacityExceeded {
                max: self.config.max_sessions,
            })
        } else {
            Ok(())
        }
    }

    /// Requests allowed per window, for response headers.
    #[must_use]
    pub const fn rate_limit(&self) -> u32 {
        self.config.rate_limit_max
    }

    /// Drop buckets that have been idle longer than the TTL.
    pub fn sweep_idle(&self) {
        let now = Instant::now();
        let ttl = self.config.bucket_ttl;
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.window_start) < ttl);
        let swept = before - buckets.len();
        if swept > 0 {
            tracing::debug!(swept, remaining = buckets.len(), "Swept idle rate limit buckets");
        }
    }

    /// Number of tracked client identities.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(rate_limit_max: u32, window: Duration) -> SecurityGate {
        SecurityGate::new(SecurityGateConfig {
            allowed_origins: vec!["https://app.example.com".to_string()],
            rate_limit_max,
            rate_limit_window: window,
            max_sessions: 2,
            bucket_ttl: Duration::from_secs(300),
        })
    }

    #[test]
    fn allows_listed_origin() {
        let gate = gate(10, Duration::from_secs(60));
        assert!(gate.check_origin(Some("https://app.example.com")).is_ok());
    }

    #[test]
    fn rejects_unlisted_origin() {
        let gate = gate(10, Duration::from_secs(60));
        let err = gate.check_origin(Some("https://evil.example.com")).unwrap_err();
        assert!(matches!(err, SecurityError::OriginNotAllowed { .. }));
    }

    #[test]
    fn missing_origin_passes() {
        let gate = gate(10, Duration::from_secs(60));
        assert!(gate.check_origin(None).is_ok());
    }

    #[test]
    fn wildcard_allows_any_origin() {
        let gate = SecurityGate::new(SecurityGateConfig::default());
        assert!(gate.check_origin(Some("https://anything.example.com")).is_ok());
    }

    #[test]
    fn rate_limit_rejects_over_budget() {
        let gate = gate(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(gate.check_rate("1.2.3.4").is_ok());
        }

        let err = gate.check_rate("1.2.3.4").unwrap_err();
        match err {
            SecurityError::RateLimitExceeded {
                limit,
                window_secs,
                retry_after_secs,
            } => {
                assert_eq!(limit, 3);
                assert_eq!(window_secs, 60);
                assert!(retry_after_secs >= 1);
                assert!(retry_after_secs <= 60);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rate_limits_are_per_identity() {
        let gate = gate(1, Duration::from_secs(60));

        assert!(gate.check_rate("1.2.3.4").is_ok());
        assert!(gate.check_rate("1.2.3.4").is_err());
        assert!(gate.check_rate("5.6.7.8").is_ok());
    }

    #[test]
    fn window_expiry_resets_budget() {
        let gate = gate(1, Duration::from_millis(20));

        assert!(gate.check_rate("1.2.3.4").is_ok());
        assert!(gate.check_rate("1.2.3.4").is_err());

        std::thread::sleep(Duration::from_millis(30));
        assert!(gate.check_rate("1.2.3.4").is_ok());
    }

    #[test]
    fn capacity_check() {
        let gate = gate(10, Duration::from_secs(60));
        assert!(gate.check_capacity(0).is_ok());
        assert!(gate.check_capacity(1).is_ok());
        assert!(matches!(
            gate.check_capacity(2),
            Err(SecurityError::CapacityExceeded { max: 2 })
        ));
    }

    #[test]
    fn sweeper_drops_idle_buckets() {
        let gate = SecurityGate::new(SecurityGateConfig {
            bucket_ttl: Duration::from_millis(10),
            ..SecurityGateConfig::default()
        });

        let _ = gate.check_rate("1.2.3.4");
        assert_eq!(gate.bucket_count(), 1);

        std::thread::sleep(Duration::from_millis(20));
        gate.sweep_idle();
        assert_eq!(gate.bucket_count(), 0);
    }
}
