//! Proxy Configuration Settings
//!
//! Configuration types for the stream proxy, loaded from environment variables.

use std::time::Duration;

use crate::infrastructure::exchange::auth;
use crate::infrastructure::exchange::auth::Credentials;

/// Exchange environment the proxy connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Production exchange.
    #[default]
    Production,
    /// Testnet exchange.
    Testnet,
}

impl Environment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "TESTNET" => Self::Testnet,
            _ => Self::Production,
        }
    }

    /// Check if this is the production environment.
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Testnet => "testnet",
        }
    }

    /// WebSocket URL of the exchange feed for this environment.
    #[must_use]
    pub const fn upstream_url(&self) -> &'static str {
        match self {
            Self::Production => "wss://socket.delta.exchange",
            Self::Testnet => "wss://testnet-socket.delta.exchange",
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP streaming server port.
    pub http_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 3001,
            health_port: 8082,
        }
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silence tolerated after a ping before the connection is restarted.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(30),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 10,
        }
    }
}

/// Security settings for the streaming endpoints.
#[derive(Debug, Clone)]
pub struct SecuritySettings {
    /// Allowed origins; `"*"` allows any.
    pub allowed_origins: Vec<String>,
    /// Requests allowed per client per window.
    pub rate_limit_max: u32,
    /// Rate limit window length.
    pub rate_limit_window: Duration,
    /// Maximum concurrent sessions.
    pub max_sessions: usize,
    /// How long an idle rate limit bucket survives.
    pub bucket_ttl: Duration,
}

impl Default for SecuritySettings {
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

/// Stream delivery settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Per-session delivery queue capacity.
    pub queue_capacity: usize,
    /// Serve synthetic data when no credentials are configured.
    pub mock_fallback: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            mock_fallback: false,
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Exchange environment.
    pub environment: Environment,
    /// API credentials, when configured.
    pub credentials: Option<Credentials>,
    /// Server port settings.
    pub server: ServerSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Security settings.
    pub security: SecuritySettings,
    /// Stream delivery settings.
    pub stream: StreamSettings,
}

impl ProxyConfig {
    /// Create configuration from environment variables.
    ///
    /// Credentials are optional: when neither `DELTA_API_KEY` nor
    /// `DELTA_API_SECRET` is set, the proxy runs without upstream access
    /// (the mock fallback applies only if explicitly enabled).
    ///
    /// # Errors
    ///
    /// Returns an error when exactly one credential variable is set, or a
    /// credential value is empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let credentials = Credentials::from_env().map_err(|err| match err {
            auth::AuthError::MissingCredentials { var } => {
                ConfigError::MissingEnvVar(var.to_string())
            }
            other => ConfigError::Invalid(other.to_string()),
        })?;

        let environment = std::env::var("DELTA_ENV")
            .map(|s| Environment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let server = ServerSettings {
            http_port: parse_env_u16("STREAM_PROXY_HTTP_PORT", ServerSettings::default().http_port),
            health_port: parse_env_u16(
                "STREAM_PROXY_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let websocket = WebSocketSettings {
            heartbeat_interval: parse_env_duration_secs(
                "STREAM_PROXY_HEARTBEAT_INTERVAL_SECS",
                WebSocketSettings::default().heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                "STREAM_PROXY_HEARTBEAT_TIMEOUT_SECS",
                WebSocketSettings::default().heartbeat_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "STREAM_PROXY_RECONNECT_DELAY_INITIAL_MS",
                WebSocketSettings::default().reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "STREAM_PROXY_RECONNECT_DELAY_MAX_SECS",
                WebSocketSettings::default().reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "STREAM_PROXY_RECONNECT_DELAY_MULTIPLIER",
                WebSocketSettings::default().reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env_u32(
                "STREAM_PROXY_MAX_RECONNECT_ATTEMPTS",
                WebSocketSettings::default().max_reconnect_attempts,
            ),
        };

        let security = SecuritySettings {
            allowed_origins: parse_env_origins(
                "STREAM_PROXY_ALLOWED_ORIGINS",
                SecuritySettings::default().allowed_origins,
            ),
            rate_limit_max: parse_env_u32(
                "STREAM_PROXY_RATE_LIMIT_MAX",
                SecuritySettings::default().rate_limit_max,
            ),
            rate_limit_window: parse_env_duration_secs(
                "STREAM_PROXY_RATE_LIMIT_WINDOW_SECS",
                SecuritySettings::default().rate_limit_window,
            ),
            max_sessions: parse_env_usize(
                "STREAM_PROXY_MAX_SESSIONS",
                SecuritySettings::default().max_sessions,
            ),
            bucket_ttl: parse_env_duration_secs(
                "STREAM_PROXY_BUCKET_TTL_SECS",
                SecuritySettings::default().bucket_ttl,
            ),
        };

        let stream = StreamSettings {
            queue_capacity: parse_env_usize(
                "STREAM_PROXY_QUEUE_CAPACITY",
                StreamSettings::default().queue_capacity,
            ),
            mock_fallback: parse_env_bool(
                "STREAM_PROXY_MOCK_FALLBACK",
                StreamSettings::default().mock_fallback,
            ),
        };

        Ok(Self {
            environment,
            credentials,
            server,
            websocket,
            security,
            stream,
        })
    }

    /// WebSocket URL of the upstream feed.
    #[must_use]
    pub fn upstream_url(&self) -> String {
        self.environment.upstream_url().to_string()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an invalid value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map_or(default, |v| {
            matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
        })
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_env_origins(key: &str, default: Vec<String>) -> Vec<String> {
    std::env::var(key).ok().map_or(default, |v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}
