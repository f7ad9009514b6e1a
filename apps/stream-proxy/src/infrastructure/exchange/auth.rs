//! Upstream Authentication
//!
//! Credentials for the upstream feed and the errors the auth handshake can
//! produce. The handshake itself lives in the connector: it sends a signed
//! auth frame immediately after the WebSocket opens and waits for the
//! upstream verdict before forwarding any subscriptions.

use std::fmt;

use thiserror::Error;

/// Environment variable holding the API key.
pub const API_KEY_VAR: &str = "DELTA_API_KEY";

/// Environment variable holding the API secret.
pub const API_SECRET_VAR: &str = "DELTA_API_SECRET";

// =============================================================================
// Errors
// =============================================================================

/// Errors from the upstream authentication handshake.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// A required credential environment variable is missing or empty.
    #[error("missing credentials: {var} is not set")]
    MissingCredentials {
        /// The environment variable that was missing.
        var: &'static str,
    },

    /// The upstream rejected the key or signature.
    #[error("invalid API key or signature")]
    InvalidCredentials,

    /// The key is valid but lacks the required permissions.
    #[error("API key lacks required permissions")]
    InsufficientPermissions,

    /// No auth verdict arrived before the deadline.
    #[error("authentication timed out")]
    Timeout,

    /// The auth response could not be parsed.
    #[error("malformed auth response: {0}")]
    InvalidMessage(String),

    /// The upstream reported an auth error we do not classify.
    #[error("upstream auth error {code}: {message}")]
    Server {
        /// Upstream error code.
        code: i64,
        /// Upstream error message.
        message: String,
    },
}

impl AuthError {
    /// Whether retrying the connection cannot help.
    ///
    /// Fatal errors stop the reconnection loop; everything else is retried
    /// with backoff.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials { .. }
                | Self::InvalidCredentials
                | Self::InsufficientPermissions
        )
    }

    /// Classify an upstream auth error payload.
    #[must_use]
    pub fn from_upstream(code: i64, message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("signature") || lower.contains("invalid api key") {
            Self::InvalidCredentials
        } else if lower.contains("permission") || lower.contains("unauthorized") {
            Self::InsufficientPermissions
        } else {
            Self::Server {
                code,
                message: message.to_string(),
            }
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Upstream API credentials.
///
/// The secret is never logged: the `Debug` impl redacts both fields.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create credentials, validating both parts are non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingCredentials`] if either part is empty.
    pub fn new(api_key: String, api_secret: String) -> Result<Self, AuthError> {
        if api_key.trim().is_empty() {
            return Err(AuthError::MissingCredentials { var: API_KEY_VAR });
        }
        if api_secret.trim().is_empty() {
            return Err(AuthError::MissingCredentials {
                var: API_SECRET_VAR,
            });
        }
        Ok(Self {
            api_key,
            api_secret,
        })
    }

    /// Load credentials from the environment.
    ///
    /// Returns `Ok(None)` when neither variable is set (mock fallback may
    /// apply); an error when only one is set or either is empty.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingCredentials`] naming the missing variable.
    pub fn from_env() -> Result<Option<Self>, AuthError> {
        let key = std::env::var(API_KEY_VAR).ok();
        let secret = std::env::var(API_SECRET_VAR).ok();

        match (key, secret) {
            (None, None) => Ok(None),
            (Some(key), Some(secret)) => Self::new(key, secret).map(Some),
            (Some(_), None) => Err(AuthError::MissingCredentials {
                var: API_SECRET_VAR,
            }),
            (None, Some(_)) => Err(AuthError::MissingCredentials { var: API_KEY_VAR }),
        }
    }

    /// The API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// The API secret, for signing only.
    #[must_use]
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_require_both_parts() {
        assert!(Credentials::new("key".to_string(), "secret".to_string()).is_ok());
        assert!(matches!(
            Credentials::new(String::new(), "secret".to_string()),
            Err(AuthError::MissingCredentials { var: API_KEY_VAR })
        ));
        assert!(matches!(
            Credentials::new("key".to_string(), "  ".to_string()),
            Err(AuthError::MissingCredentials {
                var: API_SECRET_VAR
            })
        ));
    }

    #[test]
    fn debug_never_leaks_secret() {
        let creds = Credentials::new("live-key".to_string(), "live-secret".to_string()).unwrap();
        let debug = format!("{creds:?}");
        assert!(!debug.contains("live-key"));
        assert!(!debug.contains("live-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn fatal_classification() {
        assert!(AuthError::InvalidCredentials.is_fatal());
        assert!(AuthError::InsufficientPermissions.is_fatal());
        assert!(AuthError::MissingCredentials { var: API_KEY_VAR }.is_fatal());
        assert!(!AuthError::Timeout.is_fatal());
        assert!(
            !AuthError::Server {
                code: 500,
                message: "internal".to_string()
            }
            .is_fatal()
        );
    }

    #[test]
    fn upstream_errors_are_classified_by_message() {
        assert_eq!(
            AuthError::from_upstream(401, "Signature mismatch"),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            AuthError::from_upstream(403, "key has no permission for channel"),
            AuthError::InsufficientPermissions
        );
        assert!(matches!(
            AuthError::from_upstream(500, "temporary failure"),
            AuthError::Server { code: 500, .. }
        ));
    }
}
