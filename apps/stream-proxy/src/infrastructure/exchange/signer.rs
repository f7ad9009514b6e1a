//! Request Signing
//!
//! The upstream feed authenticates WebSocket sessions with the same HMAC
//! scheme as its REST API: the signature is the hex-encoded HMAC-SHA256 of
//! `method + timestamp + path + body` under the API secret. For the
//! WebSocket handshake the method is `GET`, the path is `/live`, and the
//! body is empty.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Path signed for the WebSocket auth handshake.
pub const WS_AUTH_PATH: &str = "/live";

/// Compute the hex-encoded HMAC-SHA256 signature for a request.
#[must_use]
pub fn sign(secret: &str, method: &str, timestamp: &str, path: &str, body: &str) -> String {
    // HMAC accepts keys of any length, so new_from_slice cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(method.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Compute the signature for the WebSocket auth handshake.
///
/// `timestamp` is the Unix time in milliseconds, already formatted.
#[must_use]
pub fn sign_ws_auth(secret: &str, timestamp: &str) -> String {
    sign(secret, "GET", timestamp, WS_AUTH_PATH, "")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_rfc_4231_test_case_2() {
        // Key "Jefe", data "what do ya want for nothing?"
        let sig = sign("Jefe", "what do ya want for nothing?", "", "", "");
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn signature_is_deterministic() {
        let a = sign_ws_auth("secret", "1700000000000");
        let b = sign_ws_auth("secret", "1700000000000");
        assert_eq!(a, b);
    }

    #[test]
    fn signature_is_hex_sha256() {
        let sig = sign_ws_auth("secret", "1700000000000");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_varies_with_inputs() {
        let base = sign_ws_auth("secret", "1700000000000");
        assert_ne!(base, sign_ws_auth("other-secret", "1700000000000"));
        assert_ne!(base, sign_ws_auth("secret", "1700000000001"));
    }

    #[test]
    fn ws_auth_covers_method_and_path() {
        let sig = sign_ws_auth("secret", "1700000000000");
        assert_eq!(sig, sign("secret", "GET", "1700000000000", "/live", ""));
        assert_ne!(sig, sign("secret", "POST", "1700000000000", "/live", ""));
    }
}
