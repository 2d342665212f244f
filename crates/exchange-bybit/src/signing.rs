//! HMAC-SHA256 request signing.
//!
//! REST calls sign `{timestamp}{api_key}{recv_window}{payload}` where the payload
//! is the query string for GET and the JSON body for POST. Streaming connections
//! authenticate with a signature over `GET/realtime{expires}`.

use crate::error::{BybitError, Result};
use funding_sniper_core::ApiCredentials;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// How far ahead of "now" a websocket auth request expires.
pub const WS_AUTH_EXPIRY_MS: i64 = 10_000;

const REALTIME_AUTH_PREFIX: &str = "GET/realtime";

/// Lowercase hex HMAC-SHA256 of `message` keyed by `secret`.
///
/// # Errors
///
/// Returns [`BybitError::Signing`] if the key is rejected by the MAC.
pub fn hmac_sha256_hex(secret: &str, message: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BybitError::Signing(format!("invalid key length: {e}")))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Headers attached to every signed REST call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub api_key: String,
    pub signature: String,
    pub timestamp: String,
    pub recv_window: String,
}

/// Arguments of an `{"op":"auth"}` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsAuth {
    pub api_key: String,
    pub expires: i64,
    pub signature: String,
}

/// Holds one API key pair and produces signatures for it.
#[derive(Debug)]
pub struct RequestSigner {
    api_key: String,
    secret: SecretString,
    recv_window_ms: u64,
}

impl RequestSigner {
    #[must_use]
    pub fn new(credentials: &ApiCredentials, recv_window_ms: u64) -> Self {
        Self {
            api_key: credentials.api_key.clone(),
            secret: SecretString::from(credentials.secret.clone()),
            recv_window_ms,
        }
    }

    /// Signs a REST payload issued at `timestamp_ms`.
    ///
    /// # Errors
    ///
    /// Returns an error if HMAC computation fails.
    pub fn rest_headers(&self, timestamp_ms: i64, payload: &str) -> Result<SignedHeaders> {
        let timestamp = timestamp_ms.to_string();
        let recv_window = self.recv_window_ms.to_string();
        let message = format!("{timestamp}{}{recv_window}{payload}", self.api_key);
        let signature = hmac_sha256_hex(self.secret.expose_secret(), &message)?;

        Ok(SignedHeaders {
            api_key: self.api_key.clone(),
            signature,
            timestamp,
            recv_window,
        })
    }

    /// Builds websocket auth arguments valid until `now_ms + WS_AUTH_EXPIRY_MS`.
    ///
    /// # Errors
    ///
    /// Returns an error if HMAC computation fails.
    pub fn ws_auth(&self, now_ms: i64) -> Result<WsAuth> {
        let expires = now_ms + WS_AUTH_EXPIRY_MS;
        let signature = hmac_sha256_hex(
            self.secret.expose_secret(),
            &format!("{REALTIME_AUTH_PREFIX}{expires}"),
        )?;

        Ok(WsAuth {
            api_key: self.api_key.clone(),
            expires,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> RequestSigner {
        RequestSigner::new(
            &ApiCredentials {
                api_key: "my-key".to_string(),
                secret: "my-secret".to_string(),
            },
            5000,
        )
    }

    #[test]
    fn test_hmac_known_vector() {
        let sig = hmac_sha256_hex("key", "The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(
            sig,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_rest_headers_sign_canonical_string() {
        let headers = signer().rest_headers(1_700_000_000_000, "category=linear").unwrap();
        let expected =
            hmac_sha256_hex("my-secret", "1700000000000my-key5000category=linear").unwrap();

        assert_eq!(headers.signature, expected);
        assert_eq!(headers.timestamp, "1700000000000");
        assert_eq!(headers.recv_window, "5000");
        assert_eq!(headers.api_key, "my-key");
        assert_eq!(headers.signature.len(), 64);
    }

    #[test]
    fn test_different_payloads_different_signatures() {
        let s = signer();
        let a = s.rest_headers(1, "a=1").unwrap();
        let b = s.rest_headers(1, "a=2").unwrap();
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn test_ws_auth_expires_ten_seconds_ahead() {
        let auth = signer().ws_auth(1_000).unwrap();
        assert_eq!(auth.expires, 11_000);
        assert_eq!(
            auth.signature,
            hmac_sha256_hex("my-secret", "GET/realtime11000").unwrap()
        );
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let rendered = format!("{:?}", signer());
        assert!(!rendered.contains("my-secret"));
    }
}
