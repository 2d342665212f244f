//! Error types for the Bybit integration.

use thiserror::Error;

/// Errors raised by the REST gateway and the streaming connections.
#[derive(Debug, Error)]
pub enum BybitError {
    /// The exchange answered with a non-zero `retCode`.
    #[error("API error {code}: {message}")]
    Api {
        /// Exchange return code.
        code: i64,
        /// Exchange return message.
        message: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Response or frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// HMAC signing failed.
    #[error("signing error: {0}")]
    Signing(String),

    /// Outbound frame attempted while the connection is not active.
    #[error("{role} connection is not active")]
    NotConnected {
        /// Connection role (`order` or `fill_feed`).
        role: &'static str,
    },

    /// Transport-level websocket failure.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

impl BybitError {
    /// Creates an API error from a return code and message.
    pub fn api(code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
        }
    }

    #[must_use]
    pub const fn not_connected(role: &'static str) -> Self {
        Self::NotConnected { role }
    }

    /// Returns true if the error indicates the request should be retried later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::WebSocket(_) | Self::NotConnected { .. } => {
                true
            }
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BybitError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BybitError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BybitError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// Result alias for Bybit operations.
pub type Result<T> = std::result::Result<T, BybitError>;
