//! Error types for the pos-relay crate.
//!
//! Failures fall into three families that drive how callers react:
//!
//! - transport failures (publishing or pulling from Pub/Sub), which fail a
//!   submission or cause an inbound update to be nacked
//! - persistence failures, which fail a submission after the publish already
//!   happened, or cause an inbound update to be nacked
//! - validation failures, which reject a request or message before any side
//!   effect
//!
//! Lower-level errors (HTTP, JSON, crypto) keep their own variants
//! so the source chain is preserved.

use thiserror::Error;

/// The main error type for this crate
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// RSA cryptography error (key parsing, signing)
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Invalid configuration (missing fields, bad format)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pub/Sub API returned an error response
    #[error("API error ({}): {}", .0.status, .0.message)]
    Api(ApiError),

    /// Rate limit exceeded
    #[error("Rate limited{}", retry_suffix(.retry_after_ms))]
    RateLimited {
        /// Retry after this many milliseconds
        retry_after_ms: Option<u64>,
    },

    /// Publishing to or consuming from the message transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The order store or menu table rejected the operation
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A request or message is missing required fields
    #[error("Validation error: {0}")]
    Validation(String),

    /// Subscription or connection closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,
}

fn retry_suffix(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(", retry after {}ms", ms),
        None => String::new(),
    }
}

/// Error returned by the Pub/Sub API
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Error status string from the API (e.g. `NOT_FOUND`)
    pub code: Option<String>,
    /// Error message
    pub message: String,
}

impl Error {
    /// Fold any failure raised while publishing into [`Error::Transport`].
    ///
    /// Transport errors are passed through untouched so their text is not
    /// prefixed twice.
    pub fn into_transport(self) -> Self {
        match self {
            Error::Transport(_) => self,
            other => Error::Transport(other.to_string()),
        }
    }

    /// Fold any failure raised by a store into [`Error::Persistence`].
    pub fn into_persistence(self) -> Self {
        match self {
            Error::Persistence(_) => self,
            other => Error::Persistence(other.to_string()),
        }
    }

    /// HTTP status a hosting router should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            _ => 500,
        }
    }

    /// Whether the operation may succeed if attempted again later
    ///
    /// A 401 counts as retryable because the cached token is dropped on it
    /// and the next attempt fetches a fresh one.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimited { .. } | Error::ConnectionClosed => true,
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Api(e) => e.is_server_error() || matches!(e.status, 401 | 408),
            _ => false,
        }
    }
}

impl From<rsa::Error> for Error {
    fn from(err: rsa::Error) -> Self {
        Error::Crypto(err.to_string())
    }
}

impl From<rsa::pkcs8::Error> for Error {
    fn from(err: rsa::pkcs8::Error) -> Self {
        Error::Crypto(format!("PKCS8 error: {}", err))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Config(format!("invalid URL: {}", err))
    }
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// Create an API error with an error code
    pub fn with_code(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = Error::Api(ApiError::new(404, "Resource not found"));
        assert!(err.to_string().contains("404"));
        assert!(err.to_string().contains("Resource not found"));
    }

    #[test]
    fn test_rate_limited_display() {
        let err = Error::RateLimited {
            retry_after_ms: Some(1000),
        };
        assert!(err.to_string().contains("1000"));

        let err = Error::RateLimited {
            retry_after_ms: None,
        };
        assert_eq!(err.to_string(), "Rate limited");
    }

    #[test]
    fn test_into_transport() {
        let err = Error::Api(ApiError::with_code(503, "UNAVAILABLE", "try later")).into_transport();
        match err {
            Error::Transport(msg) => assert!(msg.contains("try later")),
            other => panic!("expected transport error, got {:?}", other),
        }

        let err = Error::Transport("broker down".into()).into_transport();
        assert_eq!(err.to_string(), "Transport error: broker down");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation("missing".into()).status_code(), 400);
        assert_eq!(Error::Persistence("locked".into()).status_code(), 500);
        assert_eq!(Error::Transport("down".into()).status_code(), 500);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::ConnectionClosed.is_retryable());
        assert!(Error::Api(ApiError::new(502, "bad gateway")).is_retryable());
        assert!(Error::Api(ApiError::new(401, "expired token")).is_retryable());
        assert!(!Error::Api(ApiError::new(403, "denied")).is_retryable());
        assert!(!Error::Api(ApiError::with_code(404, "NOT_FOUND", "no such subscription")).is_retryable());
        assert!(!Error::Validation("x".into()).is_retryable());
    }
}
