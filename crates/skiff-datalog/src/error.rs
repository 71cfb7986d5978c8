//! Datalog client error types.

use std::error::Error as StdError;

use thiserror::Error;

/// Datalog client error type.
#[derive(Debug, Error)]
pub enum DatalogError {
    /// Host name resolution failed. Transient.
    #[error("DNS lookup failed: {0}")]
    Dns(String),

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Any other transport failure (connect, timeout, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// A value could not be written in the wire format.
    #[error("Encoding error: {0}")]
    Encode(String),

    /// A response could not be parsed.
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Input rejected locally before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The query template could not be rewritten.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The message bus did not acknowledge a publish.
    #[error("Publish error: {0}")]
    Publish(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl DatalogError {
    /// Whether the retry layer should try the operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Dns(_) | Self::Publish(_) => true,
            Self::Http { status, .. } => matches!(status, 429 | 500 | 503 | 504),
            _ => false,
        }
    }

    /// Check if this is a local validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

const DNS_MARKERS: &[&str] = &[
    "dns error",
    "failed to lookup address",
    "eai_again",
    "name or service not known",
    "no such host",
];

impl From<reqwest::Error> for DatalogError {
    fn from(err: reqwest::Error) -> Self {
        let mut source: Option<&(dyn StdError + 'static)> = Some(&err);
        while let Some(e) = source {
            let text = e.to_string().to_lowercase();
            if DNS_MARKERS.iter().any(|m| text.contains(m)) {
                return DatalogError::Dns(e.to_string());
            }
            source = e.source();
        }
        DatalogError::Network(err.to_string())
    }
}

/// Result type for datalog operations.
pub type Result<T> = std::result::Result<T, DatalogError>;
