//! Error types for the Kite Connect REST client.

use straddle_core::BrokerError;
use thiserror::Error;

/// Errors that can occur when talking to Kite Connect.
#[derive(Debug, Error)]
pub enum KiteError {
    /// Session token missing, expired, or rejected (`TokenException`).
    #[error("authentication error: {0}")]
    Authentication(String),

    /// API request failed.
    #[error("API error: {status_code} {error_type} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Kite exception class, e.g. `OrderException`.
        error_type: String,
        /// Message from the API.
        message: String,
    },

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("network error: {0}")]
    Network(String),

    #[error("request timeout: {0}")]
    Timeout(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl KiteError {
    pub fn api(status_code: u16, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Returns true if the request should be retried later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimit => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for KiteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for KiteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<csv::Error> for KiteError {
    fn from(err: csv::Error) -> Self {
        Self::Serialization(format!("instrument dump: {err}"))
    }
}

impl From<KiteError> for BrokerError {
    fn from(err: KiteError) -> Self {
        match err {
            KiteError::Authentication(msg) => Self::Authentication(msg),
            KiteError::Api {
                status_code,
                error_type,
                message,
            } => Self::api(status_code, format!("{error_type}: {message}")),
            KiteError::RateLimit => Self::RateLimit,
            KiteError::Network(msg) => Self::Network(msg),
            KiteError::Timeout(msg) => Self::Timeout(msg),
            KiteError::InvalidInput(msg) => Self::api(400, msg),
            KiteError::Serialization(msg) => Self::Serialization(msg),
        }
    }
}

/// Result type alias for Kite operations.
pub type Result<T> = std::result::Result<T, KiteError>;
