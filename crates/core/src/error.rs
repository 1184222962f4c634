//! Error types shared across the gateway, cache, and feed ports.

use thiserror::Error;

/// Errors returned by an [`OrderGateway`](crate::traits::OrderGateway).
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The transport gave up waiting for the broker.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The broker answered with an error payload.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Message from the broker.
        message: String,
    },

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BrokerError {
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    pub fn order_not_found(order_id: impl Into<String>) -> Self {
        Self::OrderNotFound {
            order_id: order_id.into(),
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns true if the same call may succeed on a later tick.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::RateLimit => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

/// Errors from a [`KeyValueCache`](crate::traits::KeyValueCache).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache encoding error: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

/// Errors from a [`ChainFeed`](crate::traits::ChainFeed).
#[derive(Debug, Error)]
pub enum FeedError {
    /// A poll failed but the next one may succeed.
    #[error("transient feed error: {0}")]
    Transient(String),

    /// The feed cannot produce any more snapshots.
    #[error("feed failed: {0}")]
    Fatal(String),
}

impl FeedError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors parsing or building instrument symbols.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("symbol {symbol} does not contain expiry marker {marker}")]
    MissingExpiryMarker { symbol: String, marker: String },

    #[error("symbol {0} has no CE/PE suffix")]
    MissingOptionSuffix(String),

    #[error("symbol {symbol} has an unparseable strike {strike:?}")]
    InvalidStrike { symbol: String, strike: String },
}
