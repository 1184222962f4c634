//! Error types for the straddle engine.

use straddle_core::{BrokerError, CacheError, FeedError, OrderId, SymbolError};
use thiserror::Error;

use crate::types::Leg;

#[derive(Debug, Error)]
pub enum EngineError {
    /// One leg is sold and the other failed: the position is unhedged.
    #[error("partial entry: {placed} leg is live as order {placed_order} but {failed} leg failed: {source}")]
    PartialEntry {
        placed: Leg,
        placed_order: OrderId,
        failed: Leg,
        #[source]
        source: BrokerError,
    },

    #[error("invalid quantity {quantity} for {symbol}: must be a positive multiple of lot size {lot_size}")]
    InvalidQuantity {
        symbol: String,
        quantity: u32,
        lot_size: u32,
    },

    #[error("invalid instrument symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),

    #[error("instrument not in snapshot: {0}")]
    MissingInstrument(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    /// Squaring off failed for at least one order.
    #[error("exit incomplete: {0}")]
    Exit(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_entry_names_both_legs() {
        let err = EngineError::PartialEntry {
            placed: Leg::Ce,
            placed_order: OrderId::new("231019000000001"),
            failed: Leg::Pe,
            source: BrokerError::api(400, "InputException: margin"),
        };
        let text = err.to_string();
        assert!(text.contains("CE leg is live as order 231019000000001"));
        assert!(text.contains("PE leg failed"));
    }
}
