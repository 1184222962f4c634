use crate::error::{BrokerError, CacheError, FeedError};
use crate::types::{ChainSnapshot, ModifyParams, OrderId, OrderParams, OrderRecord, Variety};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::time::Duration;

/// Order placement and lookup against a broker.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, params: &OrderParams) -> Result<OrderId, BrokerError>;

    /// Returns the id the broker tracks the modified order under.
    async fn modify_order(
        &self,
        variety: Variety,
        order_id: &OrderId,
        params: &ModifyParams,
    ) -> Result<OrderId, BrokerError>;

    async fn cancel_order(&self, variety: Variety, order_id: &OrderId) -> Result<(), BrokerError>;

    /// Every recorded state of the order, most recent last.
    async fn order_history(&self, order_id: &OrderId) -> Result<Vec<OrderRecord>, BrokerError>;
}

/// Source of option-chain snapshots, one per tick.
#[async_trait]
pub trait ChainFeed: Send {
    /// `Ok(None)` means the source is exhausted.
    async fn next_snapshot(&mut self) -> Result<Option<ChainSnapshot>, FeedError>;
}

/// Shared key-value store with expiry.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Exchange-local wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}
