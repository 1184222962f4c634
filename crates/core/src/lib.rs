//! Shared vocabulary for the short-straddle trader: broker value types, the
//! ports the engine talks through, cache implementations, configuration,
//! and tradingsymbol helpers.

pub mod cache;
pub mod clock;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod symbols;
pub mod traits;
pub mod types;

pub use cache::{FileCache, MemoryCache};
pub use clock::{FixedClock, SystemClock};
pub use config::{AppConfig, CacheConfig, KiteConfig, StrategyConfig};
pub use config_loader::ConfigLoader;
pub use error::{BrokerError, CacheError, FeedError, SymbolError};
pub use symbols::{OptionKind, OptionSymbol};
pub use traits::{ChainFeed, Clock, KeyValueCache, OrderGateway};
pub use types::{
    ChainSnapshot, Exchange, ModifyParams, OrderId, OrderParams, OrderRecord, OrderStatus,
    OrderType, Product, Quote, Side, Validity, Variety,
};
