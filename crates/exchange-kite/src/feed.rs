//! Option-chain snapshots built by polling Kite last-traded prices.
//!
//! Kite Connect has no chain endpoint, so each tick asks for the LTP of the
//! underlying and then for the strikes nearest to it.

use crate::client::KiteClient;
use crate::error::KiteError;
use crate::instruments::ChainIndex;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use straddle_core::{ChainFeed, ChainSnapshot, FeedError, Quote};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Where and how often to poll.
#[derive(Debug, Clone)]
pub struct QuoteFeedConfig {
    /// Exchange quote key of the underlying, e.g. `NSE:NIFTY 50`.
    pub underlying_quote: String,
    /// Symbol the underlying is reported under in snapshots.
    pub underlying_symbol: String,
    /// Exchange segment prefix for option quotes.
    pub option_exchange: String,
    /// Strikes polled around the underlying price.
    pub strike_window: usize,
    pub poll_interval: Duration,
}

/// Live [`ChainFeed`] over the Kite quote API.
pub struct QuoteChainFeed {
    client: Arc<KiteClient>,
    index: ChainIndex,
    config: QuoteFeedConfig,
    ticker: Interval,
}

impl QuoteChainFeed {
    #[must_use]
    pub fn new(client: Arc<KiteClient>, index: ChainIndex, config: QuoteFeedConfig) -> Self {
        let mut ticker = interval(config.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            client,
            index,
            config,
            ticker,
        }
    }

    #[must_use]
    pub fn index(&self) -> &ChainIndex {
        &self.index
    }

    async fn poll(&self) -> Result<ChainSnapshot, KiteError> {
        let underlying = self
            .client
            .ltp(std::slice::from_ref(&self.config.underlying_quote))
            .await?;
        let spot = underlying
            .get(&self.config.underlying_quote)
            .copied()
            .ok_or_else(|| {
                KiteError::Serialization(format!(
                    "no quote for {}",
                    self.config.underlying_quote
                ))
            })?;

        let symbols = self.index.symbols_near(spot, self.config.strike_window);
        let keys: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}:{s}", self.config.option_exchange))
            .collect();
        let mut options = self.client.ltp(&keys).await?;

        // Chain order (strike, then CE before PE) so strike ties resolve the
        // same way on every poll.
        let mut quotes = Vec::with_capacity(symbols.len() + 1);
        quotes.push(Quote {
            symbol: self.config.underlying_symbol.clone(),
            last_price: spot,
        });
        quotes.extend(
            symbols
                .into_iter()
                .zip(&keys)
                .filter_map(|(symbol, key)| {
                    options
                        .remove(key)
                        .map(|last_price| Quote { symbol, last_price })
                }),
        );

        debug!(spot = %spot, quotes = quotes.len(), "Chain snapshot polled");
        Ok(ChainSnapshot::new(quotes))
    }
}

#[async_trait]
impl ChainFeed for QuoteChainFeed {
    async fn next_snapshot(&mut self) -> Result<Option<ChainSnapshot>, FeedError> {
        self.ticker.tick().await;
        match self.poll().await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) if e.is_transient() || matches!(e, KiteError::Serialization(_)) => {
                warn!(error = %e, "Chain poll failed");
                Err(FeedError::Transient(e.to_string()))
            }
            Err(e) => Err(FeedError::Fatal(e.to_string())),
        }
    }
}
