//! Buy/sell entry points for one tradable instrument.
//!
//! Every order is placed at most once per `(symbol, order type, side, tag)`:
//! the broker id is written to the cache under a dedup key, and later calls
//! with the same key return a handle to that order instead of placing a new
//! one. This is what keeps a restarted process from doubling its exposure.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use straddle_core::{
    Exchange, KeyValueCache, OrderGateway, OrderId, OrderParams, OrderType, Product, Side,
    Validity, Variety,
};
use tracing::{error, info};

use crate::error::{EngineError, Result};
use crate::order::OrderHandle;

/// Exchange, variety, product, and validity for an instrument class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductConfig {
    pub exchange: Exchange,
    pub variety: Variety,
    pub product: Product,
    pub validity: Validity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductClass {
    /// Cash-and-carry delivery on NSE.
    Equity,
    /// Intraday margin on NFO.
    Option,
}

impl ProductClass {
    #[must_use]
    pub const fn config(self) -> ProductConfig {
        match self {
            Self::Equity => ProductConfig {
                exchange: Exchange::Nse,
                variety: Variety::Regular,
                product: Product::Cnc,
                validity: Validity::Day,
            },
            Self::Option => ProductConfig {
                exchange: Exchange::Nfo,
                variety: Variety::Regular,
                product: Product::Mis,
                validity: Validity::Day,
            },
        }
    }
}

/// Collaborators every position places orders through.
#[derive(Clone)]
pub struct OrderContext {
    pub gateway: Arc<dyn OrderGateway>,
    pub cache: Arc<dyn KeyValueCache>,
    /// Prefix of every dedup key.
    pub namespace: String,
    pub ttl: Duration,
}

/// A tradable instrument bound to its product configuration.
#[derive(Clone)]
pub struct Position {
    symbol: String,
    lot_size: u32,
    product: ProductConfig,
    context: OrderContext,
}

impl std::fmt::Debug for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Position")
            .field("symbol", &self.symbol)
            .field("lot_size", &self.lot_size)
            .field("product", &self.product)
            .finish_non_exhaustive()
    }
}

impl Position {
    pub fn new(context: OrderContext, class: ProductClass, symbol: impl Into<String>, lot_size: u32) -> Self {
        Self {
            symbol: symbol.into(),
            lot_size,
            product: class.config(),
            context,
        }
    }

    pub fn option(context: OrderContext, symbol: impl Into<String>, lot_size: u32) -> Self {
        Self::new(context, ProductClass::Option, symbol, lot_size)
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[must_use]
    pub const fn product(&self) -> ProductConfig {
        self.product
    }

    #[must_use]
    pub const fn order_type(price: Option<Decimal>, trigger_price: Option<Decimal>) -> OrderType {
        OrderType::infer(price.is_some(), trigger_price.is_some())
    }

    /// `{namespace}:order:{symbol}:{order_type}:{side}[:{tag}]`
    #[must_use]
    pub fn dedup_key(&self, order_type: OrderType, side: Side, tag: Option<&str>) -> String {
        let base = format!(
            "{}:order:{}:{}:{}",
            self.context.namespace, self.symbol, order_type, side
        );
        match tag {
            Some(tag) => format!("{base}:{tag}"),
            None => base,
        }
    }

    /// # Errors
    /// Fails on an invalid quantity, a cache failure, or a broker rejection.
    pub async fn buy(
        &self,
        quantity: u32,
        price: Option<Decimal>,
        trigger_price: Option<Decimal>,
    ) -> Result<OrderHandle> {
        self.get_or_place(Side::Buy, quantity, price, trigger_price, None).await
    }

    /// # Errors
    /// Fails on an invalid quantity, a cache failure, or a broker rejection.
    pub async fn sell(
        &self,
        quantity: u32,
        price: Option<Decimal>,
        trigger_price: Option<Decimal>,
    ) -> Result<OrderHandle> {
        self.get_or_place(Side::Sell, quantity, price, trigger_price, None).await
    }

    /// Buy deduplicated separately from untagged buys of the same shape,
    /// e.g. a target order alongside a stop-loss.
    ///
    /// # Errors
    /// Fails on an invalid quantity, a cache failure, or a broker rejection.
    pub async fn buy_tagged(
        &self,
        tag: &str,
        quantity: u32,
        price: Option<Decimal>,
        trigger_price: Option<Decimal>,
    ) -> Result<OrderHandle> {
        self.get_or_place(Side::Buy, quantity, price, trigger_price, Some(tag))
            .await
    }

    /// Drops the dedup entry for an order shape, so the next call with that
    /// shape places a new order. Used once the cached order is dead.
    ///
    /// # Errors
    /// Fails if the cache cannot be written.
    pub async fn forget(&self, order_type: OrderType, side: Side, tag: Option<&str>) -> Result<()> {
        let key = self.dedup_key(order_type, side, tag);
        self.context.cache.delete(&key).await?;
        info!(symbol = %self.symbol, %side, %order_type, "Dedup entry dropped");
        Ok(())
    }

    fn check_quantity(&self, quantity: u32) -> Result<()> {
        if quantity == 0 || self.lot_size == 0 || quantity % self.lot_size != 0 {
            error!(symbol = %self.symbol, quantity, lot_size = self.lot_size, "Invalid order quantity");
            return Err(EngineError::InvalidQuantity {
                symbol: self.symbol.clone(),
                quantity,
                lot_size: self.lot_size,
            });
        }
        Ok(())
    }

    async fn get_or_place(
        &self,
        side: Side,
        quantity: u32,
        price: Option<Decimal>,
        trigger_price: Option<Decimal>,
        tag: Option<&str>,
    ) -> Result<OrderHandle> {
        self.check_quantity(quantity)?;
        let order_type = Self::order_type(price, trigger_price);
        let key = self.dedup_key(order_type, side, tag);
        let gateway = Arc::clone(&self.context.gateway);

        if let Some(raw) = self.context.cache.get(&key).await? {
            if let Ok(id) = String::from_utf8(raw) {
                info!(symbol = %self.symbol, %side, %order_type, order_id = %id, "Reusing cached order");
                return Ok(OrderHandle::new(gateway, self.product.variety, OrderId::new(id)));
            }
        }

        info!(
            symbol = %self.symbol,
            %side,
            %order_type,
            quantity,
            price = ?price,
            trigger_price = ?trigger_price,
            "Placing order"
        );
        let params = OrderParams {
            variety: self.product.variety,
            tradingsymbol: self.symbol.clone(),
            exchange: self.product.exchange,
            side,
            order_type,
            quantity,
            price,
            trigger_price,
            product: self.product.product,
            disclosed_quantity: quantity,
            validity: self.product.validity,
        };
        let order_id = gateway.place_order(&params).await?;

        // The order is live either way; a failed write only loses dedup.
        if let Err(e) = self
            .context
            .cache
            .set(&key, order_id.as_str().as_bytes(), self.context.ttl)
            .await
        {
            error!(key = %key, order_id = %order_id, error = %e, "Failed to cache order id");
        }

        Ok(OrderHandle::new(gateway, self.product.variety, order_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use straddle_core::MemoryCache;
    use straddle_kite::PaperGateway;

    fn context(paper: &Arc<PaperGateway>, cache: &Arc<MemoryCache>) -> OrderContext {
        OrderContext {
            gateway: paper.clone(),
            cache: cache.clone(),
            namespace: "straddle".to_string(),
            ttl: Duration::from_secs(43_200),
        }
    }

    #[test]
    fn product_classes() {
        let equity = ProductClass::Equity.config();
        assert_eq!(equity.exchange, Exchange::Nse);
        assert_eq!(equity.product, Product::Cnc);
        let option = ProductClass::Option.config();
        assert_eq!(option.exchange, Exchange::Nfo);
        assert_eq!(option.product, Product::Mis);
        assert_eq!(option.validity, Validity::Day);
    }

    #[test]
    fn order_type_mapping() {
        assert_eq!(Position::order_type(Some(dec!(1)), Some(dec!(1))), OrderType::StopLoss);
        assert_eq!(Position::order_type(Some(dec!(1)), None), OrderType::Limit);
        assert_eq!(Position::order_type(None, Some(dec!(1))), OrderType::StopLossMarket);
        assert_eq!(Position::order_type(None, None), OrderType::Market);
    }

    #[tokio::test]
    async fn repeated_sell_returns_same_order() {
        let paper = Arc::new(PaperGateway::new());
        let cache = Arc::new(MemoryCache::new());
        let position = Position::option(context(&paper, &cache), "NIFTY23O1919500CE", 50);

        let first = position.sell(50, None, None).await.unwrap();
        let second = position.sell(50, None, None).await.unwrap();

        assert_eq!(first.order_id(), second.order_id());
        assert_eq!(paper.placed_count(), 1);
        let cached = cache
            .get("straddle:order:NIFTY23O1919500CE:MARKET:SELL")
            .await
            .unwrap();
        assert_eq!(cached.as_deref(), Some(first.order_id().as_str().as_bytes()));
    }

    #[tokio::test]
    async fn tagged_buy_does_not_collide_with_stop() {
        let paper = Arc::new(PaperGateway::new());
        let cache = Arc::new(MemoryCache::new());
        let position = Position::option(context(&paper, &cache), "NIFTY23O1919500CE", 50);

        let stop = position.buy(50, Some(dec!(59.5)), Some(dec!(57.5))).await.unwrap();
        let target = position
            .buy_tagged("target", 50, Some(dec!(28.15)), Some(dec!(26.15)))
            .await
            .unwrap();
        assert_ne!(stop.order_id(), target.order_id());
        assert_eq!(paper.placed_count(), 2);
    }

    #[tokio::test]
    async fn forgotten_order_is_placed_again() {
        let paper = Arc::new(PaperGateway::new());
        let cache = Arc::new(MemoryCache::new());
        let position = Position::option(context(&paper, &cache), "NIFTY23O1919500CE", 50);

        let first = position.buy(50, Some(dec!(59.5)), Some(dec!(57.5))).await.unwrap();
        position.forget(OrderType::StopLoss, Side::Buy, None).await.unwrap();
        let second = position.buy(50, Some(dec!(59.5)), Some(dec!(57.5))).await.unwrap();

        assert_ne!(first.order_id(), second.order_id());
        assert_eq!(paper.placed_count(), 2);
    }

    #[tokio::test]
    async fn quantity_must_be_whole_lots() {
        let paper = Arc::new(PaperGateway::new());
        let cache = Arc::new(MemoryCache::new());
        let position = Position::option(context(&paper, &cache), "NIFTY23O1919500CE", 50);

        for quantity in [0, 25, 75] {
            let err = position.sell(quantity, None, None).await.unwrap_err();
            assert!(matches!(err, EngineError::InvalidQuantity { .. }));
        }
        assert_eq!(paper.placed_count(), 0);
        assert!(position.sell(100, None, None).await.is_ok());
    }
}
