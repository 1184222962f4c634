//! Handle to one broker order.

use rust_decimal::Decimal;
use std::sync::Arc;
use straddle_core::{
    BrokerError, ModifyParams, OrderGateway, OrderId, OrderRecord, OrderStatus, OrderType, Variety,
};
use tracing::{debug, info, warn};

/// A live or recovered broker order.
///
/// Holds the last state seen from the broker; [`status`](Self::status)
/// refreshes it. A modified order is represented by the handle `modify`
/// returns, and the old handle should be dropped.
#[derive(Clone)]
pub struct OrderHandle {
    gateway: Arc<dyn OrderGateway>,
    variety: Variety,
    order_id: OrderId,
    record: Option<OrderRecord>,
}

impl std::fmt::Debug for OrderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderHandle")
            .field("order_id", &self.order_id)
            .field("variety", &self.variety)
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

impl OrderHandle {
    /// Binds to `order_id` without asking the broker anything.
    pub fn new(gateway: Arc<dyn OrderGateway>, variety: Variety, order_id: OrderId) -> Self {
        Self {
            gateway,
            variety,
            order_id,
            record: None,
        }
    }

    /// Rehydrates a handle from the order's latest broker state.
    ///
    /// # Errors
    /// Returns error if the broker cannot be reached or does not know the order.
    pub async fn recover(gateway: Arc<dyn OrderGateway>, order_id: OrderId) -> Result<Self, BrokerError> {
        let record = gateway
            .order_history(&order_id)
            .await?
            .pop()
            .ok_or_else(|| BrokerError::order_not_found(order_id.as_str()))?;
        Ok(Self {
            gateway,
            variety: Variety::Regular,
            order_id,
            record: Some(record),
        })
    }

    #[must_use]
    pub const fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    #[must_use]
    pub const fn record(&self) -> Option<&OrderRecord> {
        self.record.as_ref()
    }

    #[must_use]
    pub fn tradingsymbol(&self) -> Option<&str> {
        self.record.as_ref().map(|r| r.tradingsymbol.as_str())
    }

    /// Fill price, zero until the broker reports one.
    #[must_use]
    pub fn average_price(&self) -> Decimal {
        self.record.as_ref().map_or(Decimal::ZERO, |r| r.average_price)
    }

    #[must_use]
    pub fn price(&self) -> Option<Decimal> {
        self.record.as_ref().and_then(|r| r.price)
    }

    #[must_use]
    pub fn trigger_price(&self) -> Option<Decimal> {
        self.record.as_ref().and_then(|r| r.trigger_price)
    }

    /// Status as of the last refresh.
    #[must_use]
    pub fn last_status(&self) -> OrderStatus {
        self.record
            .as_ref()
            .map_or(OrderStatus::Unknown, |r| r.status.clone())
    }

    /// Fetches the latest status from the broker.
    ///
    /// A transport timeout yields [`OrderStatus::Unknown`] so the caller can
    /// retry on the next tick.
    ///
    /// # Errors
    /// Returns any broker error other than a timeout.
    pub async fn status(&mut self) -> Result<OrderStatus, BrokerError> {
        match self.gateway.order_history(&self.order_id).await {
            Ok(mut history) => match history.pop() {
                Some(latest) => {
                    let status = latest.status.clone();
                    self.record = Some(latest);
                    Ok(status)
                }
                None => Ok(OrderStatus::Unknown),
            },
            Err(e) if e.is_timeout() => {
                warn!(order_id = %self.order_id, error = %e, "Order status timed out");
                Ok(OrderStatus::Unknown)
            }
            Err(e) => Err(e),
        }
    }

    /// Requests new prices or a new order type and returns the handle for
    /// the resulting order.
    ///
    /// # Errors
    /// Returns error if the broker refuses the modification.
    pub async fn modify(
        &self,
        price: Option<Decimal>,
        trigger_price: Option<Decimal>,
        order_type: Option<OrderType>,
    ) -> Result<Self, BrokerError> {
        let params = ModifyParams {
            price,
            trigger_price,
            order_type,
        };
        if params.is_empty() {
            debug!(order_id = %self.order_id, "Modify without changes skipped");
            return Ok(self.clone());
        }

        info!(
            order_id = %self.order_id,
            price = ?price,
            trigger_price = ?trigger_price,
            order_type = ?order_type,
            "Modifying order"
        );
        let new_id = self
            .gateway
            .modify_order(self.variety, &self.order_id, &params)
            .await?;

        let record = self.record.clone().map(|mut r| {
            r.order_id = new_id.clone();
            r.price = price.or(r.price);
            r.trigger_price = trigger_price.or(r.trigger_price);
            r.order_type = order_type.unwrap_or(r.order_type);
            r
        });
        Ok(Self {
            gateway: Arc::clone(&self.gateway),
            variety: self.variety,
            order_id: new_id,
            record,
        })
    }

    /// Cancels the order. Cancelling an order that is already complete,
    /// cancelled, or rejected succeeds without effect.
    ///
    /// # Errors
    /// Returns error if the broker refuses and the order is still live.
    pub async fn cancel(&mut self) -> Result<(), BrokerError> {
        if self.last_status().is_terminal() {
            debug!(order_id = %self.order_id, status = %self.last_status(), "Cancel skipped, order already closed");
            return Ok(());
        }

        info!(order_id = %self.order_id, "Cancelling order");
        match self.gateway.cancel_order(self.variety, &self.order_id).await {
            Ok(()) => {
                if let Some(record) = self.record.as_mut() {
                    record.status = OrderStatus::Cancelled;
                }
                Ok(())
            }
            Err(e) => {
                if self.status().await.is_ok_and(|s| s.is_terminal()) {
                    debug!(order_id = %self.order_id, status = %self.last_status(), "Cancel refused for closed order");
                    return Ok(());
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use straddle_core::{Exchange, OrderParams, Product, Side, Validity};
    use straddle_kite::PaperGateway;

    const SYMBOL: &str = "NIFTY23O1919500CE";

    async fn stop_order(paper: &Arc<PaperGateway>) -> OrderHandle {
        paper.mark(SYMBOL, dec!(52.3));
        let params = OrderParams {
            variety: Variety::Regular,
            tradingsymbol: SYMBOL.to_string(),
            exchange: Exchange::Nfo,
            side: Side::Buy,
            order_type: OrderType::StopLoss,
            quantity: 50,
            price: Some(dec!(59.5)),
            trigger_price: Some(dec!(57.5)),
            product: Product::Mis,
            disclosed_quantity: 50,
            validity: Validity::Day,
        };
        let id = paper.place_order(&params).await.unwrap();
        let gateway: Arc<dyn OrderGateway> = paper.clone();
        OrderHandle::recover(gateway, id).await.unwrap()
    }

    #[tokio::test]
    async fn recover_reads_latest_state() {
        let paper = Arc::new(PaperGateway::new());
        let handle = stop_order(&paper).await;
        assert_eq!(handle.last_status(), OrderStatus::TriggerPending);
        assert_eq!(handle.trigger_price(), Some(dec!(57.5)));
        assert_eq!(handle.tradingsymbol(), Some(SYMBOL));
    }

    #[tokio::test]
    async fn status_timeout_is_unknown() {
        let paper = Arc::new(PaperGateway::new());
        let mut handle = stop_order(&paper).await;
        paper.set_history_timeouts(true);
        assert_eq!(handle.status().await.unwrap(), OrderStatus::Unknown);
    }

    #[tokio::test]
    async fn modify_returns_handle_with_new_prices() {
        let paper = Arc::new(PaperGateway::new());
        let handle = stop_order(&paper).await;
        let moved = handle.modify(Some(dec!(55.5)), Some(dec!(53.5)), None).await.unwrap();
        assert_eq!(moved.trigger_price(), Some(dec!(53.5)));
        assert_eq!(moved.price(), Some(dec!(55.5)));
        assert_eq!(paper.order(moved.order_id()).unwrap().trigger_price, Some(dec!(53.5)));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let paper = Arc::new(PaperGateway::new());
        let mut handle = stop_order(&paper).await;
        handle.cancel().await.unwrap();
        handle.cancel().await.unwrap();
        assert_eq!(paper.cancel_count(handle.order_id()), 1);
    }

    #[tokio::test]
    async fn cancel_after_unseen_fill_succeeds() {
        let paper = Arc::new(PaperGateway::new());
        let mut handle = stop_order(&paper).await;
        paper.mark(SYMBOL, dec!(58));
        // Handle still believes the order is pending.
        assert_eq!(handle.last_status(), OrderStatus::TriggerPending);
        handle.cancel().await.unwrap();
        assert_eq!(handle.last_status(), OrderStatus::Complete);
        assert_eq!(paper.cancel_count(handle.order_id()), 0);
    }
}
