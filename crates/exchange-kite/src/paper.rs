//! In-memory paper broker for dry runs and engine tests.
//!
//! Orders live in a book keyed by id. Prices reach the book through
//! [`PaperGateway::mark`], usually via [`PaperFeed`] which marks every quote
//! of each snapshot before handing it on.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use straddle_core::{
    BrokerError, ChainFeed, ChainSnapshot, FeedError, ModifyParams, OrderGateway, OrderId,
    OrderParams, OrderRecord, OrderStatus, OrderType, Side, Variety,
};
use tracing::{debug, info};

/// Something the engine asked the paper broker to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PaperAction {
    Placed {
        order_id: OrderId,
        tradingsymbol: String,
        side: Side,
        order_type: OrderType,
        quantity: u32,
    },
    Modified {
        order_id: OrderId,
        params: ModifyParams,
    },
    Cancelled {
        order_id: OrderId,
    },
}

#[derive(Debug)]
struct PaperOrder {
    history: Vec<OrderRecord>,
    /// Stop direction fixed at placement: true fires on a rise to the trigger.
    triggers_on_rise: bool,
}

impl PaperOrder {
    fn current(&self) -> Option<&OrderRecord> {
        self.history.last()
    }
}

#[derive(Debug, Default)]
struct Book {
    next_id: u64,
    orders: HashMap<OrderId, PaperOrder>,
    prices: HashMap<String, Decimal>,
    actions: Vec<PaperAction>,
    rejected_symbols: HashSet<String>,
    history_timeouts: bool,
}

impl Book {
    fn push_state(&mut self, order_id: &OrderId, update: impl FnOnce(&mut OrderRecord)) {
        if let Some(order) = self.orders.get_mut(order_id) {
            if let Some(mut next) = order.current().cloned() {
                update(&mut next);
                order.history.push(next);
            }
        }
    }

    /// Fills or triggers every live order on `symbol` at `ltp`.
    fn match_orders(&mut self, symbol: &str, ltp: Decimal) {
        let mut fills = Vec::new();
        for (id, order) in &self.orders {
            let Some(current) = order.current() else {
                continue;
            };
            if current.tradingsymbol != symbol || current.status.is_terminal() {
                continue;
            }
            let fill = match current.order_type {
                OrderType::Market => true,
                OrderType::Limit => match (current.side, current.price) {
                    (Side::Buy, Some(p)) => ltp <= p,
                    (Side::Sell, Some(p)) => ltp >= p,
                    _ => false,
                },
                OrderType::StopLoss | OrderType::StopLossMarket => match current.trigger_price {
                    Some(t) if order.triggers_on_rise => ltp >= t,
                    Some(t) => ltp <= t,
                    None => false,
                },
            };
            if fill {
                fills.push(id.clone());
            }
        }
        for id in fills {
            debug!(order_id = %id, symbol, price = %ltp, "Paper fill");
            self.push_state(&id, |r| {
                r.status = OrderStatus::Complete;
                r.filled_quantity = r.quantity;
                r.average_price = ltp;
            });
        }
    }
}

/// Simulated broker implementing [`OrderGateway`].
#[derive(Debug, Default)]
pub struct PaperGateway {
    book: Mutex<Book>,
}

impl PaperGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a traded price and matches resting orders against it.
    pub fn mark(&self, symbol: &str, last_price: Decimal) {
        let mut book = self.book.lock();
        book.prices.insert(symbol.to_string(), last_price);
        book.match_orders(symbol, last_price);
    }

    pub fn mark_snapshot(&self, snapshot: &ChainSnapshot) {
        for quote in &snapshot.quotes {
            self.mark(&quote.symbol, quote.last_price);
        }
    }

    #[must_use]
    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.book.lock().prices.get(symbol).copied()
    }

    /// Orders on `symbol` are rejected from now on.
    pub fn reject_symbol(&self, symbol: impl Into<String>) {
        self.book.lock().rejected_symbols.insert(symbol.into());
    }

    /// Makes `order_history` time out until switched off.
    pub fn set_history_timeouts(&self, on: bool) {
        self.book.lock().history_timeouts = on;
    }

    /// Forces an order into `status`, as if the exchange had moved it.
    pub fn set_status(&self, order_id: &OrderId, status: OrderStatus) {
        let mut book = self.book.lock();
        let price = book
            .orders
            .get(order_id)
            .and_then(|o| o.current())
            .and_then(|r| r.trigger_price.or(r.price));
        book.push_state(order_id, |r| {
            if status.is_complete() {
                r.filled_quantity = r.quantity;
                if r.average_price.is_zero() {
                    r.average_price = price.unwrap_or_default();
                }
            }
            r.status = status;
        });
    }

    #[must_use]
    pub fn actions(&self) -> Vec<PaperAction> {
        self.book.lock().actions.clone()
    }

    #[must_use]
    pub fn placed_count(&self) -> usize {
        self.book
            .lock()
            .actions
            .iter()
            .filter(|a| matches!(a, PaperAction::Placed { .. }))
            .count()
    }

    #[must_use]
    pub fn cancel_count(&self, order_id: &OrderId) -> usize {
        self.book
            .lock()
            .actions
            .iter()
            .filter(|a| matches!(a, PaperAction::Cancelled { order_id: id } if id == order_id))
            .count()
    }

    #[must_use]
    pub fn order(&self, order_id: &OrderId) -> Option<OrderRecord> {
        self.book
            .lock()
            .orders
            .get(order_id)
            .and_then(|o| o.current().cloned())
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_order(&self, params: &OrderParams) -> Result<OrderId, BrokerError> {
        let mut book = self.book.lock();
        if book.rejected_symbols.contains(&params.tradingsymbol) {
            return Err(BrokerError::api(
                400,
                format!("InputException: {} is not tradable", params.tradingsymbol),
            ));
        }

        book.next_id += 1;
        let order_id = OrderId::new(format!("PAPER{:06}", book.next_id));
        let ltp = book.prices.get(&params.tradingsymbol).copied();
        let status = match params.order_type {
            OrderType::Market | OrderType::Limit => OrderStatus::Open,
            OrderType::StopLoss | OrderType::StopLossMarket => OrderStatus::TriggerPending,
        };
        let triggers_on_rise = match (params.trigger_price, ltp) {
            (Some(trigger), Some(ltp)) => trigger >= ltp,
            _ => params.side == Side::Buy,
        };

        let record = OrderRecord {
            order_id: order_id.clone(),
            tradingsymbol: params.tradingsymbol.clone(),
            status,
            side: params.side,
            order_type: params.order_type,
            quantity: params.quantity,
            filled_quantity: 0,
            average_price: Decimal::ZERO,
            price: params.price,
            trigger_price: params.trigger_price,
            status_message: None,
        };
        book.orders.insert(
            order_id.clone(),
            PaperOrder {
                history: vec![record],
                triggers_on_rise,
            },
        );
        book.actions.push(PaperAction::Placed {
            order_id: order_id.clone(),
            tradingsymbol: params.tradingsymbol.clone(),
            side: params.side,
            order_type: params.order_type,
            quantity: params.quantity,
        });

        // Stops wait for the next mark.
        if let (Some(ltp), OrderType::Market | OrderType::Limit) = (ltp, params.order_type) {
            book.match_orders(&params.tradingsymbol, ltp);
        }

        info!(order_id = %order_id, symbol = %params.tradingsymbol, side = %params.side, order_type = %params.order_type, "Paper order placed");
        Ok(order_id)
    }

    async fn modify_order(
        &self,
        _variety: Variety,
        order_id: &OrderId,
        params: &ModifyParams,
    ) -> Result<OrderId, BrokerError> {
        let mut book = self.book.lock();
        let current = book
            .orders
            .get(order_id)
            .and_then(|o| o.current())
            .cloned()
            .ok_or_else(|| BrokerError::order_not_found(order_id.as_str()))?;
        if current.status.is_terminal() {
            return Err(BrokerError::api(
                400,
                format!("OrderException: order is {} and cannot be modified", current.status),
            ));
        }

        book.push_state(order_id, |r| {
            if let Some(price) = params.price {
                r.price = Some(price);
            }
            if let Some(trigger) = params.trigger_price {
                r.trigger_price = Some(trigger);
            }
            if let Some(order_type) = params.order_type {
                r.order_type = order_type;
                if order_type == OrderType::Market {
                    r.status = OrderStatus::Open;
                }
            }
        });
        book.actions.push(PaperAction::Modified {
            order_id: order_id.clone(),
            params: params.clone(),
        });

        if let Some(ltp) = book.prices.get(&current.tradingsymbol).copied() {
            book.match_orders(&current.tradingsymbol, ltp);
        }
        Ok(order_id.clone())
    }

    async fn cancel_order(&self, _variety: Variety, order_id: &OrderId) -> Result<(), BrokerError> {
        let mut book = self.book.lock();
        let status = book
            .orders
            .get(order_id)
            .and_then(|o| o.current())
            .map(|r| r.status.clone())
            .ok_or_else(|| BrokerError::order_not_found(order_id.as_str()))?;
        if status.is_terminal() {
            return Err(BrokerError::api(
                400,
                format!("OrderException: order is {status} and cannot be cancelled"),
            ));
        }

        book.push_state(order_id, |r| r.status = OrderStatus::Cancelled);
        book.actions.push(PaperAction::Cancelled {
            order_id: order_id.clone(),
        });
        Ok(())
    }

    async fn order_history(&self, order_id: &OrderId) -> Result<Vec<OrderRecord>, BrokerError> {
        let book = self.book.lock();
        if book.history_timeouts {
            return Err(BrokerError::Timeout("paper history timeout".to_string()));
        }
        book.orders
            .get(order_id)
            .map(|o| o.history.clone())
            .ok_or_else(|| BrokerError::order_not_found(order_id.as_str()))
    }
}

/// Marks every snapshot from `inner` on the paper book before yielding it.
pub struct PaperFeed<F> {
    inner: F,
    gateway: Arc<PaperGateway>,
}

impl<F> PaperFeed<F> {
    pub fn new(inner: F, gateway: Arc<PaperGateway>) -> Self {
        Self { inner, gateway }
    }
}

#[async_trait]
impl<F: ChainFeed> ChainFeed for PaperFeed<F> {
    async fn next_snapshot(&mut self) -> Result<Option<ChainSnapshot>, FeedError> {
        let snapshot = self.inner.next_snapshot().await?;
        if let Some(snapshot) = &snapshot {
            self.gateway.mark_snapshot(snapshot);
        }
        Ok(snapshot)
    }
}
