//! Broker-facing value types shared by the gateway adapters and the engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Broker-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type as understood by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "MARKET")]
    Market,
    #[serde(rename = "LIMIT")]
    Limit,
    /// Stop-loss limit: triggers at `trigger_price`, then rests at `price`.
    #[serde(rename = "SL")]
    StopLoss,
    /// Stop-loss market: triggers at `trigger_price`, then fills at market.
    #[serde(rename = "SL-M")]
    StopLossMarket,
}

impl OrderType {
    /// Maps the presence of a limit price and a trigger price to an order type.
    #[must_use]
    pub const fn infer(has_price: bool, has_trigger: bool) -> Self {
        match (has_price, has_trigger) {
            (true, true) => Self::StopLoss,
            (true, false) => Self::Limit,
            (false, true) => Self::StopLossMarket,
            (false, false) => Self::Market,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::StopLoss => "SL",
            Self::StopLossMarket => "SL-M",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "MARKET" => Some(Self::Market),
            "LIMIT" => Some(Self::Limit),
            "SL" => Some(Self::StopLoss),
            "SL-M" => Some(Self::StopLossMarket),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exchange {
    #[serde(rename = "NSE")]
    Nse,
    #[serde(rename = "NFO")]
    Nfo,
}

impl Exchange {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nse => "NSE",
            Self::Nfo => "NFO",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variety {
    Regular,
    Amo,
}

impl Variety {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Amo => "amo",
        }
    }
}

/// Settlement product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Product {
    /// Cash and carry (delivery equity).
    #[serde(rename = "CNC")]
    Cnc,
    /// Intraday margin.
    #[serde(rename = "MIS")]
    Mis,
    /// Overnight F&O margin.
    #[serde(rename = "NRML")]
    Nrml,
}

impl Product {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cnc => "CNC",
            Self::Mis => "MIS",
            Self::Nrml => "NRML",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Validity {
    #[serde(rename = "DAY")]
    Day,
    #[serde(rename = "IOC")]
    Ioc,
}

impl Validity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Day => "DAY",
            Self::Ioc => "IOC",
        }
    }
}

/// Lifecycle state of a broker order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Complete,
    Cancelled,
    Rejected,
    TriggerPending,
    /// Any transitional broker state (e.g. "MODIFY PENDING").
    Pending(String),
    /// The status could not be determined (transport timeout).
    Unknown,
}

impl OrderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "OPEN" => Self::Open,
            "COMPLETE" => Self::Complete,
            "CANCELLED" => Self::Cancelled,
            "REJECTED" => Self::Rejected,
            "TRIGGER PENDING" => Self::TriggerPending,
            other => Self::Pending(other.to_string()),
        }
    }

    /// True once the broker will not change the order any further.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Rejected)
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => f.write_str("OPEN"),
            Self::Complete => f.write_str("COMPLETE"),
            Self::Cancelled => f.write_str("CANCELLED"),
            Self::Rejected => f.write_str("REJECTED"),
            Self::TriggerPending => f.write_str("TRIGGER PENDING"),
            Self::Pending(raw) => f.write_str(raw),
            Self::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// One entry of an order's history, reduced to the fields the engine reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub tradingsymbol: String,
    pub status: OrderStatus,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: u32,
    pub filled_quantity: u32,
    pub average_price: Decimal,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub status_message: Option<String>,
}

/// Parameters for a new order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderParams {
    pub variety: Variety,
    pub tradingsymbol: String,
    pub exchange: Exchange,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: u32,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub product: Product,
    pub disclosed_quantity: u32,
    pub validity: Validity,
}

/// Fields to change on a resting order. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifyParams {
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub order_type: Option<OrderType>,
}

impl ModifyParams {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.price.is_none() && self.trigger_price.is_none() && self.order_type.is_none()
    }
}

/// Last traded price for one instrument in a chain snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last_price: Decimal,
}

/// One poll of the option chain plus its underlying.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub quotes: Vec<Quote>,
}

impl ChainSnapshot {
    #[must_use]
    pub fn new(quotes: Vec<Quote>) -> Self {
        Self { quotes }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        Self {
            quotes: pairs
                .into_iter()
                .map(|(symbol, last_price)| Quote {
                    symbol: symbol.into(),
                    last_price,
                })
                .collect(),
        }
    }

    /// Last price of `symbol`, if it is part of this snapshot.
    #[must_use]
    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.quotes
            .iter()
            .find(|q| q.symbol == symbol)
            .map(|q| q.last_price)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}
