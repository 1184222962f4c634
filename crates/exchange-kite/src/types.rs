//! Wire types for Kite Connect responses.
//!
//! Only the fields the trader reads are declared; everything else in a
//! response is ignored during deserialisation.

use rust_decimal::Decimal;
use serde::Deserialize;
use straddle_core::{OrderId, OrderRecord, OrderStatus, OrderType, Side};

/// Standard response envelope: `{"status": "success", "data": ...}` or
/// `{"status": "error", "message": ..., "error_type": ...}`.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub status: String,
    pub data: Option<T>,
    pub message: Option<String>,
    pub error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrderIdData {
    pub order_id: String,
}

/// One element of `GET /orders/{order_id}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawOrder {
    pub order_id: String,
    pub tradingsymbol: String,
    pub status: Option<String>,
    pub transaction_type: Option<String>,
    pub order_type: Option<String>,
    pub quantity: Option<f64>,
    pub filled_quantity: Option<f64>,
    pub average_price: Option<f64>,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub status_message: Option<String>,
}

fn positive_decimal(v: Option<f64>) -> Option<Decimal> {
    v.filter(|p| *p > 0.0)
        .map(|p| Decimal::try_from(p).unwrap_or_default())
}

impl From<RawOrder> for OrderRecord {
    fn from(raw: RawOrder) -> Self {
        let side = match raw.transaction_type.as_deref() {
            Some("SELL") => Side::Sell,
            _ => Side::Buy,
        };
        let order_type = raw
            .order_type
            .as_deref()
            .and_then(OrderType::parse)
            .unwrap_or(OrderType::Market);
        let status = raw
            .status
            .as_deref()
            .map_or_else(|| OrderStatus::Pending(String::new()), OrderStatus::parse);

        Self {
            order_id: OrderId::new(raw.order_id),
            tradingsymbol: raw.tradingsymbol,
            status,
            side,
            order_type,
            quantity: raw.quantity.unwrap_or(0.0) as u32,
            filled_quantity: raw.filled_quantity.unwrap_or(0.0) as u32,
            average_price: positive_decimal(raw.average_price).unwrap_or_default(),
            price: positive_decimal(raw.price),
            trigger_price: positive_decimal(raw.trigger_price),
            status_message: raw.status_message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawLtp {
    pub last_price: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawSession {
    pub access_token: String,
    pub user_id: Option<String>,
}

/// An authenticated Kite session.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub user_id: Option<String>,
}

/// One row of the instrument dump (`GET /instruments/{exchange}`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Instrument {
    pub instrument_token: u64,
    pub tradingsymbol: String,
    pub name: String,
    #[serde(default)]
    pub expiry: String,
    #[serde(default)]
    pub strike: f64,
    #[serde(default)]
    pub tick_size: f64,
    #[serde(default)]
    pub lot_size: u32,
    pub instrument_type: String,
    #[serde(default)]
    pub segment: String,
    pub exchange: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw(status: &str) -> RawOrder {
        RawOrder {
            order_id: "231019000000001".to_string(),
            tradingsymbol: "NIFTY23OCT19500CE".to_string(),
            status: Some(status.to_string()),
            transaction_type: Some("BUY".to_string()),
            order_type: Some("SL".to_string()),
            quantity: Some(50.0),
            filled_quantity: Some(0.0),
            average_price: Some(0.0),
            price: Some(59.5),
            trigger_price: Some(57.5),
            status_message: None,
        }
    }

    #[test]
    fn converts_resting_stop_order() {
        let record: OrderRecord = raw("TRIGGER PENDING").into();
        assert_eq!(record.status, OrderStatus::TriggerPending);
        assert_eq!(record.order_type, OrderType::StopLoss);
        assert_eq!(record.side, Side::Buy);
        assert_eq!(record.price, Some(dec!(59.5)));
        assert_eq!(record.trigger_price, Some(dec!(57.5)));
        assert_eq!(record.average_price, dec!(0));
    }

    #[test]
    fn zero_prices_become_absent() {
        let mut order = raw("COMPLETE");
        order.order_type = Some("MARKET".to_string());
        order.price = Some(0.0);
        order.trigger_price = Some(0.0);
        order.average_price = Some(52.3);

        let record: OrderRecord = order.into();
        assert!(record.status.is_complete());
        assert_eq!(record.price, None);
        assert_eq!(record.trigger_price, None);
        assert_eq!(record.average_price, dec!(52.3));
    }

    #[test]
    fn unknown_fields_are_dropped() {
        let json = serde_json::json!({
            "order_id": "1",
            "tradingsymbol": "NIFTY23OCT19500PE",
            "status": "OPEN",
            "exchange_timestamp": "2023-10-19 09:20:01",
            "meta": {"iceberg": null},
            "tag": "straddle"
        });
        let raw: RawOrder = serde_json::from_value(json).unwrap();
        let record: OrderRecord = raw.into();
        assert_eq!(record.status, OrderStatus::Open);
        assert_eq!(record.quantity, 0);
    }
}
