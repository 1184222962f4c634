//! Kite Connect v3 REST client with rate limiting.
//!
//! # Example
//!
//! ```ignore
//! use straddle_kite::{KiteClient, KiteCredentials};
//! use straddle_core::KiteConfig;
//!
//! let config = KiteConfig::default();
//! let client = KiteClient::new(&config, KiteCredentials::from_config(&config))?;
//! let prices = client.ltp(&["NSE:NIFTY 50".to_string()]).await?;
//! ```

use crate::auth::KiteCredentials;
use crate::error::{KiteError, Result};
use crate::types::{Envelope, Instrument, OrderIdData, RawLtp, RawOrder, RawSession, Session};
use governor::{Quota, RateLimiter};
use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use straddle_core::{KiteConfig, ModifyParams, OrderId, OrderParams, OrderRecord, Variety};
use tracing::{debug, info, warn};

/// Kite Connect REST client.
pub struct KiteClient {
    base_url: String,
    http: Client,
    rate_limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
    credentials: RwLock<KiteCredentials>,
}

impl std::fmt::Debug for KiteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiteClient")
            .field("base_url", &self.base_url)
            .field("credentials", &*self.credentials.read())
            .finish_non_exhaustive()
    }
}

impl KiteClient {
    /// Creates a client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &KiteConfig, credentials: KiteCredentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KiteError::Network(format!("failed to build HTTP client: {e}")))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            rate_limiter,
            credentials: RwLock::new(credentials),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        let mut creds = self.credentials.write();
        *creds = creds.clone().with_access_token(token);
    }

    /// Rejects ids that could escape the URL path segment.
    fn validate_identifier(id: &str) -> Result<&str> {
        if id.is_empty() {
            return Err(KiteError::InvalidInput("identifier cannot be empty".to_string()));
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(KiteError::InvalidInput(format!(
                "invalid identifier: must contain only alphanumeric, hyphen, or underscore: {id}"
            )));
        }
        Ok(id)
    }

    fn builder(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "Kite request");
        let request = self
            .http
            .request(method, url)
            .header("X-Kite-Version", "3");
        match self.credentials.read().authorization() {
            Some(auth) => request.header("Authorization", auth),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.rate_limiter.until_ready().await;
        let response = request.send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            return Err(KiteError::RateLimit);
        }

        let body = response.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                KiteError::Serialization(format!("{e}: {body}"))
            } else {
                KiteError::api(status.as_u16(), "HTTPException", body.clone())
            }
        })?;

        if envelope.status != "success" || !status.is_success() {
            let error_type = envelope.error_type.unwrap_or_else(|| "GeneralException".to_string());
            let message = envelope.message.unwrap_or_default();
            if error_type == "TokenException" || status.as_u16() == 403 {
                return Err(KiteError::Authentication(message));
            }
            return Err(KiteError::api(status.as_u16(), error_type, message));
        }

        envelope
            .data
            .ok_or_else(|| KiteError::Serialization("response without data".to_string()))
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Exchanges a request token for an access token and starts using it.
    ///
    /// # Errors
    /// Returns error if Kite rejects the token or checksum.
    pub async fn generate_session(&self, request_token: &str) -> Result<Session> {
        let (api_key, checksum) = {
            let creds = self.credentials.read();
            (creds.api_key().to_string(), creds.checksum(request_token))
        };
        let form = [
            ("api_key", api_key),
            ("request_token", request_token.to_string()),
            ("checksum", checksum),
        ];
        let raw: RawSession = self
            .send(self.builder(Method::POST, "/session/token").form(&form))
            .await?;

        self.set_access_token(raw.access_token.clone());
        info!(user_id = ?raw.user_id, "Kite session established");

        Ok(Session {
            access_token: raw.access_token,
            user_id: raw.user_id,
        })
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Places an order and returns its id.
    ///
    /// # Errors
    /// Returns error if the order is rejected or the request fails.
    pub async fn place_order(&self, params: &OrderParams) -> Result<OrderId> {
        let mut form = vec![
            ("tradingsymbol", params.tradingsymbol.clone()),
            ("exchange", params.exchange.as_str().to_string()),
            ("transaction_type", params.side.as_str().to_string()),
            ("order_type", params.order_type.as_str().to_string()),
            ("quantity", params.quantity.to_string()),
            ("product", params.product.as_str().to_string()),
            ("validity", params.validity.as_str().to_string()),
            ("disclosed_quantity", params.disclosed_quantity.to_string()),
        ];
        push_price(&mut form, "price", params.price);
        push_price(&mut form, "trigger_price", params.trigger_price);

        let path = format!("/orders/{}", params.variety.as_str());
        let data: OrderIdData = self
            .send(self.builder(Method::POST, &path).form(&form))
            .await?;

        info!(
            order_id = %data.order_id,
            symbol = %params.tradingsymbol,
            side = %params.side,
            order_type = %params.order_type,
            quantity = params.quantity,
            "Order placed"
        );
        Ok(OrderId::new(data.order_id))
    }

    /// Modifies a resting order.
    ///
    /// # Errors
    /// Returns error if the order cannot be modified.
    pub async fn modify_order(
        &self,
        variety: Variety,
        order_id: &OrderId,
        params: &ModifyParams,
    ) -> Result<OrderId> {
        let id = Self::validate_identifier(order_id.as_str())?;
        let mut form = Vec::new();
        push_price(&mut form, "price", params.price);
        push_price(&mut form, "trigger_price", params.trigger_price);
        if let Some(order_type) = params.order_type {
            form.push(("order_type", order_type.as_str().to_string()));
        }

        let path = format!("/orders/{}/{id}", variety.as_str());
        let data: OrderIdData = self
            .send(self.builder(Method::PUT, &path).form(&form))
            .await?;
        Ok(OrderId::new(data.order_id))
    }

    /// Cancels a resting order.
    ///
    /// # Errors
    /// Returns error if the order cannot be cancelled.
    pub async fn cancel_order(&self, variety: Variety, order_id: &OrderId) -> Result<()> {
        let id = Self::validate_identifier(order_id.as_str())?;
        let path = format!("/orders/{}/{id}", variety.as_str());
        let _: OrderIdData = self.send(self.builder(Method::DELETE, &path)).await?;
        Ok(())
    }

    /// Full state history of an order, oldest first.
    ///
    /// # Errors
    /// Returns error if the order is unknown or the request fails.
    pub async fn order_history(&self, order_id: &OrderId) -> Result<Vec<OrderRecord>> {
        let id = Self::validate_identifier(order_id.as_str())?;
        let raw: Vec<RawOrder> = self
            .send(self.builder(Method::GET, &format!("/orders/{id}")))
            .await?;
        Ok(raw.into_iter().map(OrderRecord::from).collect())
    }

    // =========================================================================
    // Market data
    // =========================================================================

    /// Last traded prices keyed by `EXCHANGE:SYMBOL`.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn ltp(&self, instruments: &[String]) -> Result<HashMap<String, Decimal>> {
        if instruments.is_empty() {
            return Ok(HashMap::new());
        }
        let query: Vec<(&str, &str)> = instruments.iter().map(|i| ("i", i.as_str())).collect();
        let raw: HashMap<String, RawLtp> = self
            .send(self.builder(Method::GET, "/quote/ltp").query(&query))
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|(key, q)| match Decimal::try_from(q.last_price) {
                Ok(price) => Some((key, price)),
                Err(_) => {
                    warn!(instrument = %key, last_price = q.last_price, "Unrepresentable price, skipping");
                    None
                }
            })
            .collect())
    }

    /// Instrument dump for an exchange segment (e.g. `NFO`).
    ///
    /// # Errors
    /// Returns error if the request fails or the CSV is malformed.
    pub async fn instruments(&self, exchange: &str) -> Result<Vec<Instrument>> {
        let exchange = Self::validate_identifier(exchange)?;
        self.rate_limiter.until_ready().await;
        let response = self
            .builder(Method::GET, &format!("/instruments/{exchange}"))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(KiteError::api(status.as_u16(), "InputException", body));
        }
        crate::instruments::parse_dump(&body)
    }
}

fn push_price(form: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<Decimal>) {
    if let Some(v) = value {
        form.push((key, v.normalize().to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use straddle_core::{Exchange, OrderStatus, OrderType, Product, Side, Validity};
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> KiteClient {
        let config = KiteConfig {
            base_url: server.uri(),
            requests_per_second: 100,
            ..KiteConfig::default()
        };
        KiteClient::new(&config, KiteCredentials::new("key", "secret").with_access_token("tok")).unwrap()
    }

    fn sell_params() -> OrderParams {
        OrderParams {
            variety: Variety::Regular,
            tradingsymbol: "NIFTY23OCT19500CE".to_string(),
            exchange: Exchange::Nfo,
            side: Side::Sell,
            order_type: OrderType::Market,
            quantity: 50,
            price: None,
            trigger_price: None,
            product: Product::Mis,
            disclosed_quantity: 50,
            validity: Validity::Day,
        }
    }

    #[tokio::test]
    async fn place_order_posts_form_and_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/regular"))
            .and(header("X-Kite-Version", "3"))
            .and(header("Authorization", "token key:tok"))
            .and(body_string_contains("transaction_type=SELL"))
            .and(body_string_contains("order_type=MARKET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"order_id": "231019000000001"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client_for(&server).place_order(&sell_params()).await.unwrap();
        assert_eq!(id.as_str(), "231019000000001");
    }

    #[tokio::test]
    async fn stop_order_sends_prices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/regular"))
            .and(body_string_contains("price=59.5"))
            .and(body_string_contains("trigger_price=57.5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"order_id": "2"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut params = sell_params();
        params.side = Side::Buy;
        params.order_type = OrderType::StopLoss;
        params.price = Some(dec!(59.50));
        params.trigger_price = Some(dec!(57.50));
        client_for(&server).place_order(&params).await.unwrap();
    }

    #[tokio::test]
    async fn order_history_returns_typed_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders/231019000000001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": [
                    {"order_id": "231019000000001", "tradingsymbol": "NIFTY23OCT19500CE",
                     "status": "OPEN PENDING", "transaction_type": "SELL", "order_type": "MARKET",
                     "quantity": 50, "average_price": 0},
                    {"order_id": "231019000000001", "tradingsymbol": "NIFTY23OCT19500CE",
                     "status": "COMPLETE", "transaction_type": "SELL", "order_type": "MARKET",
                     "quantity": 50, "filled_quantity": 50, "average_price": 52.3,
                     "exchange_order_id": "1100000012345678"}
                ]
            })))
            .mount(&server)
            .await;

        let history = client_for(&server)
            .order_history(&OrderId::new("231019000000001"))
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        let last = history.last().unwrap();
        assert_eq!(last.status, OrderStatus::Complete);
        assert_eq!(last.side, Side::Sell);
        assert_eq!(last.average_price, dec!(52.3));
    }

    #[tokio::test]
    async fn modify_sends_only_changed_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/orders/regular/42"))
            .and(body_string_contains("order_type=MARKET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"order_id": "42"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let params = ModifyParams {
            order_type: Some(OrderType::Market),
            ..ModifyParams::default()
        };
        let id = client_for(&server)
            .modify_order(Variety::Regular, &OrderId::new("42"), &params)
            .await
            .unwrap();
        assert_eq!(id.as_str(), "42");
    }

    #[tokio::test]
    async fn token_exception_maps_to_authentication() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/orders/regular/42"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "status": "error",
                "message": "Incorrect `api_key` or `access_token`.",
                "error_type": "TokenException"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .cancel_order(Variety::Regular, &OrderId::new("42"))
            .await
            .unwrap_err();
        assert!(matches!(err, KiteError::Authentication(_)));
    }

    #[tokio::test]
    async fn order_exception_keeps_status_and_class() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/orders/regular/42"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "status": "error",
                "message": "Order cannot be cancelled as it is being processed.",
                "error_type": "OrderException"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .cancel_order(Variety::Regular, &OrderId::new("42"))
            .await
            .unwrap_err();
        assert!(matches!(err, KiteError::Api { status_code: 400, .. }));
    }

    #[tokio::test]
    async fn ltp_queries_each_instrument() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote/ltp"))
            .and(query_param("i", "NSE:NIFTY 50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {
                    "NSE:NIFTY 50": {"instrument_token": 256265, "last_price": 19512.35},
                    "NFO:NIFTY23OCT19500CE": {"instrument_token": 1, "last_price": 52.3}
                }
            })))
            .mount(&server)
            .await;

        let prices = client_for(&server)
            .ltp(&["NSE:NIFTY 50".to_string(), "NFO:NIFTY23OCT19500CE".to_string()])
            .await
            .unwrap();
        assert_eq!(prices["NSE:NIFTY 50"], dec!(19512.35));
        assert_eq!(prices["NFO:NIFTY23OCT19500CE"], dec!(52.3));
    }

    #[tokio::test]
    async fn ltp_skips_unrepresentable_prices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote/ltp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {
                    "NFO:NIFTY23OCT19500CE": {"last_price": 52.3},
                    "NFO:NIFTY23OCT19500PE": {"last_price": 1e30}
                }
            })))
            .mount(&server)
            .await;

        let prices = client_for(&server)
            .ltp(&[
                "NFO:NIFTY23OCT19500CE".to_string(),
                "NFO:NIFTY23OCT19500PE".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices["NFO:NIFTY23OCT19500CE"], dec!(52.3));
        assert!(!prices.contains_key("NFO:NIFTY23OCT19500PE"));
    }

    #[tokio::test]
    async fn generate_session_stores_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/token"))
            .and(body_string_contains("request_token=req"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"access_token": "fresh", "user_id": "AB1234"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orders/7"))
            .and(header("Authorization", "token key:fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = KiteConfig {
            base_url: server.uri(),
            ..KiteConfig::default()
        };
        let client = KiteClient::new(&config, KiteCredentials::new("key", "secret")).unwrap();
        let session = client.generate_session("req").await.unwrap();
        assert_eq!(session.access_token, "fresh");

        let history = client.order_history(&OrderId::new("7")).await.unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn rejects_path_traversal_ids() {
        assert!(KiteClient::validate_identifier("../orders").is_err());
        assert!(KiteClient::validate_identifier("").is_err());
        assert!(KiteClient::validate_identifier("231019000000001").is_ok());
    }
}
