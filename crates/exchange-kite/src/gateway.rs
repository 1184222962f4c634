//! [`OrderGateway`] over the Kite REST client.

use crate::client::KiteClient;
use async_trait::async_trait;
use straddle_core::{
    BrokerError, ModifyParams, OrderGateway, OrderId, OrderParams, OrderRecord, Variety,
};

#[async_trait]
impl OrderGateway for KiteClient {
    async fn place_order(&self, params: &OrderParams) -> Result<OrderId, BrokerError> {
        Ok(KiteClient::place_order(self, params).await?)
    }

    async fn modify_order(
        &self,
        variety: Variety,
        order_id: &OrderId,
        params: &ModifyParams,
    ) -> Result<OrderId, BrokerError> {
        Ok(KiteClient::modify_order(self, variety, order_id, params).await?)
    }

    async fn cancel_order(&self, variety: Variety, order_id: &OrderId) -> Result<(), BrokerError> {
        Ok(KiteClient::cancel_order(self, variety, order_id).await?)
    }

    async fn order_history(&self, order_id: &OrderId) -> Result<Vec<OrderRecord>, BrokerError> {
        let history = KiteClient::order_history(self, order_id).await?;
        if history.is_empty() {
            return Err(BrokerError::order_not_found(order_id.as_str()));
        }
        Ok(history)
    }
}
