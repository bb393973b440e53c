//! JSON gateway client for the order-based multisig
//!
//! The gateway owns cell encoding and wallet keys for the order backend; this
//! client only speaks its JSON surface, authenticated with the API key.

use super::order::{MultisigData, NewOrder, OrderLedger, OrderState};
use crate::config::OrderConfig;
use crate::error::{ApprovalError, ApprovalResult};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct AddressResponse {
    address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApproveRequest<'a> {
    signer: &'a str,
    signer_index: usize,
}

pub struct GatewayOrderLedger {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GatewayOrderLedger {
    pub fn new(config: &OrderConfig) -> ApprovalResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApprovalError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn dispatch(&self, request: RequestBuilder) -> ApprovalResult<Response> {
        let response = request.header("X-API-Key", &self.api_key).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApprovalError::Coordinator {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApprovalResult<T> {
        Ok(self.dispatch(request).await?.json().await?)
    }

    /// Calls whose response body, if any, carries nothing we use
    async fn send_empty(&self, request: RequestBuilder) -> ApprovalResult<()> {
        self.dispatch(request).await?;
        Ok(())
    }
}

#[async_trait]
impl OrderLedger for GatewayOrderLedger {
    async fn multisig_data(&self, multisig: &str) -> ApprovalResult<MultisigData> {
        let url = format!("{}/multisig/{}", self.base_url, multisig);
        debug!("GET {}", url);
        self.send(self.client.get(url)).await
    }

    async fn order_address(&self, multisig: &str, seqno: u64) -> ApprovalResult<String> {
        let url = format!("{}/multisig/{}/orders/{}/address", self.base_url, multisig, seqno);
        let response: AddressResponse = self.send(self.client.get(url)).await?;
        Ok(response.address)
    }

    async fn order_data(&self, order: &str) -> ApprovalResult<OrderState> {
        let url = format!("{}/orders/{}", self.base_url, order);
        debug!("GET {}", url);
        let mut state: OrderState = self.send(self.client.get(url)).await?;
        if state.address.is_empty() {
            state.address = order.to_string();
        }
        Ok(state)
    }

    async fn send_new_order(&self, multisig: &str, order: &NewOrder) -> ApprovalResult<()> {
        let url = format!("{}/multisig/{}/orders", self.base_url, multisig);
        debug!("POST {} seqno={}", url, order.seqno);
        self.send_empty(self.client.post(url).json(order)).await
    }

    async fn approve(&self, order: &str, signer: &str, signer_index: usize) -> ApprovalResult<()> {
        let url = format!("{}/orders/{}/approvals", self.base_url, order);
        debug!("POST {} index={}", url, signer_index);
        self.send_empty(self.client.post(url).json(&ApproveRequest {
            signer,
            signer_index,
        }))
        .await
    }
}
