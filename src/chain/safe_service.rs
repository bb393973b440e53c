//! HTTP client for the Safe Transaction Service (the Safe backend's coordinator)

use super::safe::{SafeCoordinator, SafeInfo, SafeProposal, SafeTransaction};
use crate::config::SafeConfig;
use crate::error::{ApprovalError, ApprovalResult};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};
use ethers::utils::to_checksum;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Page<T> {
    results: Vec<T>,
}

#[derive(Debug, Serialize)]
struct ConfirmationRequest<'a> {
    signature: &'a Bytes,
}

/// Coordinator client bound to a single Safe
pub struct SafeServiceClient {
    client: Client,
    base_url: String,
    safe: String,
}

impl SafeServiceClient {
    pub fn new(config: &SafeConfig) -> ApprovalResult<Self> {
        let safe: Address = config
            .safe_address
            .parse()
            .map_err(|e| ApprovalError::ConfigMissing(format!("invalid safe.safe_address: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApprovalError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.service_url.trim_end_matches('/').to_string(),
            safe: to_checksum(&safe, None),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> ApprovalResult<T> {
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, url: String, body: &B) -> ApprovalResult<()> {
        debug!("POST {}", url);
        let response = self.client.post(&url).json(body).send().await?;
        check(response).await?;
        Ok(())
    }
}

/// Turn non-2xx responses into coordinator errors carrying the response body
async fn check(response: Response) -> ApprovalResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ApprovalError::Coordinator {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl SafeCoordinator for SafeServiceClient {
    async fn pending_transactions(&self) -> ApprovalResult<Vec<SafeTransaction>> {
        let info = self.safe_info().await?;
        let page: Page<SafeTransaction> = self
            .get_json(format!(
                "{}/api/v1/safes/{}/multisig-transactions/?executed=false&nonce__gte={}&ordering=nonce",
                self.base_url, self.safe, info.nonce
            ))
            .await?;
        Ok(page.results)
    }

    async fn transaction(&self, safe_tx_hash: H256) -> ApprovalResult<SafeTransaction> {
        self.get_json(format!(
            "{}/api/v1/multisig-transactions/{:?}/",
            self.base_url, safe_tx_hash
        ))
        .await
        .map_err(|e| match e {
            ApprovalError::Coordinator { status: 404, .. } => {
                ApprovalError::NotFound(format!("safe transaction {:?}", safe_tx_hash))
            }
            other => other,
        })
    }

    async fn propose(&self, proposal: &SafeProposal) -> ApprovalResult<()> {
        self.post_json(
            format!(
                "{}/api/v1/safes/{}/multisig-transactions/",
                self.base_url, self.safe
            ),
            proposal,
        )
        .await
    }

    async fn confirm(&self, safe_tx_hash: H256, signature: &Bytes) -> ApprovalResult<()> {
        self.post_json(
            format!(
                "{}/api/v1/multisig-transactions/{:?}/confirmations/",
                self.base_url, safe_tx_hash
            ),
            &ConfirmationRequest { signature },
        )
        .await
    }

    async fn safe_info(&self) -> ApprovalResult<SafeInfo> {
        self.get_json(format!("{}/api/v1/safes/{}/", self.base_url, self.safe))
            .await
    }
}
