//! EVM provider for the Safe contract: nonce reads and `execTransaction` submission

use super::safe::{SafeChain, SafeTransaction};
use crate::config::SafeConfig;
use crate::error::{ApprovalError, ApprovalResult};

use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::id;
use std::time::Duration;
use tracing::{debug, info, warn};

const EXEC_TRANSACTION_SIGNATURE: &str =
    "execTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes)";

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Safe contract access through a signing HTTP provider
pub struct EthersSafeChain {
    chain_id: u64,
    safe: Address,
    client: SignerClient,
}

impl EthersSafeChain {
    /// Create a provider that signs execution calls with `wallet`
    pub fn new(config: &SafeConfig, wallet: LocalWallet) -> ApprovalResult<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| ApprovalError::ConfigMissing(format!("invalid safe.rpc_url: {}", e)))?
            .interval(Duration::from_millis(500));

        let safe: Address = config
            .safe_address
            .parse()
            .map_err(|e| ApprovalError::ConfigMissing(format!("invalid safe.safe_address: {}", e)))?;

        let wallet = wallet.with_chain_id(config.chain_id);
        debug!(
            "Safe provider for chain {} signing as {:?}",
            config.chain_id,
            wallet.address()
        );

        Ok(Self {
            chain_id: config.chain_id,
            safe,
            client: SignerMiddleware::new(provider, wallet),
        })
    }
}

/// ABI-encode an `execTransaction` call for `tx` with packed `signatures`
pub fn encode_exec_transaction(tx: &SafeTransaction, signatures: Bytes) -> Bytes {
    let data = tx.tx_data();
    let mut calldata = id(EXEC_TRANSACTION_SIGNATURE).to_vec();
    calldata.extend(abi::encode(&[
        Token::Address(data.to),
        Token::Uint(data.value),
        Token::Bytes(data.data.to_vec()),
        Token::Uint(U256::from(u8::from(data.operation))),
        Token::Uint(data.safe_tx_gas),
        Token::Uint(data.base_gas),
        Token::Uint(data.gas_price),
        Token::Address(data.gas_token),
        Token::Address(data.refund_receiver),
        Token::Bytes(signatures.to_vec()),
    ]));
    Bytes::from(calldata)
}

fn chain_error(e: impl std::fmt::Display) -> ApprovalError {
    ApprovalError::Chain(e.to_string())
}

/// Decode the `uint256` returned by `nonce()`
fn decode_nonce(output: &[u8]) -> ApprovalResult<u64> {
    let tokens = abi::decode(&[ParamType::Uint(256)], output).map_err(chain_error)?;
    match tokens.first() {
        Some(Token::Uint(nonce)) => u64::try_from(*nonce).map_err(chain_error),
        _ => Err(ApprovalError::Chain("nonce() returned no value".to_string())),
    }
}

#[async_trait]
impl SafeChain for EthersSafeChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn safe_address(&self) -> Address {
        self.safe
    }

    async fn nonce(&self) -> ApprovalResult<u64> {
        let call: TypedTransaction = TransactionRequest::new()
            .to(self.safe)
            .data(id("nonce()").to_vec())
            .into();

        let output = self.client.call(&call, None).await.map_err(chain_error)?;
        decode_nonce(&output)
    }

    async fn execute(&self, tx: &SafeTransaction, signatures: Bytes) -> ApprovalResult<H256> {
        let request = TransactionRequest::new()
            .to(self.safe)
            .data(encode_exec_transaction(tx, signatures));

        let pending = self
            .client
            .send_transaction(request, None)
            .await
            .map_err(chain_error)?;
        let tx_hash = pending.tx_hash();
        info!(
            "execTransaction for {:?} sent on chain {}: {:?}",
            tx.safe_tx_hash, self.chain_id, tx_hash
        );

        match pending.confirmations(1).await.map_err(chain_error)? {
            Some(receipt) if receipt.status == Some(U64::from(1)) => {
                info!(
                    "Transaction {:?} confirmed at block {:?}",
                    tx_hash, receipt.block_number
                );
                Ok(tx_hash)
            }
            Some(_) => Err(ApprovalError::Chain(format!(
                "execTransaction {:?} reverted",
                tx_hash
            ))),
            None => {
                warn!("Receipt for {:?} not available, transaction dropped?", tx_hash);
                Err(ApprovalError::Chain(format!("transaction {:?} dropped", tx_hash)))
            }
        }
    }
}
