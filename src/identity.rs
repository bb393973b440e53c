//! Approver identity: which owner key this process signs with

use crate::config::Settings;
use crate::error::{ApprovalError, ApprovalResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use std::env;
use tracing::info;

/// Keys and addresses this instance acts as
#[derive(Debug, Clone)]
pub struct Identity {
    /// Position of this approver in the configured key list
    pub index: usize,
    /// Owner key for the Safe backend
    pub wallet: LocalWallet,
    /// Wallet address on the order-based backend
    pub order_address: Option<String>,
}

impl Identity {
    /// Resolve the approver key from the environment
    pub fn load(settings: &Settings) -> ApprovalResult<Self> {
        let keys_env = &settings.approver.keys_env;
        let raw = env::var(keys_env)
            .map_err(|_| ApprovalError::ConfigMissing(format!("{} is not set", keys_env)))?;
        Self::from_key_list(
            &raw,
            settings.approver.index,
            settings.approver.order_wallet_address.clone(),
        )
    }

    /// Build an identity from a comma-separated list of hex private keys
    pub fn from_key_list(
        raw: &str,
        index: usize,
        order_address: Option<String>,
    ) -> ApprovalResult<Self> {
        let keys: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .collect();

        let key = keys.get(index).ok_or_else(|| {
            ApprovalError::ConfigMissing(format!(
                "no private key at index {} ({} configured)",
                index,
                keys.len()
            ))
        })?;

        let wallet = key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| ApprovalError::ConfigMissing(format!("invalid private key {}: {}", index, e)))?;

        info!("Approver {} loaded with address {:?}", index, wallet.address());

        Ok(Self {
            index,
            wallet,
            order_address,
        })
    }

    /// Owner address on the Safe backend
    pub fn address(&self) -> Address {
        self.wallet.address()
    }
}
