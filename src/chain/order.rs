//! Order-based multisig model: every approval is an on-chain call
//!
//! Each proposal deploys an order object at an address derived from the
//! multisig and a dense sequence number. Signers approve by sending their
//! index to the order; the order executes itself once `threshold` approvals
//! are recorded.

use super::codec::{decimal_u256, flexible_u64, null_as_default};
use crate::error::ApprovalResult;

use async_trait::async_trait;
use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// Multisig wallet summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigData {
    #[serde(with = "flexible_u64")]
    pub next_order_seqno: u64,
    #[serde(with = "flexible_u64")]
    pub threshold: u64,
    pub signers: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub proposers: Vec<String>,
}

/// A single transfer carried by an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAction {
    pub to: String,
    #[serde(with = "decimal_u256")]
    pub value: U256,
}

/// On-chain state of one order object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderState {
    #[serde(default, with = "flexible_u64")]
    pub seqno: u64,
    #[serde(default)]
    pub address: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub signers: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub approvals: Vec<bool>,
    #[serde(default, with = "flexible_u64")]
    pub threshold: u64,
    #[serde(default)]
    pub executed: bool,
    /// False while the order address exists but its state is not yet populated
    #[serde(default, alias = "inited")]
    pub initialized: bool,
    #[serde(default, with = "flexible_u64")]
    pub expiration_date: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub actions: Vec<OrderAction>,
}

impl OrderState {
    pub fn approval_count(&self) -> usize {
        self.approvals.iter().filter(|a| **a).count()
    }

    /// Position of `signer` in the order's signer list
    pub fn signer_index(&self, signer: &str) -> Option<usize> {
        self.signers.iter().position(|s| s == signer)
    }

    pub fn is_approved_by_index(&self, index: usize) -> bool {
        self.approvals.get(index).copied().unwrap_or(false)
    }

    pub fn is_approved_by(&self, signer: &str) -> bool {
        self.signer_index(signer)
            .map(|i| self.is_approved_by_index(i))
            .unwrap_or(false)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration_date != 0 && now >= self.expiration_date
    }

    /// Whether `signer` still has work to do on this order
    pub fn is_pending_for(&self, signer: &str, now: u64) -> bool {
        self.initialized && !self.executed && !self.is_expired(now) && !self.is_approved_by(signer)
    }
}

/// New-order request sent from the proposer's wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub seqno: u64,
    pub actions: Vec<OrderAction>,
    /// Unix seconds after which the order can no longer be approved
    pub valid_until: u64,
}

/// Read and write access to the order-based multisig
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderLedger: Send + Sync {
    async fn multisig_data(&self, multisig: &str) -> ApprovalResult<MultisigData>;

    /// Deterministic address of the order with `seqno`
    async fn order_address(&self, multisig: &str, seqno: u64) -> ApprovalResult<String>;

    async fn order_data(&self, order: &str) -> ApprovalResult<OrderState>;

    async fn send_new_order(&self, multisig: &str, order: &NewOrder) -> ApprovalResult<()>;

    /// Send `signer`'s approval carrying its index in the order's signer list
    async fn approve(&self, order: &str, signer: &str, signer_index: usize) -> ApprovalResult<()>;
}
