//! Chain module - ledger backends and their pending-item models
//!
//! This module provides:
//! - The Safe backend (off-chain aggregation, one execution call)
//! - The order backend (on-chain approvals, self-executing orders)
//! - HTTP/RPC adapters for both
//! - Sequential pending-order discovery

pub mod codec;
pub mod gateway;
pub mod listener;
pub mod order;
pub mod provider;
pub mod safe;
pub mod safe_service;

pub use gateway::GatewayOrderLedger;
pub use listener::{ListingPass, OrderLister};
pub use order::{MultisigData, NewOrder, OrderAction, OrderLedger, OrderState};
pub use provider::EthersSafeChain;
pub use safe::{
    Operation, SafeChain, SafeCoordinator, SafeInfo, SafeProposal, SafeTransaction, SafeTxData,
};
pub use safe_service::SafeServiceClient;

use ethers::types::{H256, U256};
use serde::Serialize;
use std::fmt;

/// Identifier of a pending approval item, unique for the item's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "backend", content = "id", rename_all = "lowercase")]
pub enum ItemId {
    /// Content-derived safeTxHash
    Safe(H256),
    /// Order sequence number within the multisig
    Order(u64),
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Safe(hash) => write!(f, "safe:{:?}", hash),
            ItemId::Order(seqno) => write!(f, "order:{}", seqno),
        }
    }
}

/// A pending approval item from either backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingItem {
    Safe(SafeTransaction),
    Order(OrderState),
}

impl PendingItem {
    pub fn id(&self) -> ItemId {
        match self {
            PendingItem::Safe(tx) => ItemId::Safe(tx.safe_tx_hash),
            PendingItem::Order(order) => ItemId::Order(order.seqno),
        }
    }

    /// Whether the backend reports the item as executed
    pub fn is_executed(&self) -> bool {
        match self {
            PendingItem::Safe(tx) => tx.is_executed,
            PendingItem::Order(order) => order.executed,
        }
    }

    /// (destination, value) pairs the item would transfer
    pub fn transfers(&self) -> Vec<(String, U256)> {
        match self {
            PendingItem::Safe(tx) => vec![(format!("{:?}", tx.to), tx.value)],
            PendingItem::Order(order) => order
                .actions
                .iter()
                .map(|a| (a.to.clone(), a.value))
                .collect(),
        }
    }
}
