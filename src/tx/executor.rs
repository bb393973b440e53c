//! Safe execution once the signature threshold is met

use super::retry::RetryRunner;
use crate::chain::{SafeChain, SafeCoordinator, SafeTransaction};
use crate::error::{ApprovalError, ApprovalResult};

use ethers::types::H256;
use std::sync::Arc;
use tracing::info;

/// Submits `execTransaction` for fully-signed Safe transactions
pub struct SafeExecutor {
    coordinator: Arc<dyn SafeCoordinator>,
    chain: Arc<dyn SafeChain>,
    retry: RetryRunner,
}

impl SafeExecutor {
    pub fn new(
        coordinator: Arc<dyn SafeCoordinator>,
        chain: Arc<dyn SafeChain>,
        retry: RetryRunner,
    ) -> Self {
        Self {
            coordinator,
            chain,
            retry,
        }
    }

    /// Fetch the latest coordinator view of `safe_tx_hash` and execute it
    pub async fn execute(&self, safe_tx_hash: H256) -> ApprovalResult<H256> {
        let tx = self
            .retry
            .run("transaction details", || self.coordinator.transaction(safe_tx_hash))
            .await?;
        self.execute_transaction(&tx).await
    }

    /// Execute an already-fetched transaction.
    ///
    /// The chain call is made once: a failed submission is picked up again
    /// by the next tick instead of being resent here.
    pub async fn execute_transaction(&self, tx: &SafeTransaction) -> ApprovalResult<H256> {
        if tx.is_executed {
            return Err(ApprovalError::AlreadyExecuted {
                item: format!("{:?}", tx.safe_tx_hash),
            });
        }
        if !tx.is_ready() {
            return Err(ApprovalError::InsufficientApprovals {
                current: tx.confirmation_count(),
                required: tx.confirmations_required,
            });
        }

        let signatures = tx.packed_signatures()?;
        let exec_hash = self.chain.execute(tx, signatures).await?;

        crate::metrics::record_execution("safe");
        info!(
            "Transaction executed: {:?} in {:?}",
            tx.safe_tx_hash, exec_hash
        );
        Ok(exec_hash)
    }
}
