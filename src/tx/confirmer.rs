//! Approval submission for a single approver

use super::retry::{PollOutcome, RetryRunner};
use crate::chain::{OrderLedger, OrderState, SafeCoordinator, SafeTransaction};
use crate::error::{ApprovalError, ApprovalResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Whether a submitted approval was observed on the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Confirmed,
    /// Submitted, but not yet visible after the confirmation window
    Unconfirmed,
}

/// Adds this owner's signature to Safe transactions via the coordinator
pub struct SafeConfirmer {
    coordinator: Arc<dyn SafeCoordinator>,
    wallet: LocalWallet,
    retry: RetryRunner,
}

impl SafeConfirmer {
    pub fn new(coordinator: Arc<dyn SafeCoordinator>, wallet: LocalWallet, retry: RetryRunner) -> Self {
        Self {
            coordinator,
            wallet,
            retry,
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub async fn confirm(&self, tx: &SafeTransaction) -> ApprovalResult<()> {
        if tx.is_executed {
            return Err(ApprovalError::AlreadyExecuted {
                item: format!("{:?}", tx.safe_tx_hash),
            });
        }
        if tx.is_confirmed_by(self.address()) {
            debug!("{:?} already carries our signature", tx.safe_tx_hash);
            return Ok(());
        }

        let signature = self.wallet.sign_hash(tx.safe_tx_hash)?;
        let signature = Bytes::from(signature.to_vec());

        self.retry
            .run("confirm transaction", || {
                self.coordinator.confirm(tx.safe_tx_hash, &signature)
            })
            .await?;

        crate::metrics::record_approval("safe");
        info!("Transaction confirmed: {:?}", tx.safe_tx_hash);
        Ok(())
    }
}

/// Approves orders on behalf of one signer wallet
pub struct OrderConfirmer {
    ledger: Arc<dyn OrderLedger>,
    signer: String,
    retry: RetryRunner,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl OrderConfirmer {
    pub fn new(ledger: Arc<dyn OrderLedger>, signer: String, retry: RetryRunner) -> Self {
        Self {
            ledger,
            signer,
            retry,
            poll_attempts: 10,
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn signer(&self) -> &str {
        &self.signer
    }

    /// Send an approval for `order` and wait for the approval bit to flip
    pub async fn approve(&self, order: &OrderState) -> ApprovalResult<ApprovalStatus> {
        let index = order
            .signer_index(&self.signer)
            .ok_or_else(|| ApprovalError::NotAnAuthorizedSigner {
                signer: self.signer.clone(),
                item: format!("order {}", order.seqno),
            })?;

        if order.executed {
            return Err(ApprovalError::AlreadyExecuted {
                item: format!("order {}", order.seqno),
            });
        }
        if order.is_approved_by_index(index) {
            return Ok(ApprovalStatus::Confirmed);
        }

        info!("Approving order {} as signer #{}", order.seqno, index);
        self.retry
            .run("approve order", || {
                self.ledger.approve(&order.address, &self.signer, index)
            })
            .await?;
        crate::metrics::record_approval("order");

        let outcome = self
            .retry
            .poll_until(
                "approval confirmation",
                self.poll_attempts,
                self.poll_interval,
                || self.ledger.order_data(&order.address),
                |state| state.executed || state.is_approved_by_index(index),
            )
            .await?;

        match outcome {
            PollOutcome::Satisfied(_) => {
                info!("Approval for order {} landed", order.seqno);
                Ok(ApprovalStatus::Confirmed)
            }
            PollOutcome::TimedOut(_) => {
                warn!("Approval for order {} not yet visible", order.seqno);
                Ok(ApprovalStatus::Unconfirmed)
            }
        }
    }
}
