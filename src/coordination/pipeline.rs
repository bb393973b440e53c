//! Per-backend, per-role processing of pending items
//!
//! A pipeline knows how to list the items its role cares about and how to
//! drive one item a step forward. Scheduling, deduplication and error
//! accounting live in [`Scheduler`](super::Scheduler).

use super::validator::Validator;
use crate::chain::{ItemId, OrderLister, PendingItem, SafeCoordinator};
use crate::error::{ApprovalError, ApprovalResult};
use crate::tx::{ApprovalStatus, OrderConfirmer, RetryRunner, SafeConfirmer, SafeExecutor};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of processing one item for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// This approver's approval was submitted
    Approved,
    /// The item was executed by this process
    Executed,
    /// Nothing to do until more approvals arrive
    Waiting,
    /// Nothing to do for this approver right now
    Skipped,
    /// The validator declined; retried next tick
    Rejected,
    /// Terminal for this approver; never processed again
    Retired,
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Approved => "approved",
            ProcessOutcome::Executed => "executed",
            ProcessOutcome::Waiting => "waiting",
            ProcessOutcome::Skipped => "skipped",
            ProcessOutcome::Rejected => "rejected",
            ProcessOutcome::Retired => "retired",
        }
    }

    /// Whether the scheduler can forget about the item
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessOutcome::Approved | ProcessOutcome::Executed | ProcessOutcome::Retired
        )
    }
}

#[async_trait]
pub trait ApprovalPipeline: Send + Sync + 'static {
    /// Short name used in logs and metric labels
    fn name(&self) -> &'static str;

    async fn list_pending(&self) -> ApprovalResult<Vec<PendingItem>>;

    async fn process(&self, item: PendingItem) -> ApprovalResult<ProcessOutcome>;
}

async fn ensure_valid(validator: &dyn Validator, item: &PendingItem) -> ApprovalResult<()> {
    if validator.validate(item).await? {
        Ok(())
    } else {
        Err(ApprovalError::ValidationRejected {
            item: item.id().to_string(),
        })
    }
}

fn unexpected(pipeline: &str, item: &PendingItem) -> ApprovalError {
    ApprovalError::Internal(format!("{} cannot process {}", pipeline, item.id()))
}

/// Signer role on the Safe backend: validate, then add our signature
pub struct SafeSignerPipeline {
    coordinator: Arc<dyn SafeCoordinator>,
    confirmer: SafeConfirmer,
    validator: Arc<dyn Validator>,
    retry: RetryRunner,
}

impl SafeSignerPipeline {
    pub fn new(
        coordinator: Arc<dyn SafeCoordinator>,
        confirmer: SafeConfirmer,
        validator: Arc<dyn Validator>,
        retry: RetryRunner,
    ) -> Self {
        Self {
            coordinator,
            confirmer,
            validator,
            retry,
        }
    }
}

#[async_trait]
impl ApprovalPipeline for SafeSignerPipeline {
    fn name(&self) -> &'static str {
        "safe_signer"
    }

    async fn list_pending(&self) -> ApprovalResult<Vec<PendingItem>> {
        let txs = self
            .retry
            .run("pending transactions", || self.coordinator.pending_transactions())
            .await?;
        Ok(txs.into_iter().map(PendingItem::Safe).collect())
    }

    async fn process(&self, item: PendingItem) -> ApprovalResult<ProcessOutcome> {
        let tx = match &item {
            PendingItem::Safe(tx) => tx,
            other => return Err(unexpected(self.name(), other)),
        };
        if tx.is_executed {
            return Ok(ProcessOutcome::Retired);
        }
        if tx.is_confirmed_by(self.confirmer.address()) {
            debug!("Already signed {:?}", tx.safe_tx_hash);
            return Ok(ProcessOutcome::Skipped);
        }

        ensure_valid(self.validator.as_ref(), &item).await?;

        // Validation may take a while; act on the latest state
        let latest = self
            .retry
            .run("transaction details", || self.coordinator.transaction(tx.safe_tx_hash))
            .await?;
        if latest.is_executed {
            return Ok(ProcessOutcome::Retired);
        }
        if latest.is_confirmed_by(self.confirmer.address()) {
            return Ok(ProcessOutcome::Skipped);
        }

        self.confirmer.confirm(&latest).await?;
        Ok(ProcessOutcome::Approved)
    }
}

/// Controller role on the Safe backend: execute once the threshold is met
pub struct SafeExecutorPipeline {
    coordinator: Arc<dyn SafeCoordinator>,
    executor: SafeExecutor,
    retry: RetryRunner,
}

impl SafeExecutorPipeline {
    pub fn new(
        coordinator: Arc<dyn SafeCoordinator>,
        executor: SafeExecutor,
        retry: RetryRunner,
    ) -> Self {
        Self {
            coordinator,
            executor,
            retry,
        }
    }
}

#[async_trait]
impl ApprovalPipeline for SafeExecutorPipeline {
    fn name(&self) -> &'static str {
        "safe_executor"
    }

    async fn list_pending(&self) -> ApprovalResult<Vec<PendingItem>> {
        let txs = self
            .retry
            .run("pending transactions", || self.coordinator.pending_transactions())
            .await?;
        Ok(txs.into_iter().map(PendingItem::Safe).collect())
    }

    async fn process(&self, item: PendingItem) -> ApprovalResult<ProcessOutcome> {
        let hash = match &item {
            PendingItem::Safe(tx) => tx.safe_tx_hash,
            other => return Err(unexpected(self.name(), other)),
        };

        match self.executor.execute(hash).await {
            Ok(_) => Ok(ProcessOutcome::Executed),
            Err(ApprovalError::InsufficientApprovals { current, required }) => {
                debug!("{:?} has {}/{} confirmations", hash, current, required);
                Ok(ProcessOutcome::Waiting)
            }
            Err(ApprovalError::AlreadyExecuted { .. }) => Ok(ProcessOutcome::Retired),
            Err(e) => Err(e),
        }
    }
}

/// Signer role on the order backend: validate, then approve on-chain
pub struct OrderSignerPipeline {
    lister: OrderLister,
    confirmer: OrderConfirmer,
    validator: Arc<dyn Validator>,
}

impl OrderSignerPipeline {
    pub fn new(lister: OrderLister, confirmer: OrderConfirmer, validator: Arc<dyn Validator>) -> Self {
        Self {
            lister,
            confirmer,
            validator,
        }
    }

    fn resolve(&self, id: ItemId) {
        if let ItemId::Order(seqno) = id {
            self.lister.cache().mark_resolved(seqno);
        }
    }
}

#[async_trait]
impl ApprovalPipeline for OrderSignerPipeline {
    fn name(&self) -> &'static str {
        "order_signer"
    }

    async fn list_pending(&self) -> ApprovalResult<Vec<PendingItem>> {
        let pass = self.lister.list_pending().await?;
        if !pass.failed.is_empty() {
            debug!("{} orders will be rechecked", pass.failed.len());
        }
        Ok(pass.pending.into_iter().map(PendingItem::Order).collect())
    }

    async fn process(&self, item: PendingItem) -> ApprovalResult<ProcessOutcome> {
        let order = match &item {
            PendingItem::Order(order) => order,
            other => return Err(unexpected(self.name(), other)),
        };

        ensure_valid(self.validator.as_ref(), &item).await?;

        // Other approvers may have executed the order during review
        let latest = self.lister.refresh(order).await?;
        if latest.executed {
            debug!("Order {} executed during review", order.seqno);
            self.resolve(item.id());
            return Ok(ProcessOutcome::Retired);
        }
        if latest.is_approved_by(self.confirmer.signer()) {
            self.resolve(item.id());
            return Ok(ProcessOutcome::Skipped);
        }

        match self.confirmer.approve(&latest).await {
            Ok(ApprovalStatus::Confirmed) => {
                info!("Order {} approved by {}", order.seqno, self.confirmer.signer());
                self.resolve(item.id());
                Ok(ProcessOutcome::Approved)
            }
            Ok(ApprovalStatus::Unconfirmed) => Ok(ProcessOutcome::Waiting),
            Err(e) if e.retires_item() => {
                self.resolve(item.id());
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
