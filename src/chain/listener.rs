//! Sequential pending-order discovery
//!
//! The order backend has no "list pending" query. Orders live at addresses
//! derived from `(multisig, seqno)`, so discovery walks every sequence number
//! below `next_order_seqno`, skipping indices the cache already knows are
//! resolved.

use super::order::{OrderLedger, OrderState};
use crate::coordination::ResolvedIndexCache;
use crate::error::ApprovalResult;
use crate::tx::RetryRunner;

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// What one listing pass observed
#[derive(Debug, Default, Clone)]
pub struct ListingPass {
    /// Orders waiting on this signer's approval, in seqno order
    pub pending: Vec<OrderState>,
    /// Indices observed executed, expired, already approved or not ours
    pub resolved: Vec<u64>,
    /// Indices whose fetch failed; checked again next pass
    pub failed: Vec<u64>,
}

enum Observed {
    Pending(OrderState),
    Resolved,
    NotReady,
}

/// Lists pending orders of one multisig for one signer
pub struct OrderLister {
    ledger: Arc<dyn OrderLedger>,
    multisig: String,
    signer: String,
    cache: Arc<ResolvedIndexCache>,
    retry: RetryRunner,
}

impl OrderLister {
    pub fn new(
        ledger: Arc<dyn OrderLedger>,
        multisig: String,
        signer: String,
        cache: Arc<ResolvedIndexCache>,
        retry: RetryRunner,
    ) -> Self {
        Self {
            ledger,
            multisig,
            signer,
            cache,
            retry,
        }
    }

    pub fn signer(&self) -> &str {
        &self.signer
    }

    pub fn cache(&self) -> &Arc<ResolvedIndexCache> {
        &self.cache
    }

    /// Walk unresolved indices and record newly resolved ones in the cache
    pub async fn list_pending(&self) -> ApprovalResult<ListingPass> {
        let data = self
            .retry
            .run("multisig data", || self.ledger.multisig_data(&self.multisig))
            .await?;

        let indices = self.cache.unresolved_below(data.next_order_seqno);
        debug!(
            "Scanning {} of {} orders for {}",
            indices.len(),
            data.next_order_seqno,
            self.signer
        );

        let pass = self.walk(&self.multisig, &self.signer, indices).await;
        self.cache.record_pass(&pass.resolved);
        Ok(pass)
    }

    /// Re-read a previously listed order by its address
    pub async fn refresh(&self, order: &OrderState) -> ApprovalResult<OrderState> {
        let mut latest = self
            .retry
            .run("order data", || self.ledger.order_data(&order.address))
            .await?;
        latest.seqno = order.seqno;
        if latest.address.is_empty() {
            latest.address = order.address.clone();
        }
        Ok(latest)
    }

    /// Uncached scan of any multisig for any signer
    pub async fn scan(&self, multisig: &str, signer: &str) -> ApprovalResult<Vec<OrderState>> {
        let data = self
            .retry
            .run("multisig data", || self.ledger.multisig_data(multisig))
            .await?;
        let pass = self
            .walk(multisig, signer, (0..data.next_order_seqno).collect())
            .await;
        Ok(pass.pending)
    }

    async fn walk(&self, multisig: &str, signer: &str, indices: Vec<u64>) -> ListingPass {
        let now = Utc::now().timestamp().max(0) as u64;
        let mut pass = ListingPass::default();

        for seqno in indices {
            match self.observe(multisig, signer, seqno, now).await {
                Ok(Observed::Pending(order)) => pass.pending.push(order),
                Ok(Observed::Resolved) => pass.resolved.push(seqno),
                Ok(Observed::NotReady) => debug!("Order {} not initialized yet", seqno),
                Err(e) => {
                    warn!("Failed to fetch order {}: {}", seqno, e);
                    pass.failed.push(seqno);
                }
            }
        }
        pass
    }

    async fn observe(
        &self,
        multisig: &str,
        signer: &str,
        seqno: u64,
        now: u64,
    ) -> ApprovalResult<Observed> {
        let address = self
            .retry
            .run("order address", || self.ledger.order_address(multisig, seqno))
            .await?;
        let mut order = self
            .retry
            .run("order data", || self.ledger.order_data(&address))
            .await?;
        order.seqno = seqno;
        if order.address.is_empty() {
            order.address = address;
        }

        if !order.initialized {
            return Ok(Observed::NotReady);
        }
        if order.signer_index(signer).is_none() || !order.is_pending_for(signer, now) {
            return Ok(Observed::Resolved);
        }
        Ok(Observed::Pending(order))
    }
}
