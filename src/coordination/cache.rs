//! Resolved-index cache for backends that expose pending items by index scan
//!
//! Orders are addressed by a dense sequence number, so discovering pending
//! orders means walking `[0, next_order_seqno)`. Indices observed resolved
//! (executed, expired, already approved by us) are remembered here and
//! skipped on every later pass. Resolution is monotonic on the backend, so an
//! index never has to be rechecked once marked.

use dashmap::DashSet;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ResolvedIndexCache {
    resolved: DashSet<u64>,
}

impl ResolvedIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// False once `index` has been marked resolved
    pub fn should_check(&self, index: u64) -> bool {
        !self.resolved.contains(&index)
    }

    pub fn mark_resolved(&self, index: u64) {
        if self.resolved.insert(index) {
            debug!("Order {} marked resolved", index);
        }
    }

    /// Record the indices a listing pass observed as no longer pending
    pub fn record_pass(&self, resolved: &[u64]) {
        for index in resolved {
            self.mark_resolved(*index);
        }
    }

    /// Indices below `next_seqno` still worth fetching
    pub fn unresolved_below(&self, next_seqno: u64) -> Vec<u64> {
        (0..next_seqno).filter(|i| self.should_check(*i)).collect()
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}
