//! In-flight marker set: at most one processing task per item

use dashmap::DashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Tracks item identifiers currently being processed
pub struct ConcurrencyGuard<K: Eq + Hash> {
    in_flight: Arc<DashSet<K>>,
}

impl<K: Eq + Hash + Clone> ConcurrencyGuard<K> {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Mark `id` in flight. Returns `None` if another task holds it.
    ///
    /// Insertion is the acquisition, so two callers can never both succeed.
    pub fn try_acquire(&self, id: K) -> Option<GuardTicket<K>> {
        if self.in_flight.insert(id.clone()) {
            Some(GuardTicket {
                id,
                in_flight: self.in_flight.clone(),
            })
        } else {
            None
        }
    }

    pub fn is_held(&self, id: &K) -> bool {
        self.in_flight.contains(id)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl<K: Eq + Hash + Clone> Default for ConcurrencyGuard<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Held while an item is processed; releases the id when dropped
pub struct GuardTicket<K: Eq + Hash> {
    id: K,
    in_flight: Arc<DashSet<K>>,
}

impl<K: Eq + Hash> GuardTicket<K> {
    pub fn id(&self) -> &K {
        &self.id
    }
}

impl<K: Eq + Hash> Drop for GuardTicket<K> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

impl<K: Eq + Hash + fmt::Debug> fmt::Debug for GuardTicket<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardTicket").field("id", &self.id).finish()
    }
}
