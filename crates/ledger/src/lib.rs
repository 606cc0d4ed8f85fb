use std::collections::{HashSet, VecDeque};

use tracing::trace;

pub const DEFAULT_CAPACITY: usize = 500;

/// Bounded set of offer ids already handled this session.
///
/// Eviction is strictly insertion-ordered: looking an id up does not refresh it.
#[derive(Debug, Clone)]
pub struct DedupLedger {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl Default for DedupLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            members: HashSet::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn has(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Records `id`. Returns false when it was already present.
    pub fn add(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.members.contains(&id) {
            return false;
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
                trace!(offer_id = %evicted, "ledger evicted oldest id");
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
