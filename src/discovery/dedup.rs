//! Bounded recency cache of processed transaction signatures

use std::collections::{HashSet, VecDeque};

/// FIFO set: once full, the oldest signature is evicted on insert
#[derive(Debug)]
pub struct RecentSignatures {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentSignatures {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record a signature. Returns false if it was already present.
    pub fn insert(&mut self, signature: &str) -> bool {
        if self.seen.contains(signature) {
            return false;
        }

        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }

        self.order.push_back(signature.to_string());
        self.seen.insert(signature.to_string());
        true
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.seen.contains(signature)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
