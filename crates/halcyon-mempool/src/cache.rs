use std::collections::{HashSet, VecDeque};

use halcyon_core::Hash;

/// Bounded set of recently seen transaction hashes. Once full, the oldest
/// entry is forgotten first.
#[derive(Debug)]
pub struct TxCache {
    capacity: usize,
    set: HashSet<Hash>,
    order: VecDeque<Hash>,
}

impl TxCache {
    pub fn new(capacity: usize) -> Self {
        TxCache {
            capacity,
            set: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns false if the hash was already cached.
    pub fn push(&mut self, hash: Hash) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if !self.set.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }

    pub fn remove(&mut self, hash: &Hash) {
        if self.set.remove(hash) {
            self.order.retain(|h| h != hash);
        }
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.set.contains(hash)
    }

    pub fn reset(&mut self) {
        self.set.clear();
        self.order.clear();
    }
}
