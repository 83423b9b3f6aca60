use std::collections::{HashSet, VecDeque};

/// Drops repeated inbound messages keyed by `(from, timestamp)`.
///
/// Bounded: once `capacity` keys are remembered the oldest is forgotten.
#[derive(Debug)]
pub struct DedupFilter {
    capacity: usize,
    order: VecDeque<(String, i64)>,
    seen: HashSet<(String, i64)>,
}

impl DedupFilter {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Returns `true` the first time a key is seen, `false` for repeats.
    pub fn admit(&mut self, from: &str, timestamp: i64) -> bool {
        let key = (from.to_string(), timestamp);
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for DedupFilter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
