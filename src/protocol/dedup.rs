//! Idempotency cache for command ids.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Set of ids that forgets each entry `ttl` after it was inserted.
///
/// Expired entries still count as present until [`ExpiringSet::prune`] runs.
#[derive(Debug)]
pub struct ExpiringSet {
    ttl: Duration,
    entries: HashMap<String, Instant>,
}

impl ExpiringSet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Returns false if the id was already present.
    pub fn insert(&mut self, id: &str, now: Instant) -> bool {
        if self.entries.contains_key(id) {
            return false;
        }
        self.entries.insert(id.to_string(), now + self.ttl);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Drop expired ids, returning how many were removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires| *expires > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
