//! Host-side log of issued commands, used to answer resync requests.

use std::collections::VecDeque;

use super::messages::Command;

pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug)]
pub struct BroadcastLog {
    capacity: usize,
    entries: VecDeque<Command>,
}

impl BroadcastLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, command: Command) {
        self.entries.push_back(command);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Retained commands with `seq > last_applied`, oldest first.
    pub fn since(&self, last_applied: u64) -> Vec<Command> {
        self.entries
            .iter()
            .filter(|c| c.seq > last_applied)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Command> {
        self.entries.iter().cloned().collect()
    }

    pub fn first_seq(&self) -> Option<u64> {
        self.entries.front().map(|c| c.seq)
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

impl Default for BroadcastLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
