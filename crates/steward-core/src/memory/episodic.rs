//! Bounded per-namespace episodic history.
//!
//! Each namespace owns a ring buffer; appending beyond capacity drops the
//! oldest entry. Entries are never edited or individually removed.

use std::collections::VecDeque;

use dashmap::DashMap;
use steward_types::memory::EpisodicEntry;

#[derive(Debug)]
pub struct EpisodicLog {
    capacity: usize,
    buffers: DashMap<String, VecDeque<EpisodicEntry>>,
}

impl EpisodicLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: DashMap::new(),
        }
    }

    /// Append an entry. Returns how many old entries were dropped.
    pub fn push(&self, namespace: &str, entry: EpisodicEntry) -> usize {
        let mut buffer = self.buffers.entry(namespace.to_string()).or_default();
        buffer.push_back(entry);

        let mut dropped = 0;
        while buffer.len() > self.capacity {
            buffer.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// The last `limit` entries, oldest first.
    pub fn recent(&self, namespace: &str, limit: usize) -> Vec<EpisodicEntry> {
        self.buffers
            .get(namespace)
            .map(|buffer| {
                let skip = buffer.len().saturating_sub(limit);
                buffer.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self, namespace: &str) -> usize {
        self.buffers.get(namespace).map_or(0, |buffer| buffer.len())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
