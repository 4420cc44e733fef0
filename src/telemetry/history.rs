//! Bounded arrival-ordered history of published records.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::protocol::types::TelemetryRecord;

/// Fixed-capacity FIFO; the oldest record is evicted on overflow
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<Arc<TelemetryRecord>>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Create an empty buffer holding at most `capacity` records
    ///
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, returning the evicted one if the buffer was full
    pub fn push(&mut self, record: Arc<TelemetryRecord>) -> Option<Arc<TelemetryRecord>> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(record);
        evicted
    }

    /// The `n` most recent records, oldest first
    pub fn tail(&self, n: usize) -> Vec<Arc<TelemetryRecord>> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn last(&self) -> Option<&Arc<TelemetryRecord>> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TelemetryRecord>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
