//! Fixed-capacity FIFO store of metric records.

use crate::constants::{MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
use crate::metric::Metric;
use std::collections::VecDeque;

/// Bounded buffer retaining the most recent metrics.
///
/// The capacity is clamped to `[MIN_BUFFER_SIZE, MAX_BUFFER_SIZE]` once, at
/// construction. When full, pushing evicts the oldest record first.
#[derive(Debug, Clone)]
pub struct MetricBuffer {
    data: VecDeque<Metric>,
    max_size: usize,
}

impl Default for MetricBuffer {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_BUFFER_SIZE)
    }
}

impl MetricBuffer {
    /// Create a buffer with the requested capacity, clamped to the allowed range.
    pub fn new(requested_size: usize) -> Self {
        let max_size = requested_size.max(MIN_BUFFER_SIZE).min(MAX_BUFFER_SIZE);
        Self {
            data: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Append a metric, evicting the oldest one if the buffer is full.
    ///
    /// Returns the evicted metric, if any.
    pub fn push(&mut self, metric: Metric) -> Option<Metric> {
        let evicted = if self.data.len() >= self.max_size {
            self.data.pop_front()
        } else {
            None
        };
        self.data.push_back(metric);
        evicted
    }

    /// Remove all metrics.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Copy of the current contents, oldest first.
    pub fn get_data(&self) -> Vec<Metric> {
        self.data.iter().cloned().collect()
    }

    /// Iterate over the current contents without copying.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.data.iter()
    }

    /// Number of metrics currently held.
    pub fn get_size(&self) -> usize {
        self.data.len()
    }

    /// Clamped capacity.
    pub fn get_max_size(&self) -> usize {
        self.max_size
    }

    /// Check if the buffer holds no metrics.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
