//! Per-channel result queue and alignment scan

use std::collections::VecDeque;
use tracing::trace;

use crate::types::AlgorithmResult;

/// Default alignment window in microseconds.
pub const DEFAULT_WINDOW_US: u64 = 100_000;

/// Default queue length above which stale results are swept.
pub const DEFAULT_PRUNE_THRESHOLD: usize = 30;

/// Algorithm results for one channel, in arrival order.
///
/// Arrival order usually follows timestamp order but is not required to. Each call to
/// [`align`](Self::align) emits at most one result and removes it, so no result is ever
/// emitted twice.
#[derive(Debug, Clone)]
pub struct ResultQueue {
    entries: VecDeque<AlgorithmResult>,
    window: u64,
    prune_threshold: usize,
}

impl Default for ResultQueue {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_US, DEFAULT_PRUNE_THRESHOLD)
    }
}

impl ResultQueue {
    /// Create an empty queue with the given window (µs) and sweep threshold.
    pub fn new(window: u64, prune_threshold: usize) -> Self {
        Self { entries: VecDeque::new(), window, prune_threshold }
    }

    /// Append a result in arrival order.
    pub fn push(&mut self, result: AlgorithmResult) {
        self.entries.push_back(result);
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

    /// Queued results in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &AlgorithmResult> {
        self.entries.iter()
    }

    /// Select, remove and return the result matching `target`, then sweep stale entries.
    ///
    /// Scanning in arrival order:
    /// 1. an entry whose timestamp equals `target` is selected immediately;
    /// 2. at the first entry later than `target`, the closer of it and its predecessor is
    ///    selected when within the window (ties go to the predecessor). With no predecessor
    ///    the entry itself must be within the window;
    /// 3. when every entry is earlier than `target`, the newest arrival is selected
    ///    regardless of distance, so lagging results still surface.
    ///
    /// Once the queue holds more than the prune threshold, every entry more than one
    /// window older than `target` is dropped.
    pub fn align(&mut self, target: u64) -> Option<AlgorithmResult> {
        let selected = self.select(target).and_then(|index| self.entries.remove(index));

        if self.entries.len() > self.prune_threshold {
            self.prune(target);
        }

        selected
    }

    fn select(&self, target: u64) -> Option<usize> {
        let mut previous: Option<u64> = None;

        for (index, entry) in self.entries.iter().enumerate() {
            let timestamp = entry.timestamp;
            if timestamp == target {
                return Some(index);
            }

            if timestamp > target {
                let distance = timestamp - target;
                return match previous {
                    None => (distance <= self.window).then_some(index),
                    Some(prev) => {
                        // predecessor is earlier than target: it did not stop the scan
                        let prev_distance = target - prev;
                        if distance < prev_distance {
                            (distance <= self.window).then_some(index)
                        } else {
                            (prev_distance <= self.window).then_some(index - 1)
                        }
                    }
                };
            }

            previous = Some(timestamp);
        }

        self.entries.len().checked_sub(1)
    }

    fn prune(&mut self, target: u64) {
        let before = self.entries.len();
        let window = self.window;
        self.entries.retain(|entry| target.saturating_sub(entry.timestamp) <= window);

        let evicted = before - self.entries.len();
        if evicted > 0 {
            trace!("Evicted {} stale results behind target {}", evicted, target);
        }
    }
}
