//! Collection-Set Chooser - Ranked Old-Region Candidates
//!
//! The chooser hands out old-region candidates one at a time, best
//! gc_efficiency first. Implementations must return candidates in
//! non-increasing efficiency order and accept unconsumed regions back.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::heap::HeapRegion;

/// Source of old-region candidates for collection-set finalization.
pub trait CsetChooser {
    /// The remaining candidate with the highest gc_efficiency, or `None`
    /// when exhausted. Exhaustion is expected, not an error.
    fn pop_best(&mut self) -> Option<Arc<HeapRegion>>;

    /// Return an unconsumed candidate for a later pause.
    fn push_back(&mut self, region: Arc<HeapRegion>);

    fn remaining(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

/// Chooser over a fixed candidate list, sorted once at construction.
/// Ties keep insertion order.
pub struct RankedChooser {
    queue: VecDeque<Arc<HeapRegion>>,
}

impl RankedChooser {
    pub fn new(mut candidates: Vec<Arc<HeapRegion>>) -> Self {
        candidates.sort_by(|a, b| {
            b.prediction()
                .gc_efficiency
                .partial_cmp(&a.prediction().gc_efficiency)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self {
            queue: candidates.into(),
        }
    }
}

impl CsetChooser for RankedChooser {
    fn pop_best(&mut self) -> Option<Arc<HeapRegion>> {
        self.queue.pop_front()
    }

    fn push_back(&mut self, region: Arc<HeapRegion>) {
        // A returned region was the best unconsumed one; it stays first.
        self.queue.push_front(region);
    }

    fn remaining(&self) -> usize {
        self.queue.len()
    }
}
