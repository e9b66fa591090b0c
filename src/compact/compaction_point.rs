//! Compaction Point - Per-Worker Destination Cursor
//!
//! Each worker compacts its claimed regions into themselves, bottom-up.
//! The compaction point tracks the next destination address, switching
//! to the next claimed region when the current one fills. Live data in a
//! worker's claim always fits back into the same regions, so running out
//! of destination space is a bug.

use std::sync::Arc;

use crate::heap::HeapRegion;

pub struct CompactionPoint {
    /// Destination regions in claim order.
    regions: Vec<Arc<HeapRegion>>,
    /// Index of the region currently being filled.
    current: usize,
}

impl CompactionPoint {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            current: 0,
        }
    }

    /// Add a claimed region as a destination. Its cursor starts at
    /// bottom so dead space is squeezed out.
    pub fn add_region(&mut self, region: Arc<HeapRegion>) {
        region.set_compaction_top(region.bottom());
        self.regions.push(region);
    }

    pub fn regions(&self) -> &[Arc<HeapRegion>] {
        &self.regions
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Reserve `size` bytes at the compaction point and return the
    /// destination address for an object of that size.
    pub fn forward(&mut self, size: usize) -> usize {
        loop {
            crate::guarantee!(
                self.current < self.regions.len(),
                "compaction point overflow: {} bytes do not fit the claimed regions",
                size
            );
            let region = &self.regions[self.current];
            let dest = region.compaction_top();
            if dest + size <= region.end() {
                region.set_compaction_top(dest + size);
                return dest;
            }
            self.current += 1;
        }
    }
}

impl Default for CompactionPoint {
    fn default() -> Self {
        Self::new()
    }
}
