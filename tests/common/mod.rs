//! Test Utilities for the DGC Test Suite
//!
//! Shared fixture and helpers. Assertions here are strict: a violated
//! invariant is a collector bug, never a tolerance.

#![allow(dead_code)]

use dgc::{GcConfig, HeaderObjectModel, HeapRegion, RegionalHeap};
use std::sync::Arc;

/// Default heap size for tests (16MB).
pub const DEFAULT_HEAP_SIZE: usize = 16 * 1024 * 1024;

pub const MB: usize = 1024 * 1024;

/// Word alignment every heap address must satisfy.
pub const WORD: usize = 8;

pub struct HeapFixture {
    pub heap: Arc<RegionalHeap>,
    pub config: GcConfig,
}

impl HeapFixture {
    pub fn with_defaults() -> Self {
        Self::with_heap_size(DEFAULT_HEAP_SIZE)
    }

    pub fn with_heap_size(heap_size: usize) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = GcConfig {
            min_heap_size: MB.min(heap_size),
            max_heap_size: heap_size,
            verbose: false,
            ..Default::default()
        };
        let heap = Arc::new(
            RegionalHeap::new(&config).expect("heap setup should succeed with a valid config"),
        );
        Self { heap, config }
    }

    /// Allocate an object in `region`, write its self-describing layout,
    /// and optionally mark it live.
    pub fn new_object(
        &self,
        region: &Arc<HeapRegion>,
        size: usize,
        refs: &[usize],
        live: bool,
    ) -> usize {
        let (obj, actual) = region
            .allocate(size, size)
            .expect("test object should fit the region");
        assert_eq!(actual, size);
        unsafe { HeaderObjectModel::write_object(obj, size, refs) };
        if live {
            self.heap.mark_bitmap().mark(obj);
            region.add_to_marked_bytes(size);
        }
        obj
    }

    /// Close a marking cycle so prev-TAMS and prev-marked-bytes describe
    /// the objects written so far.
    pub fn finish_marking(&self) {
        for region in self.heap.regions() {
            let marked = region.next_marked_bytes();
            region.note_start_of_marking();
            region.add_to_marked_bytes(marked);
            region.note_end_of_marking();
        }
    }
}

/// Assert that `ranges` are pairwise disjoint and exactly tile
/// `[start, end)` with no gap and no overlap.
///
/// **Bug this finds:** two allocators handed the same bytes, or bytes
/// leaked between neighboring allocations.
pub fn assert_ranges_tile_exactly(ranges: &mut Vec<(usize, usize)>, start: usize, end: usize) {
    ranges.sort_by_key(|&(s, _)| s);
    let mut cursor = start;
    for &(s, len) in ranges.iter() {
        assert_eq!(
            s, cursor,
            "gap or overlap at {:#x}: next range starts at {:#x}",
            cursor, s
        );
        cursor = s + len;
    }
    assert_eq!(
        cursor, end,
        "ranges stop at {:#x} but the allocated extent ends at {:#x}",
        cursor, end
    );
}
