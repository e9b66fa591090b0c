//! Heap Management Module - Region-Based Memory Management
//!
//! The heap is one anonymous mapping reserved at setup, carved into
//! fixed-size regions. Region identity (index, bottom, end) never changes;
//! only the type state machine recycles them.
//!
//! Heap structure:
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   RegionalHeap                        │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌─────────┐  │
//! │  │ Region 0 │ │ Region 1 │ │ Region 2 │ │   ...   │  │
//! │  │ (Eden)   │ │ (Old)    │ │ (Free)   │ │         │  │
//! │  └──────────┘ └──────────┘ └──────────┘ └─────────┘  │
//! └──────────────────────────────────────────────────────┘
//!          shared BlockOffsetTable + MarkBitmap
//! ```

pub mod bot;
pub mod region;
pub mod remset;

pub use bot::{BlockOffsetTable, BlockOffsetTablePart};
pub use region::{HeapRegion, RegionPrediction, RegionType};
pub use remset::{CardRef, RememberedSet};

use std::sync::Arc;

use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::config::{GcConfig, HeapGeometry};
use crate::error::{GcError, Result};
use crate::marker::MarkBitmap;

/// The region array plus the shared metadata structures.
pub struct RegionalHeap {
    geometry: HeapGeometry,

    /// Backing memory for the whole heap. Regions are windows into it;
    /// keeping the map alive keeps every region address valid.
    _backing: MmapMut,

    base: usize,
    regions: Vec<Arc<HeapRegion>>,
    bot: Arc<BlockOffsetTable>,
    bitmap: Arc<MarkBitmap>,

    /// Free-region indices, most recently freed last.
    free_list: Mutex<Vec<u32>>,
}

impl RegionalHeap {
    /// Reserve the backing memory and build the region array.
    pub fn new(config: &GcConfig) -> Result<Self> {
        let geometry = HeapGeometry::compute(config)?;

        let backing = MmapMut::map_anon(geometry.heap_size)
            .map_err(|e| GcError::HeapInitialization(format!("backing mmap failed: {}", e)))?;
        let base = backing.as_ptr() as usize;

        let bot = Arc::new(BlockOffsetTable::new(base, geometry.heap_size));
        let bitmap = Arc::new(MarkBitmap::new(base, geometry.heap_size));

        let regions: Vec<Arc<HeapRegion>> = (0..geometry.region_count)
            .map(|i| {
                let bottom = base + i * geometry.region_size;
                Arc::new(HeapRegion::new(
                    i as u32,
                    bottom,
                    bottom + geometry.region_size,
                    Arc::clone(&bot),
                ))
            })
            .collect();

        let free_list = (0..geometry.region_count as u32).rev().collect();

        log::info!(
            "heap reserved: {} regions of {} bytes at {:#x}",
            geometry.region_count,
            geometry.region_size,
            base
        );

        Ok(Self {
            geometry,
            _backing: backing,
            base,
            regions,
            bot,
            bitmap,
            free_list: Mutex::new(free_list),
        })
    }

    pub fn geometry(&self) -> &HeapGeometry {
        &self.geometry
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn bot(&self) -> &Arc<BlockOffsetTable> {
        &self.bot
    }

    pub fn mark_bitmap(&self) -> &Arc<MarkBitmap> {
        &self.bitmap
    }

    pub fn region(&self, index: u32) -> &Arc<HeapRegion> {
        &self.regions[index as usize]
    }

    pub fn regions(&self) -> &[Arc<HeapRegion>] {
        &self.regions
    }

    pub fn is_in_reserved(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.base + self.geometry.heap_size
    }

    /// Region containing `addr`, or None outside the heap.
    pub fn region_containing(&self, addr: usize) -> Option<&Arc<HeapRegion>> {
        if !self.is_in_reserved(addr) {
            return None;
        }
        let index = self.geometry.region_index_for_offset(addr - self.base);
        Some(&self.regions[index])
    }

    /// Take a free region off the list and make it `rtype`.
    pub fn acquire_region(&self, rtype: RegionType) -> Option<Arc<HeapRegion>> {
        let index = self.free_list.lock().pop()?;
        let region = Arc::clone(&self.regions[index as usize]);
        debug_assert!(region.is_free() && region.is_empty());
        match rtype {
            RegionType::Eden => region.set_eden(),
            RegionType::Survivor => region.set_survivor(),
            RegionType::Old => region.set_old(),
            RegionType::OpenArchive => region.set_open_archive(),
            RegionType::ClosedArchive => region.set_closed_archive(),
            other => crate::fatal!("cannot acquire a region as {:?}", other),
        }
        Some(region)
    }

    /// Acquire a contiguous run of `count` free regions and set up a
    /// humongous series over them. `obj_size` is the object's byte size;
    /// the tail of the last region is recorded as filler.
    pub fn acquire_humongous(&self, count: usize, obj_size: usize) -> Option<Vec<Arc<HeapRegion>>> {
        debug_assert!(count >= 1);
        debug_assert!(obj_size <= count * self.geometry.region_size);
        debug_assert!(obj_size > (count - 1) * self.geometry.region_size);

        let mut free = self.free_list.lock();
        // Look for `count` consecutive indices among the free regions.
        let mut sorted: Vec<u32> = free.clone();
        sorted.sort_unstable();
        let mut run_start = 0;
        let mut found = None;
        for i in 0..sorted.len() {
            if i > 0 && sorted[i] != sorted[i - 1] + 1 {
                run_start = i;
            }
            if i - run_start + 1 == count {
                found = Some(sorted[run_start]);
                break;
            }
        }
        let first = found?;
        free.retain(|&idx| idx < first || idx >= first + count as u32);
        drop(free);

        let head = Arc::clone(&self.regions[first as usize]);
        let obj_end = head.bottom() + obj_size;
        let last = &self.regions[(first + count as u32 - 1) as usize];
        let fill_size = last.end() - obj_end;

        let head_obj_top = obj_end.min(head.end());
        let head_fill = if count == 1 { fill_size } else { 0 };
        head.set_starts_humongous(head_obj_top, head_fill);

        let mut series = vec![Arc::clone(&head)];
        for idx in first + 1..first + count as u32 {
            let region = Arc::clone(&self.regions[idx as usize]);
            region.set_continues_humongous(&head);
            series.push(region);
        }
        // Object plus filler cover the series end to end.
        for region in &series {
            region.set_top(region.end());
        }
        Some(series)
    }

    /// Return a region to the free list. The caller already ran
    /// `hr_clear`.
    pub fn release_region(&self, region: &HeapRegion) {
        debug_assert!(region.is_free() && region.is_empty());
        self.free_list.lock().push(region.index());
    }

    pub fn free_region_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Heap bytes in use across all non-free regions.
    pub fn used(&self) -> usize {
        self.regions
            .iter()
            .filter(|r| !r.is_free())
            .map(|r| r.used())
            .sum()
    }

    /// Visit every region, starting at a worker-specific offset so
    /// parallel claimers spread over the array instead of contending at
    /// the front.
    pub fn par_iterate_from_worker_offset(
        &self,
        worker_id: usize,
        total_workers: usize,
        mut f: impl FnMut(&Arc<HeapRegion>),
    ) {
        let count = self.regions.len();
        if count == 0 {
            return;
        }
        let start = count * worker_id / total_workers.max(1);
        for i in 0..count {
            f(&self.regions[(start + i) % count]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MB;

    fn small_heap() -> RegionalHeap {
        let config = GcConfig {
            min_heap_size: MB,
            max_heap_size: 8 * MB,
            ..Default::default()
        };
        RegionalHeap::new(&config).unwrap()
    }

    #[test]
    fn test_setup_and_lookup() {
        let heap = small_heap();
        assert_eq!(heap.region_count(), 8);

        let addr = heap.base() + 3 * heap.geometry().region_size + 1234;
        let region = heap.region_containing(addr).unwrap();
        assert_eq!(region.index(), 3);
        assert!(region.contains(addr));

        assert!(heap.region_containing(heap.base() - 1).is_none());
    }

    #[test]
    fn test_acquire_and_release() {
        let heap = small_heap();
        let before = heap.free_region_count();

        let eden = heap.acquire_region(RegionType::Eden).unwrap();
        assert!(eden.is_eden());
        assert_eq!(heap.free_region_count(), before - 1);

        eden.hr_clear(false, false, false);
        heap.release_region(&eden);
        assert_eq!(heap.free_region_count(), before);
    }

    #[test]
    fn test_acquire_humongous_series() {
        let heap = small_heap();
        let region_size = heap.geometry().region_size;

        // 2.5 regions worth of object.
        let obj_size = 2 * region_size + region_size / 2;
        let series = heap.acquire_humongous(3, obj_size).unwrap();
        assert_eq!(series.len(), 3);
        assert!(series[0].is_starts_humongous());
        assert!(series[1].is_continues_humongous());
        assert!(series[2].is_continues_humongous());
        assert_eq!(series[1].humongous_start_index(), Some(series[0].index()));

        // Consecutive regions.
        assert_eq!(series[1].index(), series[0].index() + 1);
        assert_eq!(series[2].index(), series[1].index() + 1);
        assert_eq!(heap.free_region_count(), 5);
    }

    #[test]
    fn test_used_accounting() {
        let heap = small_heap();
        let old = heap.acquire_region(RegionType::Old).unwrap();
        old.allocate(4096, 4096).unwrap();
        assert_eq!(heap.used(), 4096);
    }
}
