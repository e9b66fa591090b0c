//! Heap Region - Unit of Heap Management
//!
//! A region is a fixed-size `[bottom, end)` window of the reserved heap
//! with a bump pointer `top`. Regions never change identity: index,
//! bottom and end are fixed at heap setup, and the region object is
//! recycled through its type state machine.
//!
//! Region types:
//! - Free: on the free list, empty
//! - Eden / Survivor: young regions, allocation without BOT updates
//! - Old: tenured allocation, BOT maintained
//! - StartsHumongous / ContinuesHumongous: one oversized object spanning
//!   a series of contiguous regions
//! - OpenArchive / ClosedArchive: pinned, never collected or compacted
//!
//! # Memory Ordering Model
//!
//! ## top (AtomicUsize)
//! - **Load:** `Ordering::Relaxed` - readers of `top` during a pause are
//!   separated from the allocators by the pause itself.
//! - **CAS success:** `Ordering::SeqCst` - a successful allocation must be
//!   globally visible before the caller publishes the object.
//!
//! ## Type tag, flags, marked bytes, TAMS
//! - **All operations:** `Ordering::Relaxed` - these change under external
//!   synchronization (heap lock or pause) and only need atomicity so
//!   concurrent readers never see torn values.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::heap::bot::{BlockOffsetTable, BlockOffsetTablePart};
use crate::heap::remset::RememberedSet;
use crate::marker::MarkBitmap;
use crate::util::WORD_SIZE;

/// Marker for "no humongous owner" / "not in the optional set".
const NONE_U32: u32 = u32::MAX;

/// Region type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegionType {
    Free = 0,
    Eden = 1,
    Survivor = 2,
    Old = 3,
    StartsHumongous = 4,
    ContinuesHumongous = 5,
    OpenArchive = 6,
    ClosedArchive = 7,
}

impl RegionType {
    fn from_u8(tag: u8) -> RegionType {
        match tag {
            0 => RegionType::Free,
            1 => RegionType::Eden,
            2 => RegionType::Survivor,
            3 => RegionType::Old,
            4 => RegionType::StartsHumongous,
            5 => RegionType::ContinuesHumongous,
            6 => RegionType::OpenArchive,
            7 => RegionType::ClosedArchive,
            _ => unreachable!("invalid region type tag {}", tag),
        }
    }

    pub fn is_young(self) -> bool {
        matches!(self, RegionType::Eden | RegionType::Survivor)
    }

    pub fn is_humongous(self) -> bool {
        matches!(
            self,
            RegionType::StartsHumongous | RegionType::ContinuesHumongous
        )
    }

    pub fn is_archive(self) -> bool {
        matches!(self, RegionType::OpenArchive | RegionType::ClosedArchive)
    }
}

/// Pause-time cost model scalars, updated under the heap lock at pauses.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionPrediction {
    /// Remembered-set length recorded when the region entered the
    /// incremental collection set.
    pub recorded_rs_length: usize,
    /// Predicted cost of evacuating this region, in milliseconds.
    pub predicted_elapsed_ms: f64,
    /// reclaimable bytes per predicted millisecond.
    pub gc_efficiency: f64,
}

pub struct HeapRegion {
    index: u32,
    bottom: usize,
    end: usize,
    top: AtomicUsize,

    /// Destination cursor published by compaction phase 1, consumed by
    /// `complete_compaction`.
    compaction_top: AtomicUsize,

    rtype: AtomicU8,

    /// Index of the StartsHumongous region owning this one, or NONE_U32.
    humongous_start: AtomicU32,

    in_collection_set: AtomicBool,
    index_in_opt_cset: AtomicU32,
    evacuation_failed: AtomicBool,

    /// Live bytes below the matching TAMS, from the completed marking.
    prev_marked_bytes: AtomicUsize,
    /// Live bytes found so far by the in-progress marking.
    next_marked_bytes: AtomicUsize,

    prev_top_at_mark_start: AtomicUsize,
    next_top_at_mark_start: AtomicUsize,

    prediction: Mutex<RegionPrediction>,

    rem_set: RememberedSet,
    bot_part: BlockOffsetTablePart,

    /// Serializes BOT-updating parallel allocations: the table's cursor
    /// update is not lock-free, so concurrent old-region allocators take
    /// this lock. Young allocation bypasses it entirely.
    par_alloc_lock: Mutex<()>,
}

impl HeapRegion {
    pub fn new(index: u32, bottom: usize, end: usize, bot: Arc<BlockOffsetTable>) -> Self {
        debug_assert!(bottom < end);
        Self {
            index,
            bottom,
            end,
            top: AtomicUsize::new(bottom),
            compaction_top: AtomicUsize::new(bottom),
            rtype: AtomicU8::new(RegionType::Free as u8),
            humongous_start: AtomicU32::new(NONE_U32),
            in_collection_set: AtomicBool::new(false),
            index_in_opt_cset: AtomicU32::new(NONE_U32),
            evacuation_failed: AtomicBool::new(false),
            prev_marked_bytes: AtomicUsize::new(0),
            next_marked_bytes: AtomicUsize::new(0),
            prev_top_at_mark_start: AtomicUsize::new(bottom),
            next_top_at_mark_start: AtomicUsize::new(bottom),
            prediction: Mutex::new(RegionPrediction::default()),
            rem_set: RememberedSet::new(),
            bot_part: BlockOffsetTablePart::new(bot, bottom, end),
            par_alloc_lock: Mutex::new(()),
        }
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn bottom(&self) -> usize {
        self.bottom
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn top(&self) -> usize {
        self.top.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.end - self.bottom
    }

    pub fn used(&self) -> usize {
        self.top() - self.bottom
    }

    pub fn free(&self) -> usize {
        self.end - self.top()
    }

    pub fn is_empty(&self) -> bool {
        self.top() == self.bottom
    }

    /// Directly place the bump pointer. Used when a humongous series is
    /// laid out: the series regions are filled as a whole, not through
    /// the allocators.
    pub(crate) fn set_top(&self, addr: usize) {
        debug_assert!(addr >= self.bottom && addr <= self.end);
        self.top.store(addr, Ordering::SeqCst);
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.bottom && addr < self.end
    }

    // ------------------------------------------------------------------
    // Type state machine
    // ------------------------------------------------------------------

    pub fn region_type(&self) -> RegionType {
        RegionType::from_u8(self.rtype.load(Ordering::Relaxed))
    }

    fn set_type(&self, rtype: RegionType) {
        log::trace!("region {} -> {:?}", self.index, rtype);
        self.rtype.store(rtype as u8, Ordering::Relaxed);
    }

    pub fn is_free(&self) -> bool {
        self.region_type() == RegionType::Free
    }

    pub fn is_young(&self) -> bool {
        self.region_type().is_young()
    }

    pub fn is_eden(&self) -> bool {
        self.region_type() == RegionType::Eden
    }

    pub fn is_survivor(&self) -> bool {
        self.region_type() == RegionType::Survivor
    }

    pub fn is_old(&self) -> bool {
        self.region_type() == RegionType::Old
    }

    pub fn is_humongous(&self) -> bool {
        self.region_type().is_humongous()
    }

    pub fn is_starts_humongous(&self) -> bool {
        self.region_type() == RegionType::StartsHumongous
    }

    pub fn is_continues_humongous(&self) -> bool {
        self.region_type() == RegionType::ContinuesHumongous
    }

    pub fn is_archive(&self) -> bool {
        self.region_type().is_archive()
    }

    pub fn is_open_archive(&self) -> bool {
        self.region_type() == RegionType::OpenArchive
    }

    pub fn set_eden(&self) {
        crate::guarantee!(
            self.is_free() && self.is_empty(),
            "region {} must be free and empty to become eden, is {:?}",
            self.index,
            self.region_type()
        );
        self.set_type(RegionType::Eden);
    }

    pub fn set_survivor(&self) {
        crate::guarantee!(
            self.is_free() && self.is_empty(),
            "region {} must be free and empty to become survivor, is {:?}",
            self.index,
            self.region_type()
        );
        self.set_type(RegionType::Survivor);
    }

    pub fn set_old(&self) {
        crate::guarantee!(
            self.is_free(),
            "region {} must be free to become old, is {:?}",
            self.index,
            self.region_type()
        );
        self.set_type(RegionType::Old);
    }

    /// Retire a young region in place after evacuation kept its contents
    /// (evacuation failure, or survivor aging out).
    pub fn move_to_old(&self) {
        crate::guarantee!(
            self.is_young(),
            "region {} must be young to move to old, is {:?}",
            self.index,
            self.region_type()
        );
        self.set_type(RegionType::Old);
    }

    pub fn set_open_archive(&self) {
        crate::guarantee!(
            self.is_free() && self.is_empty(),
            "region {} must be free and empty to become archive",
            self.index
        );
        self.set_type(RegionType::OpenArchive);
    }

    pub fn set_closed_archive(&self) {
        crate::guarantee!(
            self.is_free() && self.is_empty(),
            "region {} must be free and empty to become archive",
            self.index
        );
        self.set_type(RegionType::ClosedArchive);
    }

    // ------------------------------------------------------------------
    // Humongous series
    // ------------------------------------------------------------------

    /// Establish this empty region as the head of a humongous series.
    ///
    /// `obj_top` is the end of the oversized object within this first
    /// region (or its end, for multi-region objects); `fill_size` bytes of
    /// filler follow the object in the last region.
    pub fn set_starts_humongous(&self, obj_top: usize, fill_size: usize) {
        crate::guarantee!(
            self.is_free() && self.is_empty(),
            "region {} must be free and empty to start a humongous series",
            self.index
        );
        self.set_type(RegionType::StartsHumongous);
        self.humongous_start.store(self.index, Ordering::Relaxed);
        self.bot_part.set_for_starts_humongous(obj_top, fill_size);
    }

    /// Make this empty region a continuation of `owner`'s series.
    pub fn set_continues_humongous(&self, owner: &HeapRegion) {
        crate::guarantee!(
            self.is_free() && self.is_empty(),
            "region {} must be free and empty to continue a humongous series",
            self.index
        );
        crate::guarantee!(
            owner.is_starts_humongous(),
            "owner region {} is not a series head",
            owner.index
        );
        self.set_type(RegionType::ContinuesHumongous);
        self.humongous_start.store(owner.index, Ordering::Relaxed);
        // Lookups in this region walk back into the owner.
        self.bot_part.set_object_can_span(true);
    }

    /// Detach the region from its series. The caller follows up with
    /// `hr_clear` to recycle it.
    pub fn clear_humongous(&self) {
        debug_assert!(self.is_humongous());
        self.humongous_start.store(NONE_U32, Ordering::Relaxed);
        self.bot_part.set_object_can_span(false);
    }

    /// Index of the series head, if this region belongs to one.
    pub fn humongous_start_index(&self) -> Option<u32> {
        match self.humongous_start.load(Ordering::Relaxed) {
            NONE_U32 => None,
            index => Some(index),
        }
    }

    // ------------------------------------------------------------------
    // Collection-set flags
    // ------------------------------------------------------------------

    pub fn in_collection_set(&self) -> bool {
        self.in_collection_set.load(Ordering::Relaxed)
    }

    pub fn set_in_collection_set(&self, value: bool) {
        self.in_collection_set.store(value, Ordering::Relaxed);
    }

    pub fn index_in_opt_cset(&self) -> Option<u32> {
        match self.index_in_opt_cset.load(Ordering::Relaxed) {
            NONE_U32 => None,
            index => Some(index),
        }
    }

    pub fn set_index_in_opt_cset(&self, index: u32) {
        self.index_in_opt_cset.store(index, Ordering::Relaxed);
    }

    pub fn clear_index_in_opt_cset(&self) {
        self.index_in_opt_cset.store(NONE_U32, Ordering::Relaxed);
    }

    pub fn evacuation_failed(&self) -> bool {
        self.evacuation_failed.load(Ordering::Relaxed)
    }

    pub fn set_evacuation_failed(&self, value: bool) {
        self.evacuation_failed.store(value, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Single-claimant bump allocation. Returns `(start, actual_size)`;
    /// `actual_size` is `desired` trimmed to what fits, never below `min`.
    /// `None` means the region cannot satisfy `min` - expected exhaustion,
    /// not an error.
    fn allocate_impl(&self, min_size: usize, desired_size: usize) -> Option<(usize, usize)> {
        debug_assert!(min_size > 0 && min_size <= desired_size);
        let obj = self.top.load(Ordering::Relaxed);
        let available = self.end - obj;
        let want = desired_size.min(available);
        if want < min_size {
            return None;
        }
        self.top.store(obj + want, Ordering::SeqCst);
        Some((obj, want))
    }

    /// Lock-free bump allocation via CAS retry. Same contract as
    /// [`Self::allocate_impl`], safe against concurrent claimants.
    fn par_allocate_impl(&self, min_size: usize, desired_size: usize) -> Option<(usize, usize)> {
        debug_assert!(min_size > 0 && min_size <= desired_size);
        let mut obj = self.top.load(Ordering::Relaxed);
        loop {
            let available = self.end - obj;
            let want = desired_size.min(available);
            if want < min_size {
                return None;
            }
            match self.top.compare_exchange_weak(
                obj,
                obj + want,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some((obj, want)),
                Err(actual) => obj = actual,
            }
        }
    }

    /// Allocate with BOT maintenance. Single-threaded callers only.
    pub fn allocate(&self, min_size: usize, desired_size: usize) -> Option<(usize, usize)> {
        let (start, actual) = self.allocate_impl(min_size, desired_size)?;
        self.bot_part.alloc_block(start, start + actual);
        Some((start, actual))
    }

    /// Allocate with BOT maintenance under concurrency. The table cursor
    /// update is not lock-free, so this serializes through the region's
    /// allocation lock.
    pub fn par_allocate(&self, min_size: usize, desired_size: usize) -> Option<(usize, usize)> {
        let _guard = self.par_alloc_lock.lock();
        self.allocate(min_size, desired_size)
    }

    /// Young-region allocation: no BOT updates, single-threaded.
    pub fn allocate_no_bot_updates(
        &self,
        min_size: usize,
        desired_size: usize,
    ) -> Option<(usize, usize)> {
        debug_assert!(self.is_young());
        self.allocate_impl(min_size, desired_size)
    }

    /// Young-region allocation: no BOT updates, lock-free CAS path.
    pub fn par_allocate_no_bot_updates(
        &self,
        min_size: usize,
        desired_size: usize,
    ) -> Option<(usize, usize)> {
        debug_assert!(self.is_young());
        self.par_allocate_impl(min_size, desired_size)
    }

    // ------------------------------------------------------------------
    // Marking bookkeeping (TAMS protocol)
    // ------------------------------------------------------------------

    pub fn prev_top_at_mark_start(&self) -> usize {
        self.prev_top_at_mark_start.load(Ordering::Relaxed)
    }

    pub fn next_top_at_mark_start(&self) -> usize {
        self.next_top_at_mark_start.load(Ordering::Relaxed)
    }

    pub fn prev_marked_bytes(&self) -> usize {
        self.prev_marked_bytes.load(Ordering::Relaxed)
    }

    pub fn next_marked_bytes(&self) -> usize {
        self.next_marked_bytes.load(Ordering::Relaxed)
    }

    /// A new marking cycle starts: snapshot top, restart the live count.
    pub fn note_start_of_marking(&self) {
        self.next_marked_bytes.store(0, Ordering::Relaxed);
        self.next_top_at_mark_start
            .store(self.top(), Ordering::Relaxed);
    }

    /// Marking finished: promote the in-progress snapshot to the
    /// completed one.
    pub fn note_end_of_marking(&self) {
        self.prev_top_at_mark_start
            .store(self.next_top_at_mark_start(), Ordering::Relaxed);
        self.prev_marked_bytes
            .store(self.next_marked_bytes(), Ordering::Relaxed);
        self.next_marked_bytes.store(0, Ordering::Relaxed);
    }

    /// Marking threads account live bytes as they mark.
    pub fn add_to_marked_bytes(&self, bytes: usize) {
        self.next_marked_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn zero_marked_bytes(&self) {
        self.prev_marked_bytes.store(0, Ordering::Relaxed);
        self.next_marked_bytes.store(0, Ordering::Relaxed);
    }

    fn reset_top_at_mark_starts(&self) {
        self.prev_top_at_mark_start
            .store(self.bottom, Ordering::Relaxed);
        self.next_top_at_mark_start
            .store(self.bottom, Ordering::Relaxed);
    }

    /// Objects above the completed-marking snapshot are implicitly live.
    pub fn obj_allocated_since_prev_marking(&self, addr: usize) -> bool {
        addr >= self.prev_top_at_mark_start()
    }

    /// Liveness per the completed marking: dead iff below prev-TAMS and
    /// unmarked. Archive regions are pinned; nothing in them dies.
    pub fn is_obj_dead(&self, addr: usize, bitmap: &MarkBitmap) -> bool {
        debug_assert!(self.contains(addr));
        if self.is_archive() {
            return false;
        }
        !self.obj_allocated_since_prev_marking(addr) && !bitmap.is_marked(addr)
    }

    // ------------------------------------------------------------------
    // Block queries
    // ------------------------------------------------------------------

    /// Start of the block containing `addr`. `size_of` reports the byte
    /// size of a live object at a given address.
    pub fn block_start(
        &self,
        addr: usize,
        bitmap: &MarkBitmap,
        size_of: &dyn Fn(usize) -> usize,
    ) -> usize {
        let block_size = |p: usize| self.block_size(p, bitmap, size_of);
        self.bot_part.block_start(addr, self.top(), &block_size)
    }

    /// Size in bytes of the block starting at `addr`: the object size if
    /// live, otherwise the gap up to the next live object or prev-TAMS.
    pub fn block_size(
        &self,
        addr: usize,
        bitmap: &MarkBitmap,
        size_of: &dyn Fn(usize) -> usize,
    ) -> usize {
        let top = self.top();
        if addr >= top {
            debug_assert_eq!(addr, top);
            return self.end - top;
        }
        if !self.is_obj_dead(addr, bitmap) {
            return size_of(addr);
        }
        self.block_size_using_bitmap(addr, bitmap)
    }

    /// Extent of a dead block: it reaches the next marked object, or the
    /// prev-TAMS boundary past which everything is implicitly live.
    fn block_size_using_bitmap(&self, addr: usize, bitmap: &MarkBitmap) -> usize {
        let tams = self.prev_top_at_mark_start();
        debug_assert!(addr < tams);
        let next_live = bitmap.get_next_marked_addr(addr + WORD_SIZE, tams);
        next_live - addr
    }

    /// Visit every marked object in `[bottom, top)` in address order.
    /// `f` returns the byte size of the object it consumed.
    pub fn apply_to_marked_objects(&self, bitmap: &MarkBitmap, mut f: impl FnMut(usize) -> usize) {
        let limit = self.top();
        let mut addr = bitmap.get_next_marked_addr(self.bottom, limit);
        while addr < limit {
            let size = f(addr);
            debug_assert!(size >= WORD_SIZE);
            // A humongous head's object reaches past this region's top.
            addr = bitmap.get_next_marked_addr((addr + size).min(limit), limit);
        }
    }

    // ------------------------------------------------------------------
    // Recycling and compaction
    // ------------------------------------------------------------------

    /// Reset the region to Free. The region must have been taken out of
    /// any collection set and detached from any humongous series first.
    ///
    /// `clear_space` additionally zeroes the memory (debug builds only;
    /// callers must own real backing memory for the span). `locked`
    /// serializes the remembered-set drop against concurrent refinement;
    /// pause-time callers pass false.
    pub fn hr_clear(&self, keep_remset: bool, clear_space: bool, locked: bool) {
        crate::guarantee!(
            !self.in_collection_set(),
            "region {} cleared while in a collection set",
            self.index
        );
        crate::guarantee!(
            self.humongous_start_index().is_none(),
            "region {} cleared while attached to a humongous series",
            self.index
        );

        self.set_type(RegionType::Free);
        self.top.store(self.bottom, Ordering::SeqCst);
        self.compaction_top.store(self.bottom, Ordering::Relaxed);
        self.zero_marked_bytes();
        self.reset_top_at_mark_starts();
        self.evacuation_failed.store(false, Ordering::Relaxed);
        self.clear_index_in_opt_cset();
        *self.prediction.lock() = RegionPrediction::default();

        if !keep_remset {
            if locked {
                self.rem_set.clear_locked();
            } else {
                self.rem_set.clear();
            }
        }
        self.bot_part.reset();

        #[cfg(debug_assertions)]
        if clear_space {
            unsafe {
                std::ptr::write_bytes(self.bottom as *mut u8, 0, self.capacity());
            }
        }
        #[cfg(not(debug_assertions))]
        let _ = clear_space;
    }

    pub fn compaction_top(&self) -> usize {
        self.compaction_top.load(Ordering::Relaxed)
    }

    pub fn set_compaction_top(&self, addr: usize) {
        debug_assert!(addr >= self.bottom && addr <= self.end);
        self.compaction_top.store(addr, Ordering::Relaxed);
    }

    /// Finish compaction for this region: the published compaction top
    /// becomes the real top, and stale marking state is invalidated.
    pub fn complete_compaction(&self) {
        self.top
            .store(self.compaction_top(), Ordering::SeqCst);
        if self.is_empty() {
            self.bot_part.reset();
        }
        // The bitmap no longer describes the moved objects; everything is
        // treated as allocated since the last marking.
        self.zero_marked_bytes();
        self.reset_top_at_mark_starts();
    }

    // ------------------------------------------------------------------
    // Cost model
    // ------------------------------------------------------------------

    /// Bytes a collection of this region would reclaim.
    pub fn reclaimable_bytes(&self) -> usize {
        let live = self.prev_marked_bytes();
        debug_assert!(live <= self.capacity());
        self.capacity() - live
    }

    /// Recompute gc_efficiency from a fresh cost prediction.
    pub fn calc_gc_efficiency(&self, predicted_elapsed_ms: f64) {
        debug_assert!(predicted_elapsed_ms > 0.0);
        let mut prediction = self.prediction.lock();
        prediction.predicted_elapsed_ms = predicted_elapsed_ms;
        prediction.gc_efficiency = self.reclaimable_bytes() as f64 / predicted_elapsed_ms;
    }

    /// Snapshot the remembered-set length for incremental CSet accounting.
    pub fn set_recorded_rs_length(&self, rs_length: usize) {
        self.prediction.lock().recorded_rs_length = rs_length;
    }

    /// Store a fresh pause-cost prediction for this region.
    pub fn record_prediction(&self, rs_length: usize, predicted_elapsed_ms: f64) {
        let mut prediction = self.prediction.lock();
        prediction.recorded_rs_length = rs_length;
        prediction.predicted_elapsed_ms = predicted_elapsed_ms;
    }

    pub fn prediction(&self) -> RegionPrediction {
        *self.prediction.lock()
    }

    pub fn rem_set(&self) -> &RememberedSet {
        &self.rem_set
    }

    pub fn bot_part(&self) -> &BlockOffsetTablePart {
        &self.bot_part
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGION_SIZE: usize = 1024 * 1024;

    fn test_region() -> HeapRegion {
        // Fake, never-dereferenced base: the tests below exercise address
        // arithmetic and state transitions only.
        let base = 0x4000_0000;
        let bot = Arc::new(BlockOffsetTable::new(base, REGION_SIZE));
        HeapRegion::new(0, base, base + REGION_SIZE, bot)
    }

    #[test]
    fn test_allocate_trims_to_available() {
        let region = test_region();
        region.set_old();

        let (start, actual) = region.allocate(64, 256).unwrap();
        assert_eq!(start, region.bottom());
        assert_eq!(actual, 256);

        // Ask for more than remains with a satisfiable minimum.
        let remaining = region.free();
        let (_, actual) = region.allocate(64, remaining + 512).unwrap();
        assert_eq!(actual, remaining);
        assert_eq!(region.free(), 0);

        // Exhaustion is None, not an error.
        assert!(region.allocate(8, 8).is_none());
    }

    #[test]
    fn test_par_allocate_no_bot_updates() {
        let region = test_region();
        region.set_eden();

        let (a, _) = region.par_allocate_no_bot_updates(64, 64).unwrap();
        let (b, _) = region.par_allocate_no_bot_updates(64, 64).unwrap();
        assert_eq!(b, a + 64);
        assert_eq!(region.used(), 128);
    }

    #[test]
    fn test_type_transitions() {
        let region = test_region();
        assert!(region.is_free());

        region.set_eden();
        assert!(region.is_young());

        region.move_to_old();
        assert!(region.is_old());

        region.hr_clear(false, false, false);
        assert!(region.is_free());
        assert!(region.is_empty());
    }

    #[test]
    fn test_hr_clear_locked_drops_remset() {
        let region = test_region();
        region.set_old();
        region.rem_set().add_reference(7, 42);

        // Locked clear, for recycling while refinement still runs.
        region.hr_clear(false, false, true);
        assert!(region.is_free());
        assert!(region.rem_set().is_empty());

        // keep_remset preserves the entries through a clear.
        region.set_old();
        region.rem_set().add_reference(7, 42);
        region.hr_clear(true, false, false);
        assert_eq!(region.rem_set().occupied(), 1);
    }

    #[test]
    fn test_tams_protocol() {
        let region = test_region();
        region.set_old();
        region.allocate(1024, 1024).unwrap();

        region.note_start_of_marking();
        assert_eq!(region.next_top_at_mark_start(), region.top());
        region.add_to_marked_bytes(512);
        region.note_end_of_marking();

        assert_eq!(region.prev_marked_bytes(), 512);
        assert_eq!(region.prev_top_at_mark_start(), region.top());
        assert_eq!(region.next_marked_bytes(), 0);

        // Allocations above prev-TAMS are implicitly live.
        let (above, _) = region.allocate(64, 64).unwrap();
        assert!(region.obj_allocated_since_prev_marking(above));
    }

    #[test]
    fn test_is_obj_dead() {
        let region = test_region();
        region.set_old();
        let (obj, _) = region.allocate(64, 64).unwrap();

        let bitmap = MarkBitmap::new(region.bottom(), region.capacity());

        // Fresh region: prev-TAMS is bottom, everything is live.
        assert!(!region.is_obj_dead(obj, &bitmap));

        // Complete a marking that saw nothing live.
        region.note_start_of_marking();
        region.note_end_of_marking();
        assert!(region.is_obj_dead(obj, &bitmap));

        bitmap.mark(obj);
        assert!(!region.is_obj_dead(obj, &bitmap));
    }

    #[test]
    fn test_block_size_dead_gap() {
        let region = test_region();
        region.set_old();
        let b = region.bottom();
        // Three 64-byte objects, then mark only the third.
        region.allocate(64, 64).unwrap();
        region.allocate(64, 64).unwrap();
        region.allocate(64, 64).unwrap();
        region.note_start_of_marking();
        region.note_end_of_marking();

        let bitmap = MarkBitmap::new(region.bottom(), region.capacity());
        bitmap.mark(b + 128);

        let size_of = |_: usize| 64usize;
        // Dead block at bottom spans the two dead objects.
        assert_eq!(region.block_size(b, &bitmap, &size_of), 128);
        assert_eq!(region.block_size(b + 128, &bitmap, &size_of), 64);
        // Unallocated tail.
        assert_eq!(region.block_size(region.top(), &bitmap, &size_of), region.free());
    }

    #[test]
    fn test_apply_to_marked_objects() {
        let region = test_region();
        region.set_old();
        let b = region.bottom();
        for _ in 0..8 {
            region.allocate(64, 64).unwrap();
        }

        let bitmap = MarkBitmap::new(region.bottom(), region.capacity());
        bitmap.mark(b);
        bitmap.mark(b + 192);
        bitmap.mark(b + 448);

        let mut visited = Vec::new();
        region.apply_to_marked_objects(&bitmap, |addr| {
            visited.push(addr);
            64
        });
        assert_eq!(visited, vec![b, b + 192, b + 448]);
    }

    #[test]
    fn test_humongous_series() {
        let base = 0x4000_0000;
        let bot = Arc::new(BlockOffsetTable::new(base, 2 * REGION_SIZE));
        let head = HeapRegion::new(0, base, base + REGION_SIZE, Arc::clone(&bot));
        let tail = HeapRegion::new(1, base + REGION_SIZE, base + 2 * REGION_SIZE, bot);

        head.set_starts_humongous(base + REGION_SIZE, 0);
        tail.set_continues_humongous(&head);

        assert!(head.is_starts_humongous());
        assert!(tail.is_continues_humongous());
        assert_eq!(tail.humongous_start_index(), Some(0));
        assert!(tail.bot_part().object_can_span());

        head.clear_humongous();
        tail.clear_humongous();
        head.hr_clear(false, false, false);
        tail.hr_clear(false, false, false);
        assert!(head.is_free() && tail.is_free());
        assert!(!tail.bot_part().object_can_span());
    }

    #[test]
    fn test_complete_compaction() {
        let region = test_region();
        region.set_old();
        region.allocate(4096, 4096).unwrap();
        region.note_start_of_marking();
        region.add_to_marked_bytes(4096);
        region.note_end_of_marking();

        region.set_compaction_top(region.bottom() + 1024);
        region.complete_compaction();

        assert_eq!(region.used(), 1024);
        assert_eq!(region.prev_marked_bytes(), 0);
        assert_eq!(region.prev_top_at_mark_start(), region.bottom());
    }

    #[test]
    fn test_gc_efficiency() {
        let region = test_region();
        region.set_old();
        region.allocate(REGION_SIZE / 2, REGION_SIZE / 2).unwrap();
        region.note_start_of_marking();
        region.add_to_marked_bytes(REGION_SIZE / 4);
        region.note_end_of_marking();

        region.calc_gc_efficiency(2.0);
        let p = region.prediction();
        let reclaimable = (REGION_SIZE - REGION_SIZE / 4) as f64;
        assert!((p.gc_efficiency - reclaimable / 2.0).abs() < f64::EPSILON);
    }
}
