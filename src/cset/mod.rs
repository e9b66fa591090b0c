//! Collection Set - Regions Chosen for the Next Pause
//!
//! The collection set is an index array with single-writer appends and
//! concurrent readers. Young regions enter incrementally between pauses
//! (the "incremental part"); old regions are chosen at the pause under
//! the target time budget, best gc_efficiency first.
//!
//! # Memory Ordering Model
//!
//! ## Index array publication
//! - Appends store the slot with `Relaxed`, then publish the new length
//!   with a `Release` store. Readers load the length with `Acquire` and
//!   the slots below it with `Relaxed`: the acquire/release pair makes
//!   every published slot visible. There is exactly one writer (mutator
//!   region-retirement path between pauses, the pause itself otherwise),
//!   so no CAS is needed.
//!
//! ## Incremental statistics
//! - Refinement threads never touch the main aggregates. They accumulate
//!   signed deltas into separate diff cells (`Relaxed` RMW) that the pause
//!   folds in at finalization, keeping the sampling path lock-free.

pub mod chooser;
pub mod optional;

pub use chooser::{CsetChooser, RankedChooser};
pub use optional::OptionalEvacuation;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::heap::{HeapRegion, RegionalHeap};

/// f64 cell updated with compare-exchange, for the predicted-time
/// aggregates the refinement diffs feed.
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn fetch_add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically take the value, leaving zero.
    fn take(&self) -> f64 {
        f64::from_bits(self.0.swap(0f64.to_bits(), Ordering::Relaxed))
    }
}

pub struct CollectionSet {
    heap: Arc<RegionalHeap>,

    /// Region indices; slots below `cur_length` are published.
    regions: Box<[AtomicU32]>,
    cur_length: AtomicUsize,

    eden_length: AtomicU32,
    survivor_length: AtomicU32,
    old_length: AtomicU32,

    /// True while the incremental (young) part is being built between
    /// pauses.
    inc_build_active: AtomicBool,

    /// Totals fixed at finalization.
    bytes_used_before: AtomicUsize,
    recorded_rs_lengths: AtomicUsize,

    /// Incremental young aggregates, updated as regions are added.
    inc_bytes_used_before: AtomicUsize,
    inc_recorded_rs_lengths: AtomicUsize,
    inc_predicted_elapsed_time_ms: AtomicF64,

    /// Refinement-thread deltas, folded in at finalization.
    inc_recorded_rs_lengths_diff: AtomicI64,
    inc_predicted_elapsed_time_ms_diff: AtomicF64,

    /// Overflow regions deferred to the optional evacuation window.
    optional_regions: Mutex<Vec<Arc<HeapRegion>>>,
    optional_max: u32,
}

impl CollectionSet {
    pub fn new(heap: Arc<RegionalHeap>, optional_max: u32) -> Self {
        let max_length = heap.region_count();
        let regions = (0..max_length).map(|_| AtomicU32::new(0)).collect();
        Self {
            heap,
            regions,
            cur_length: AtomicUsize::new(0),
            eden_length: AtomicU32::new(0),
            survivor_length: AtomicU32::new(0),
            old_length: AtomicU32::new(0),
            inc_build_active: AtomicBool::new(false),
            bytes_used_before: AtomicUsize::new(0),
            recorded_rs_lengths: AtomicUsize::new(0),
            inc_bytes_used_before: AtomicUsize::new(0),
            inc_recorded_rs_lengths: AtomicUsize::new(0),
            inc_predicted_elapsed_time_ms: AtomicF64::new(0.0),
            inc_recorded_rs_lengths_diff: AtomicI64::new(0),
            inc_predicted_elapsed_time_ms_diff: AtomicF64::new(0.0),
            optional_regions: Mutex::new(Vec::new()),
            optional_max,
        }
    }

    // ------------------------------------------------------------------
    // Lengths
    // ------------------------------------------------------------------

    pub fn region_length(&self) -> usize {
        self.cur_length.load(Ordering::Acquire)
    }

    pub fn eden_region_length(&self) -> u32 {
        self.eden_length.load(Ordering::Relaxed)
    }

    pub fn survivor_region_length(&self) -> u32 {
        self.survivor_length.load(Ordering::Relaxed)
    }

    pub fn young_region_length(&self) -> u32 {
        self.eden_region_length() + self.survivor_region_length()
    }

    pub fn old_region_length(&self) -> u32 {
        self.old_length.load(Ordering::Relaxed)
    }

    pub fn optional_region_length(&self) -> usize {
        self.optional_regions.lock().len()
    }

    pub fn bytes_used_before(&self) -> usize {
        self.bytes_used_before.load(Ordering::Relaxed)
    }

    pub fn recorded_rs_lengths(&self) -> usize {
        self.recorded_rs_lengths.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Incremental building
    // ------------------------------------------------------------------

    pub fn is_incremental_building(&self) -> bool {
        self.inc_build_active.load(Ordering::Relaxed)
    }

    /// Open the incremental part. Called right after the previous pause's
    /// set is cleared.
    pub fn start_incremental_building(&self) {
        crate::guarantee!(
            !self.is_incremental_building(),
            "incremental building started twice"
        );
        self.inc_bytes_used_before.store(0, Ordering::Relaxed);
        self.inc_recorded_rs_lengths.store(0, Ordering::Relaxed);
        self.inc_predicted_elapsed_time_ms.store(0.0);
        self.inc_recorded_rs_lengths_diff.store(0, Ordering::Relaxed);
        self.inc_predicted_elapsed_time_ms_diff.store(0.0);
        self.inc_build_active.store(true, Ordering::Relaxed);
    }

    fn stop_incremental_building(&self) {
        debug_assert!(self.is_incremental_building());
        self.inc_build_active.store(false, Ordering::Relaxed);
    }

    /// Single-writer append with release publication.
    fn append(&self, region: &HeapRegion) {
        let length = self.cur_length.load(Ordering::Relaxed);
        crate::guarantee!(
            length < self.regions.len(),
            "collection set overflow at {} regions",
            length
        );
        self.regions[length].store(region.index(), Ordering::Relaxed);
        self.cur_length.store(length + 1, Ordering::Release);
    }

    fn add_young_region_common(&self, region: &Arc<HeapRegion>) {
        crate::guarantee!(
            self.is_incremental_building(),
            "young region {} added outside incremental building",
            region.index()
        );
        crate::guarantee!(
            region.is_young(),
            "region {} is {:?}, not young",
            region.index(),
            region.region_type()
        );
        crate::guarantee!(
            !region.in_collection_set(),
            "region {} added to the collection set twice",
            region.index()
        );
        region.set_in_collection_set(true);

        let prediction = region.prediction();
        region.set_recorded_rs_length(prediction.recorded_rs_length);
        self.inc_bytes_used_before
            .fetch_add(region.used(), Ordering::Relaxed);
        self.inc_recorded_rs_lengths
            .fetch_add(prediction.recorded_rs_length, Ordering::Relaxed);
        self.inc_predicted_elapsed_time_ms
            .fetch_add(prediction.predicted_elapsed_ms);

        self.append(region);
    }

    /// Retired eden region enters the set immediately.
    pub fn add_eden_region(&self, region: &Arc<HeapRegion>) {
        crate::guarantee!(region.is_eden(), "region {} is not eden", region.index());
        self.eden_length.fetch_add(1, Ordering::Relaxed);
        self.add_young_region_common(region);
    }

    fn add_survivor_region(&self, region: &Arc<HeapRegion>) {
        crate::guarantee!(
            region.is_survivor(),
            "region {} is not survivor",
            region.index()
        );
        self.survivor_length.fetch_add(1, Ordering::Relaxed);
        self.add_young_region_common(region);
    }

    /// Refinement threads re-sample a young member's remembered-set
    /// length between pauses. The deltas go to side cells; the main
    /// aggregates stay single-writer and the sampling path stays
    /// lock-free.
    pub fn update_young_region_prediction(
        &self,
        region: &HeapRegion,
        new_rs_length: usize,
        new_predicted_ms: f64,
    ) {
        debug_assert!(region.in_collection_set() && region.is_young());
        let old = region.prediction();

        let rs_delta = new_rs_length as i64 - old.recorded_rs_length as i64;
        let ms_delta = new_predicted_ms - old.predicted_elapsed_ms;
        self.inc_recorded_rs_lengths_diff
            .fetch_add(rs_delta, Ordering::Relaxed);
        self.inc_predicted_elapsed_time_ms_diff.fetch_add(ms_delta);

        region.record_prediction(new_rs_length, new_predicted_ms);
    }

    /// Fold the refinement deltas into the incremental aggregates.
    fn finalize_incremental_building(&self) {
        debug_assert!(self.is_incremental_building());
        let rs_diff = self.inc_recorded_rs_lengths_diff.swap(0, Ordering::Relaxed);
        let ms_diff = self.inc_predicted_elapsed_time_ms_diff.take();

        let rs = self.inc_recorded_rs_lengths.load(Ordering::Relaxed) as i64 + rs_diff;
        debug_assert!(rs >= 0, "folded rs length went negative");
        self.inc_recorded_rs_lengths
            .store(rs.max(0) as usize, Ordering::Relaxed);
        self.inc_predicted_elapsed_time_ms.fetch_add(ms_diff);
    }

    // ------------------------------------------------------------------
    // Finalization at the pause
    // ------------------------------------------------------------------

    /// Close the young part: fold refinement deltas, add the survivors
    /// from the previous pause, fix the totals. Returns the pause-time
    /// budget left for old regions (never negative).
    pub fn finalize_young_part(
        &self,
        target_pause_time_ms: f64,
        survivors: &[Arc<HeapRegion>],
    ) -> f64 {
        crate::guarantee!(
            self.is_incremental_building(),
            "finalize_young_part without an open incremental part"
        );
        debug_assert!(target_pause_time_ms > 0.0);

        self.finalize_incremental_building();
        for survivor in survivors {
            self.add_survivor_region(survivor);
        }
        self.stop_incremental_building();

        self.bytes_used_before.store(
            self.inc_bytes_used_before.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        self.recorded_rs_lengths.store(
            self.inc_recorded_rs_lengths.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );

        let predicted_young_ms = self.inc_predicted_elapsed_time_ms.load();
        let remaining = (target_pause_time_ms - predicted_young_ms).max(0.0);
        log::debug!(
            "young cset finalized: {} eden, {} survivor, predicted {:.2}ms, {:.2}ms remaining",
            self.eden_region_length(),
            self.survivor_region_length(),
            predicted_young_ms,
            remaining
        );
        remaining
    }

    fn add_old_region(&self, region: &Arc<HeapRegion>) {
        crate::guarantee!(region.is_old(), "region {} is not old", region.index());
        crate::guarantee!(
            !region.in_collection_set(),
            "old region {} added to the collection set twice",
            region.index()
        );
        region.set_in_collection_set(true);
        self.old_length.fetch_add(1, Ordering::Relaxed);
        self.bytes_used_before
            .fetch_add(region.used(), Ordering::Relaxed);
        self.recorded_rs_lengths
            .fetch_add(region.rem_set().occupied(), Ordering::Relaxed);
        self.append(region);
    }

    fn add_optional_region(&self, region: Arc<HeapRegion>) {
        let mut optional = self.optional_regions.lock();
        debug_assert!((optional.len() as u32) < self.optional_max);
        region.set_in_collection_set(true);
        region.set_index_in_opt_cset(optional.len() as u32);
        optional.push(region);
    }

    /// Promote an optional region into the main set during its pause
    /// window. Called by [`OptionalEvacuation`].
    pub(crate) fn promote_optional_region(&self, region: &Arc<HeapRegion>) {
        debug_assert!(region.in_collection_set());
        region.clear_index_in_opt_cset();
        self.old_length.fetch_add(1, Ordering::Relaxed);
        self.bytes_used_before
            .fetch_add(region.used(), Ordering::Relaxed);
        self.recorded_rs_lengths
            .fetch_add(region.rem_set().occupied(), Ordering::Relaxed);
        self.append(region);
    }

    pub(crate) fn take_optional_regions(&self) -> Vec<Arc<HeapRegion>> {
        std::mem::take(&mut *self.optional_regions.lock())
    }

    pub(crate) fn optional_region_at(&self, index: usize) -> Option<Arc<HeapRegion>> {
        self.optional_regions.lock().get(index).cloned()
    }

    /// Pull old candidates from `chooser`, best efficiency first, until
    /// the remaining time budget is spent. Overflow candidates go to the
    /// optional set up to its cap; the first candidate past the cap is
    /// returned to the chooser and selection stops.
    pub fn finalize_old_part(&self, time_remaining_ms: f64, chooser: &mut dyn CsetChooser) -> f64 {
        crate::guarantee!(
            !self.is_incremental_building(),
            "finalize_old_part before finalize_young_part"
        );
        let mut remaining = time_remaining_ms;

        while let Some(region) = chooser.pop_best() {
            let predicted = region.prediction().predicted_elapsed_ms;
            if predicted <= remaining {
                remaining -= predicted;
                self.add_old_region(&region);
            } else if (self.optional_region_length() as u32) < self.optional_max {
                self.add_optional_region(region);
            } else {
                chooser.push_back(region);
                break;
            }
        }

        log::debug!(
            "old cset finalized: {} old, {} optional, {:.2}ms budget left",
            self.old_region_length(),
            self.optional_region_length(),
            remaining
        );
        remaining
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    /// Visit every member in insertion order.
    pub fn iterate(&self, mut f: impl FnMut(&Arc<HeapRegion>)) {
        let length = self.region_length();
        for slot in 0..length {
            let index = self.regions[slot].load(Ordering::Relaxed);
            f(self.heap.region(index));
        }
    }

    /// Visit every member once, starting at a per-worker offset so
    /// parallel scans spread across the array.
    pub fn iterate_from(&self, worker_id: usize, total_workers: usize, mut f: impl FnMut(&Arc<HeapRegion>)) {
        let length = self.region_length();
        if length == 0 {
            return;
        }
        let start = length * worker_id / total_workers.max(1);
        for i in 0..length {
            let index = self.regions[(start + i) % length].load(Ordering::Relaxed);
            f(self.heap.region(index));
        }
    }

    /// Drop all membership after the pause. Region flags are cleared so
    /// the regions can be recycled.
    pub fn clear(&self) {
        self.iterate(|region| region.set_in_collection_set(false));
        for region in self.take_optional_regions() {
            region.clear_index_in_opt_cset();
            region.set_in_collection_set(false);
        }
        self.cur_length.store(0, Ordering::Release);
        self.eden_length.store(0, Ordering::Relaxed);
        self.survivor_length.store(0, Ordering::Relaxed);
        self.old_length.store(0, Ordering::Relaxed);
        self.bytes_used_before.store(0, Ordering::Relaxed);
        self.recorded_rs_lengths.store(0, Ordering::Relaxed);
    }
}
