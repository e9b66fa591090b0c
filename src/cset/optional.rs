//! Optional Evacuation - Incremental Old-Region Overflow
//!
//! Regions that did not fit the main pause budget wait in the optional
//! part of the collection set. While pause time remains, batches of them
//! are promoted into the main set and evacuated; whatever is left when
//! time runs out goes back to the chooser for a later pause.

use std::sync::Arc;

use crate::cset::{CollectionSet, CsetChooser};
use crate::heap::HeapRegion;

/// Drives the optional regions through zero or more prepare/complete
/// rounds inside one pause. Dropping the driver returns every region it
/// never prepared to the chooser.
pub struct OptionalEvacuation<'a> {
    cset: &'a CollectionSet,
    chooser: &'a mut dyn CsetChooser,
    /// Next optional-array slot to prepare.
    current_index: usize,
    /// Regions promoted this round, awaiting `complete_evacuation`.
    prepared: Vec<Arc<HeapRegion>>,
    evacuation_failed: bool,
}

impl<'a> OptionalEvacuation<'a> {
    pub fn new(cset: &'a CollectionSet, chooser: &'a mut dyn CsetChooser) -> Self {
        Self {
            cset,
            chooser,
            current_index: 0,
            prepared: Vec::new(),
            evacuation_failed: false,
        }
    }

    /// Promote optional regions into the main set while their predicted
    /// cost fits `time_left_ms`. Returns the number prepared this round;
    /// zero means the remaining candidates no longer fit.
    pub fn prepare_evacuation(&mut self, time_left_ms: f64) -> usize {
        debug_assert!(self.prepared.is_empty());
        let mut remaining = time_left_ms;
        let mut prepared = 0;

        while let Some(region) = self.cset.optional_region_at(self.current_index) {
            let predicted = region.prediction().predicted_elapsed_ms;
            if predicted > remaining {
                break;
            }
            remaining -= predicted;
            self.cset.promote_optional_region(&region);
            self.prepared.push(region);
            self.current_index += 1;
            prepared += 1;
        }

        if prepared > 0 {
            log::debug!(
                "optional evacuation round: {} regions prepared, {:.2}ms left",
                prepared,
                remaining
            );
        }
        prepared
    }

    /// Close the current round. A region whose evacuation failed stays
    /// live in place; it leaves the set and returns to the chooser so a
    /// later pause retries it.
    pub fn complete_evacuation(&mut self, failed_regions: &[u32]) {
        for region in self.prepared.drain(..) {
            if failed_regions.contains(&region.index()) {
                self.evacuation_failed = true;
                region.set_evacuation_failed(true);
                region.set_in_collection_set(false);
                self.chooser.push_back(region);
            }
        }
    }

    pub fn evacuation_failed(&self) -> bool {
        self.evacuation_failed
    }
}

impl Drop for OptionalEvacuation<'_> {
    /// Unprepared optional regions go back to the chooser with their
    /// membership flags cleared.
    fn drop(&mut self) {
        for region in self.cset.take_optional_regions() {
            if region.index_in_opt_cset().is_none() {
                // Promoted earlier; the main set owns it now.
                continue;
            }
            region.clear_index_in_opt_cset();
            region.set_in_collection_set(false);
            self.chooser.push_back(region);
        }
    }
}
