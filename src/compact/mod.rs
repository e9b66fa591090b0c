//! Full Compaction - Four-Phase Sliding Compaction
//!
//! Stop-the-world compaction of all occupied ordinary regions. Four
//! globally-ordered phases, each run by a fixed set of workers over a
//! round-robin partition of the compacting regions; the scoped-thread
//! joins between phases are the only barriers:
//!
//! 1. prepare - walk the live objects of each region bottom-up,
//!    bump-allocate destinations from the worker's compaction point and
//!    record movers in a per-region forwarding table. Fully dead regions
//!    and dead humongous series are freed here without further work.
//! 2. adjust - rewrite reference fields whose target moves within the
//!    holder's own region; fields pointing into other regions are
//!    deferred, since those tables may belong to other workers (or to
//!    another server) and are only safe to read once every table is
//!    published.
//! 3. compact - copy each mover to its destination, reinitialize its
//!    header there, then invalidate the region's marking state and
//!    install the compacted top. An object without a table entry does
//!    not move and is never touched.
//! 4. resolve - rewrite the deferred fields against the published
//!    tables, relocating the holder address first.
//!
//! Copy safety: destinations are assigned in source order over an
//! ascending region claim, so a destination never lands above its
//! source; overlapping same-object moves use `ptr::copy`.
//!
//! An abort request is honored between per-region work items. Regions
//! already processed in the current phase stay processed; the pass
//! reports [`GcError::Interrupted`] and performs no rollback.

pub mod compaction_point;
pub mod forwarding;
pub mod object_model;

pub use compaction_point::CompactionPoint;
pub use forwarding::ForwardingTable;
pub use object_model::{HeaderObjectModel, ObjectModel};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{GcError, Result};
use crate::heap::{HeapRegion, RegionalHeap};
use crate::stats::PhaseTimes;
use crate::transfer::MetadataExchange;
use crate::util::WORD_SIZE;

/// A reference field that crosses regions, recorded in the adjust phase
/// and rewritten in the resolve phase.
#[derive(Debug, Clone, Copy)]
struct DeferredRef {
    /// Pre-compaction address of the holding object.
    holder: usize,
    /// Byte offset of the field within the holder.
    field_offset: usize,
    /// Pre-compaction address the field pointed at.
    target: usize,
}

/// What one full-compaction pass accomplished.
#[derive(Debug)]
pub struct CompactionOutcome {
    pub regions_compacted: usize,
    pub regions_freed: usize,
    pub humongous_regions_freed: usize,
    pub objects_moved: usize,
    pub phase_times: PhaseTimes,
}

pub struct FullCompaction<'a> {
    heap: Arc<RegionalHeap>,
    model: &'a dyn ObjectModel,
    /// Metadata hand-off to the peer server; None for single-server
    /// operation.
    exchange: Option<&'a MetadataExchange>,
    workers: usize,
    abort: AtomicBool,
}

impl<'a> FullCompaction<'a> {
    pub fn new(heap: Arc<RegionalHeap>, model: &'a dyn ObjectModel, workers: usize) -> Self {
        debug_assert!(workers >= 1);
        Self {
            heap,
            model,
            exchange: None,
            workers,
            abort: AtomicBool::new(false),
        }
    }

    pub fn with_exchange(mut self, exchange: &'a MetadataExchange) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Ask the pass to stop at the next per-region boundary. Safe from
    /// any thread.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// Ordinary occupied regions, ascending. Humongous and archive
    /// regions never slide; free regions have nothing to do.
    fn compacting_regions(&self) -> Vec<Arc<HeapRegion>> {
        self.heap
            .regions()
            .iter()
            .filter(|r| {
                !r.is_free() && !r.is_humongous() && !r.is_archive()
            })
            .cloned()
            .collect()
    }

    /// A region with no marked bytes and no allocation since the last
    /// completed marking holds nothing live.
    fn is_fully_dead(region: &HeapRegion) -> bool {
        region.prev_marked_bytes() == 0 && region.top() == region.prev_top_at_mark_start()
    }

    /// Walk the live objects of `region` bottom-up: the marked ones
    /// below prev-TAMS, then everything allocated since.
    fn for_each_live_object(&self, region: &HeapRegion, mut f: impl FnMut(usize, usize)) {
        let bitmap = self.heap.mark_bitmap();
        let tams = region.prev_top_at_mark_start();
        region.apply_to_marked_objects(bitmap, |obj| {
            debug_assert!(obj < tams);
            let size = self.model.size_of(obj);
            f(obj, size);
            size
        });
        let mut obj = tams;
        let top = region.top();
        while obj < top {
            let size = self.model.size_of(obj);
            f(obj, size);
            obj += size;
        }
    }

    /// Run the pass. Returns the outcome, or [`GcError::Interrupted`] if
    /// an abort request arrived mid-pass.
    pub fn run(&self) -> Result<CompactionOutcome> {
        let claims = self.compacting_regions();
        let mut times = PhaseTimes::new(self.workers);

        // Phase 1: prepare.
        let start = Instant::now();
        let prepare = self.run_prepare(&claims);
        let humongous_freed = self.reclaim_dead_humongous();
        times.prepare = start.elapsed();
        if self.aborted() {
            return Err(GcError::Interrupted("compaction aborted in prepare".into()));
        }

        let mut tables: HashMap<u32, Arc<ForwardingTable>> = HashMap::new();
        let mut regions_freed = 0;
        let mut compacting: Vec<Arc<HeapRegion>> = Vec::new();
        for result in &prepare {
            regions_freed += result.freed;
            for (region, table) in &result.claimed {
                tables.insert(region.index(), Arc::clone(table));
                compacting.push(Arc::clone(region));
            }
        }
        let objects_moved = tables.values().map(|t| t.len()).sum();

        if let Some(exchange) = self.exchange {
            for region in &compacting {
                exchange.publish_region_metadata(region);
                exchange.before_compaction(region);
            }
        }

        // Phase 2: adjust.
        let start = Instant::now();
        let deferred = self.run_adjust(&compacting, &tables);
        times.adjust = start.elapsed();
        if self.aborted() {
            return Err(GcError::Interrupted("compaction aborted in adjust".into()));
        }

        // Phase 3: compact.
        let start = Instant::now();
        self.run_compact(&prepare);
        self.reset_live_humongous();
        times.compact = start.elapsed();
        if self.aborted() {
            return Err(GcError::Interrupted("compaction aborted in compact".into()));
        }

        // Every table must be published before any deferred field is
        // resolved; a field may point into any region.
        if let Some(exchange) = self.exchange {
            for region in &compacting {
                exchange.publish_forwarding(region, &tables[&region.index()]);
                exchange.publish_bot_window(region);
            }
        }

        // Phase 4: resolve.
        let start = Instant::now();
        self.run_resolve(deferred, &tables);
        times.resolve = start.elapsed();
        if self.aborted() {
            return Err(GcError::Interrupted("compaction aborted in resolve".into()));
        }

        times.log_summary();
        Ok(CompactionOutcome {
            regions_compacted: compacting.len(),
            regions_freed,
            humongous_regions_freed: humongous_freed,
            objects_moved,
            phase_times: times,
        })
    }

    // ------------------------------------------------------------------
    // Phase 1
    // ------------------------------------------------------------------

    fn run_prepare(&self, claims: &[Arc<HeapRegion>]) -> Vec<PrepareResult> {
        self.scatter(|worker| {
            let mut point = CompactionPoint::new();
            let mut result = PrepareResult::default();
            for region in Self::claim(claims, worker, self.workers) {
                if self.aborted() {
                    break;
                }
                if Self::is_fully_dead(region) {
                    region.hr_clear(false, false, false);
                    self.heap.release_region(region);
                    result.freed += 1;
                    continue;
                }
                let table = Arc::new(ForwardingTable::new(region.bottom(), region.capacity()));
                point.add_region(Arc::clone(region));
                self.for_each_live_object(region, |obj, size| {
                    let dest = point.forward(size);
                    if dest != obj {
                        table.add_entry(obj, dest);
                    }
                });
                table.set_complete();
                result.claimed.push((Arc::clone(region), table));
            }
            result
        })
    }

    /// Free every humongous series whose head object died. Serial; the
    /// series walk crosses worker partitions.
    fn reclaim_dead_humongous(&self) -> usize {
        let bitmap = self.heap.mark_bitmap();
        let mut freed = 0;
        for head in self.heap.regions().to_vec() {
            if !head.is_starts_humongous() || !head.is_obj_dead(head.bottom(), bitmap) {
                continue;
            }
            let head_index = head.index();
            let mut series = vec![Arc::clone(&head)];
            for follower in &self.heap.regions()[head_index as usize + 1..] {
                if follower.humongous_start_index() == Some(head_index) {
                    series.push(Arc::clone(follower));
                } else {
                    break;
                }
            }
            log::debug!(
                "freeing dead humongous series at region {} ({} regions)",
                head_index,
                series.len()
            );
            // Followers detach before the head so no region ever points
            // at a recycled owner.
            for region in series.iter().rev() {
                region.clear_humongous();
                region.hr_clear(false, false, false);
                self.heap.release_region(region);
                freed += 1;
            }
        }
        freed
    }

    // ------------------------------------------------------------------
    // Phase 2
    // ------------------------------------------------------------------

    fn run_adjust(
        &self,
        compacting: &[Arc<HeapRegion>],
        tables: &HashMap<u32, Arc<ForwardingTable>>,
    ) -> Vec<DeferredRef> {
        // Live humongous and archive objects hold references too; their
        // fields are adjusted even though the objects themselves never
        // move.
        let pinned: Vec<Arc<HeapRegion>> = self
            .heap
            .regions()
            .iter()
            .filter(|r| r.is_starts_humongous() || r.is_archive())
            .cloned()
            .collect();
        let mut adjusting = compacting.to_vec();
        adjusting.extend(pinned);

        let results = self.scatter(|worker| {
            let mut deferred = Vec::new();
            for region in Self::claim(&adjusting, worker, self.workers) {
                if self.aborted() {
                    break;
                }
                let table = tables.get(&region.index());
                self.for_each_live_object(region, |obj, _size| {
                    self.model.for_each_reference(obj, &mut |field_addr| {
                        let target = unsafe { (field_addr as *const usize).read() };
                        if target == 0 {
                            return;
                        }
                        if region.contains(target) {
                            if let Some(dest) = table.and_then(|t| t.lookup(target)) {
                                crate::guarantee!(
                                    dest % WORD_SIZE == 0 && self.heap.is_in_reserved(dest),
                                    "forwarding of {:#x} resolves to corrupt address {:#x}",
                                    target,
                                    dest
                                );
                                unsafe { (field_addr as *mut usize).write(dest) };
                            }
                        } else {
                            deferred.push(DeferredRef {
                                holder: obj,
                                field_offset: field_addr - obj,
                                target,
                            });
                        }
                    });
                });
            }
            deferred
        });
        results.into_iter().flatten().collect()
    }

    // ------------------------------------------------------------------
    // Phase 3
    // ------------------------------------------------------------------

    /// Workers reuse their own prepare-phase claims: a worker's
    /// destinations live only in its claimed regions, so the sequential
    /// bottom-up copy order established in prepare stays valid.
    fn run_compact(&self, prepare: &[PrepareResult]) {
        let bitmap = self.heap.mark_bitmap();
        self.scatter(|worker| {
            for (region, table) in &prepare[worker].claimed {
                if self.aborted() {
                    break;
                }
                // Destinations never land above their sources, so the
                // bottom-up entry order makes each copy read intact bytes.
                for (src, dest) in table.entries() {
                    let size = self.model.size_of(src);
                    debug_assert!(size % WORD_SIZE == 0);
                    unsafe {
                        std::ptr::copy(src as *const u8, dest as *mut u8, size);
                    }
                    self.model.reinit_header(dest);
                }
                bitmap.clear_range(region.bottom(), region.top());
                region.complete_compaction();
            }
        });
    }

    /// Surviving humongous regions keep their objects in place; only the
    /// stale marking state is dropped.
    fn reset_live_humongous(&self) {
        let bitmap = self.heap.mark_bitmap();
        for region in self.heap.regions() {
            if !region.is_humongous() {
                continue;
            }
            bitmap.clear_range(region.bottom(), region.top());
            region.set_compaction_top(region.top());
            region.complete_compaction();
        }
    }

    // ------------------------------------------------------------------
    // Phase 4
    // ------------------------------------------------------------------

    fn run_resolve(&self, deferred: Vec<DeferredRef>, tables: &HashMap<u32, Arc<ForwardingTable>>) {
        let resolve_addr = |addr: usize| -> usize {
            match self.heap.region_containing(addr) {
                Some(region) => match tables.get(&region.index()) {
                    Some(table) => table.forwarded_or_self(addr),
                    None => addr,
                },
                None => addr,
            }
        };

        let chunk = deferred.len().div_ceil(self.workers.max(1)).max(1);
        let chunks: Vec<&[DeferredRef]> = deferred.chunks(chunk).collect();
        self.scatter(|worker| {
            let Some(chunk) = chunks.get(worker) else {
                return;
            };
            if self.aborted() {
                return;
            }
            for r in *chunk {
                let new_holder = resolve_addr(r.holder);
                let new_target = resolve_addr(r.target);
                crate::guarantee!(
                    new_target % WORD_SIZE == 0 && self.heap.is_in_reserved(new_target),
                    "deferred reference {:#x} resolves to corrupt address {:#x}",
                    r.target,
                    new_target
                );
                unsafe {
                    ((new_holder + r.field_offset) as *mut usize).write(new_target);
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Worker plumbing
    // ------------------------------------------------------------------

    /// Round-robin partition of `regions` for `worker`.
    fn claim(regions: &[Arc<HeapRegion>], worker: usize, total: usize) -> impl Iterator<Item = &Arc<HeapRegion>> {
        regions
            .iter()
            .skip(worker)
            .step_by(total.max(1))
    }

    /// Run `work` on every worker and collect the results. The join is
    /// the phase barrier.
    fn scatter<R, F>(&self, work: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync,
    {
        if self.workers == 1 {
            return vec![work(0)];
        }
        let work = &work;
        let scope_result = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = (0..self.workers)
                .map(|worker| s.spawn(move |_| work(worker)))
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(result) => result,
                    Err(_) => crate::fatal!("compaction worker panicked"),
                })
                .collect()
        });
        match scope_result {
            Ok(results) => results,
            Err(_) => crate::fatal!("compaction worker panicked"),
        }
    }
}

#[derive(Default)]
struct PrepareResult {
    claimed: Vec<(Arc<HeapRegion>, Arc<ForwardingTable>)>,
    freed: usize,
}
