//! # DGC - Region-Based Collector Core for Disaggregated Heaps
//!
//! DGC is the region-level core of a G1-style garbage collector,
//! reworked for disaggregated operation: the mutators run on a CPU
//! server while the heap's tracing and compaction can run on a memory
//! server, with region metadata shipped across the boundary between
//! pauses.
//!
//! ## Overview
//!
//! The crate provides the data-plane building blocks, not a full
//! runtime:
//!
//! - **Fixed-size heap regions**: one anonymous mapping carved into
//!   regions with atomic bump allocation and a typed lifecycle
//!   (eden/survivor/old/humongous/archive)
//! - **Block offset table**: card-indexed back-skip table giving exact
//!   `block_start` lookups for any heap address
//! - **Collection set**: incrementally built young part plus a
//!   time-budgeted old part, published with release/acquire so scanners
//!   never see a half-appended set
//! - **Full compaction**: four-phase parallel sliding compaction with
//!   out-of-line forwarding tables and deferred cross-region reference
//!   resolution
//! - **Suspendible thread set**: cooperative safepoint protocol for the
//!   concurrent GC threads
//! - **Remote transfer glue**: a transport capability and the metadata
//!   exchange choreography around a compaction pass
//!
//! ## Quick Start
//!
//! ```rust
//! use dgc::{GcConfig, RegionType, RegionalHeap};
//!
//! fn main() -> dgc::Result<()> {
//!     let config = GcConfig::default();
//!     let heap = RegionalHeap::new(&config)?;
//!
//!     let region = heap
//!         .acquire_region(RegionType::Old)
//!         .ok_or(dgc::GcError::OutOfMemory {
//!             requested: 64,
//!             available: 0,
//!         })?;
//!     let (addr, _) = region.allocate(64, 64).ok_or(dgc::GcError::OutOfMemory {
//!         requested: 64,
//!         available: region.free(),
//!     })?;
//!
//!     unsafe {
//!         *(addr as *mut u64) = 0x12345678;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Pause Anatomy
//!
//! ```text
//! mutators (CPU server)              GC workers (memory server)
//! ──────────────────────             ──────────────────────────
//! retire eden regions ─────────────▶ incremental CSet building
//!                                    refinement re-samples predictions
//!          ── pause begins ──
//! finalize young part (fold diffs)
//! finalize old part (time budget)
//! phase 1  prepare   (forwarding tables, dead-region reclaim)
//! phase 2  adjust    (intra-region fields; defer the rest)
//!            publish forwarding tables + BOT windows
//! phase 3  compact   (copy, reinit headers, install new tops)
//! phase 4  resolve   (deferred cross-region fields)
//!          ── pause ends ──
//! ```
//!
//! Object layout is never assumed: sizing, reference iteration and
//! header repair go through the [`ObjectModel`] trait supplied by the
//! embedding runtime.

pub mod compact;
pub mod config;
pub mod cset;
pub mod error;
pub mod heap;
pub mod marker;
pub mod runtime;
pub mod stats;
pub mod transfer;
pub mod util;

pub use compact::{
    CompactionOutcome, CompactionPoint, ForwardingTable, FullCompaction, HeaderObjectModel,
    ObjectModel,
};
pub use config::{GcConfig, HeapGeometry};
pub use cset::{CollectionSet, CsetChooser, OptionalEvacuation, RankedChooser};
pub use error::{GcError, Result};
pub use heap::{
    BlockOffsetTable, BlockOffsetTablePart, CardRef, HeapRegion, RegionPrediction, RegionType,
    RegionalHeap, RememberedSet,
};
pub use marker::MarkBitmap;
pub use runtime::SuspendibleThreadSet;
pub use stats::PhaseTimes;
pub use transfer::{LoopbackTransport, MetadataExchange, RegionTransport, ServerId, TransferKind};
