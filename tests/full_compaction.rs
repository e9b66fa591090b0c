//! Full Compaction Tests - End-to-End Heap Integrity
//!
//! A compaction pass over a populated heap must leave every live object
//! reachable, every reference pointing at the moved copy, and every
//! non-mover byte-identical.

mod common;

use common::{HeapFixture, WORD};
use dgc::{
    FullCompaction, GcError, HeaderObjectModel, LoopbackTransport, MetadataExchange, ObjectModel,
    RegionType,
};
use std::sync::Arc;

fn read_word(addr: usize) -> usize {
    unsafe { (addr as *const usize).read() }
}

/// **Bug this finds:** copies clobbering not-yet-copied survivors, or
/// reference adjustment targeting stale addresses.
///
/// Layout: three regions with interleaved live and dead objects, and a
/// reference chain that crosses all of them.
#[test]
fn test_live_graph_survives_parallel_compaction() {
    let fixture = HeapFixture::with_defaults();
    let model = HeaderObjectModel;
    let regions: Vec<_> = (0..3)
        .map(|_| fixture.heap.acquire_region(RegionType::Old).unwrap())
        .collect();

    // Region 2: leaf object behind a big dead gap, so it moves.
    fixture.new_object(&regions[2], 2048, &[], false);
    let leaf = fixture.new_object(&regions[2], 64, &[], true);

    // Region 1: middle object referencing the leaf, also behind a gap.
    fixture.new_object(&regions[1], 512, &[], false);
    let middle = fixture.new_object(&regions[1], 64, &[leaf], true);

    // Region 0: root object at the bottom, so it stays put.
    let root = fixture.new_object(&regions[0], 64, &[middle], true);
    // Payload word after the header and reference field.
    unsafe { ((root + 2 * WORD) as *mut usize).write(0xDEADBEEF) };

    fixture.finish_marking();

    let pass = FullCompaction::new(Arc::clone(&fixture.heap), &model, 3);
    let outcome = pass.run().unwrap();
    assert_eq!(outcome.objects_moved, 2);

    // The root never moved and kept its payload.
    assert_eq!(root, regions[0].bottom());
    assert_eq!(read_word(root + 2 * WORD), 0xDEADBEEF);

    // Follow the chain through the updated references.
    let new_middle = read_word(root + WORD);
    assert_eq!(new_middle, regions[1].bottom());
    assert_eq!(model.size_of(new_middle), 64);

    let new_leaf = read_word(new_middle + WORD);
    assert_eq!(new_leaf, regions[2].bottom());
    assert_eq!(model.size_of(new_leaf), 64);

    // Compacted tops reflect only the live bytes.
    assert_eq!(regions[1].top(), regions[1].bottom() + 64);
    assert_eq!(regions[2].top(), regions[2].bottom() + 64);
}

/// **Bug this finds:** phase 3 touching objects that have no forwarding
/// entry. A non-mover must keep its exact address and contents.
#[test]
fn test_non_movers_are_untouched() {
    let fixture = HeapFixture::with_defaults();
    let model = HeaderObjectModel;
    let region = fixture.heap.acquire_region(RegionType::Old).unwrap();

    // Densely live prefix: nothing below these objects dies, so none of
    // them move.
    let mut objects = Vec::new();
    for i in 0..16 {
        let obj = fixture.new_object(&region, 64, &[], true);
        unsafe { ((obj + WORD) as *mut usize).write(0) };
        unsafe { ((obj + 2 * WORD) as *mut usize).write(0x1000 + i) };
        objects.push(obj);
    }
    fixture.finish_marking();

    let pass = FullCompaction::new(Arc::clone(&fixture.heap), &model, 2);
    let outcome = pass.run().unwrap();

    assert_eq!(outcome.objects_moved, 0);
    for (i, &obj) in objects.iter().enumerate() {
        assert_eq!(model.size_of(obj), 64);
        assert_eq!(read_word(obj + 2 * WORD), 0x1000 + i);
    }
    assert_eq!(region.top(), region.bottom() + 16 * 64);
}

/// **Bug this finds:** dead-region reclamation and humongous-series
/// teardown leaving regions in a half-recycled state.
#[test]
fn test_dead_regions_and_series_return_to_free_list() {
    let fixture = HeapFixture::with_defaults();
    let model = HeaderObjectModel;
    let region_size = fixture.heap.geometry().region_size;

    let dead_region = fixture.heap.acquire_region(RegionType::Old).unwrap();
    fixture.new_object(&dead_region, 4096, &[], false);

    let obj_size = region_size + region_size / 4;
    let series = fixture.heap.acquire_humongous(2, obj_size).unwrap();
    unsafe { HeaderObjectModel::write_object(series[0].bottom(), obj_size, &[]) };

    fixture.finish_marking();
    let free_before = fixture.heap.free_region_count();

    let pass = FullCompaction::new(Arc::clone(&fixture.heap), &model, 1);
    let outcome = pass.run().unwrap();

    assert_eq!(outcome.regions_freed, 1);
    assert_eq!(outcome.humongous_regions_freed, 2);
    assert!(dead_region.is_free());
    assert!(series.iter().all(|r| r.is_free() && r.is_empty()));
    assert_eq!(fixture.heap.free_region_count(), free_before + 3);

    // Recycled regions are immediately reusable.
    let reused = fixture.heap.acquire_region(RegionType::Eden).unwrap();
    assert!(reused.is_eden());
}

/// **Bug this finds:** the adjust phase skipping pinned archive regions,
/// leaving an archive-held field pointing at an object's pre-move
/// address.
#[test]
fn test_archive_held_reference_is_adjusted() {
    let fixture = HeapFixture::with_defaults();
    let model = HeaderObjectModel;
    let archive = fixture.heap.acquire_region(RegionType::OpenArchive).unwrap();
    let old = fixture.heap.acquire_region(RegionType::Old).unwrap();

    // The target sits behind a dead gap, so compaction slides it down.
    fixture.new_object(&old, 512, &[], false);
    let target = fixture.new_object(&old, 64, &[], true);
    let holder = fixture.new_object(&archive, 64, &[target], true);
    fixture.finish_marking();

    let pass = FullCompaction::new(Arc::clone(&fixture.heap), &model, 2);
    let outcome = pass.run().unwrap();

    assert_eq!(outcome.objects_moved, 1);
    // The archive object never moves; its field follows the target.
    assert_eq!(model.size_of(holder), 64);
    assert_eq!(read_word(holder + WORD), old.bottom());
    assert!(archive.is_archive());
}

/// **Bug this finds:** the pass resolving deferred references before
/// every forwarding table is published to the peer.
#[test]
fn test_exchange_sees_tables_before_resolution() {
    let fixture = HeapFixture::with_defaults();
    let model = HeaderObjectModel;
    let holder_region = fixture.heap.acquire_region(RegionType::Old).unwrap();
    let target_region = fixture.heap.acquire_region(RegionType::Old).unwrap();

    fixture.new_object(&target_region, 1024, &[], false);
    let target = fixture.new_object(&target_region, 64, &[], true);
    let holder = fixture.new_object(&holder_region, 64, &[target], true);
    fixture.finish_marking();

    let transport = Arc::new(LoopbackTransport::new());
    let exchange = MetadataExchange::new(Arc::clone(&transport) as _, 3);
    let pass =
        FullCompaction::new(Arc::clone(&fixture.heap), &model, 2).with_exchange(&exchange);
    pass.run().unwrap();

    assert_eq!(read_word(holder + WORD), target_region.bottom());
    // Two compacting regions: metadata + payload each, then forwarding
    // table + BOT window each (empty windows are skipped).
    assert!(transport.bytes_sent() > 0);
    assert!(transport.events().len() >= 6);
}

/// **Bug this finds:** an abort acknowledged only at phase boundaries,
/// or reported as success.
#[test]
fn test_abort_surfaces_as_interrupted() {
    let fixture = HeapFixture::with_defaults();
    let model = HeaderObjectModel;
    let region = fixture.heap.acquire_region(RegionType::Old).unwrap();
    fixture.new_object(&region, 64, &[], true);
    fixture.finish_marking();

    let pass = FullCompaction::new(Arc::clone(&fixture.heap), &model, 1);
    pass.request_abort();
    assert!(matches!(pass.run(), Err(GcError::Interrupted(_))));
}
