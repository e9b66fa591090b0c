//! Block Offset Table Tests - Exact block_start Resolution
//!
//! Every heap address must resolve to the exact start of its block.
//! Region-level walks exercise the BOT together with the block-size
//! protocol, the way card scanning uses it.

mod common;

use common::{HeapFixture, WORD};
use dgc::{HeaderObjectModel, ObjectModel, RegionType};

/// Card-layout scenario: 24B, 600B and 2000B objects from the region
/// bottom. The 600B object spans its card boundary and the 2000B object
/// spans several cards.
///
/// **Bug this finds:** a stale or misencoded BOT entry sending a lookup
/// to the wrong object start.
#[test]
fn test_block_start_exact_for_card_spanning_objects() {
    let fixture = HeapFixture::with_defaults();
    let region = fixture.heap.acquire_region(RegionType::Old).unwrap();
    let model = HeaderObjectModel;
    let bitmap = fixture.heap.mark_bitmap();
    let size_of = |obj: usize| model.size_of(obj);

    let a = fixture.new_object(&region, 24, &[], false);
    let b = fixture.new_object(&region, 600, &[], false);
    let c = fixture.new_object(&region, 2000, &[], false);
    assert_eq!(a, region.bottom());

    // Midpoint of the 600-byte object resolves to its start.
    assert_eq!(region.block_start(b + 300, bitmap, &size_of), b);

    // Every word of every object resolves exactly.
    for (start, size) in [(a, 24), (b, 600), (c, 2000)] {
        for offset in (0..size).step_by(WORD) {
            assert_eq!(
                region.block_start(start + offset, bitmap, &size_of),
                start,
                "lookup at {:#x} missed block start {:#x}",
                start + offset,
                start
            );
        }
    }
}

/// **Bug this finds:** back-skip chains drifting on long runs of mixed
/// block sizes, so that deep probes land mid-object.
#[test]
fn test_block_start_exact_across_many_blocks() {
    let fixture = HeapFixture::with_defaults();
    let region = fixture.heap.acquire_region(RegionType::Old).unwrap();
    let model = HeaderObjectModel;
    let bitmap = fixture.heap.mark_bitmap();
    let size_of = |obj: usize| model.size_of(obj);

    // Mixed sizes covering sub-card, exact-card and multi-card blocks.
    let sizes = [16, 24, 512, 48, 4096, 72, 1024, 16, 8192, 264];
    let mut blocks = Vec::new();
    for round in 0..4 {
        for &size in &sizes {
            let size = size + (round % 2) * WORD;
            blocks.push((fixture.new_object(&region, size, &[], false), size));
        }
    }

    for &(start, size) in &blocks {
        for offset in (0..size).step_by(WORD) {
            assert_eq!(
                region.block_start(start + offset, bitmap, &size_of),
                start,
                "lookup at {:#x} missed block start {:#x}",
                start + offset,
                start
            );
        }
    }
}

/// **Bug this finds:** the lookup slow path failing to repair entries
/// after a bulk-allocated buffer is retroactively subdivided into
/// objects, as local allocation buffers are.
#[test]
fn test_block_start_after_lab_subdivision() {
    let fixture = HeapFixture::with_defaults();
    let region = fixture.heap.acquire_region(RegionType::Old).unwrap();
    let model = HeaderObjectModel;
    let bitmap = fixture.heap.mark_bitmap();
    let size_of = |obj: usize| model.size_of(obj);

    // One 8KB buffer claimed as a single block, then carved into
    // 64-byte objects without further BOT updates.
    let lab_size = 8192;
    let (lab, _) = region.allocate(lab_size, lab_size).unwrap();
    let mut objects = Vec::new();
    for offset in (0..lab_size).step_by(64) {
        unsafe { HeaderObjectModel::write_object(lab + offset, 64, &[]) };
        objects.push(lab + offset);
    }

    for &obj in &objects {
        for offset in (0..64).step_by(WORD) {
            assert_eq!(region.block_start(obj + offset, bitmap, &size_of), obj);
        }
    }
}
