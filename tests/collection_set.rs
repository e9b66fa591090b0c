//! Collection Set Tests - Membership and Budget Invariants

mod common;

use common::HeapFixture;
use dgc::{CollectionSet, CsetChooser, HeapRegion, OptionalEvacuation, RankedChooser, RegionType};
use std::collections::HashSet;
use std::sync::Arc;

fn old_candidate(fixture: &HeapFixture, predicted_ms: f64) -> Arc<HeapRegion> {
    let region = fixture.heap.acquire_region(RegionType::Old).unwrap();
    region.allocate(4096, 4096).unwrap();
    region.record_prediction(10, predicted_ms);
    // Equal reclaimable bytes, so cheaper regions rank more efficient.
    region.calc_gc_efficiency(predicted_ms);
    region
}

/// **Bug this finds:** young and old counters drifting from the actual
/// member array, or a region appended twice.
#[test]
fn test_length_invariants_and_uniqueness() {
    let fixture = HeapFixture::with_defaults();
    let cset = CollectionSet::new(Arc::clone(&fixture.heap), 0);
    cset.start_incremental_building();

    for _ in 0..3 {
        let eden = fixture.heap.acquire_region(RegionType::Eden).unwrap();
        eden.record_prediction(2, 0.5);
        cset.add_eden_region(&eden);
    }
    let survivors: Vec<_> = (0..2)
        .map(|_| {
            let s = fixture.heap.acquire_region(RegionType::Survivor).unwrap();
            s.record_prediction(1, 0.25);
            s
        })
        .collect();

    let remaining = cset.finalize_young_part(20.0, &survivors);
    let mut chooser = RankedChooser::new(vec![
        old_candidate(&fixture, 1.0),
        old_candidate(&fixture, 2.0),
    ]);
    cset.finalize_old_part(remaining, &mut chooser);

    assert_eq!(
        cset.young_region_length(),
        cset.eden_region_length() + cset.survivor_region_length()
    );
    assert_eq!(
        cset.region_length(),
        (cset.young_region_length() + cset.old_region_length()) as usize
    );

    let mut seen = HashSet::new();
    cset.iterate(|region| {
        assert!(
            seen.insert(region.index()),
            "region {} appears twice in the collection set",
            region.index()
        );
        assert!(region.in_collection_set());
    });
    assert_eq!(seen.len(), cset.region_length());
}

/// Budget scenario: a 7ms budget against old candidates predicted at
/// 2ms, 4ms and 5ms must take exactly the first two.
///
/// **Bug this finds:** the old-part loop overrunning the pause budget,
/// or dropping the first candidate that does not fit instead of
/// returning it to the chooser.
#[test]
fn test_old_part_takes_exactly_what_fits_seven_ms() {
    let fixture = HeapFixture::with_defaults();
    let cset = CollectionSet::new(Arc::clone(&fixture.heap), 0);
    cset.start_incremental_building();
    let remaining = cset.finalize_young_part(7.0, &[]);

    let r2 = old_candidate(&fixture, 2.0);
    let r4 = old_candidate(&fixture, 4.0);
    let r5 = old_candidate(&fixture, 5.0);
    let mut chooser = RankedChooser::new(vec![r5.clone(), r4.clone(), r2.clone()]);

    let left = cset.finalize_old_part(remaining, &mut chooser);

    assert_eq!(cset.old_region_length(), 2);
    assert!(r2.in_collection_set());
    assert!(r4.in_collection_set());
    assert!(!r5.in_collection_set());
    assert_eq!(chooser.remaining(), 1);
    assert!((left - 1.0).abs() < 1e-9);
}

/// **Bug this finds:** refinement updates between pauses being lost
/// instead of folded into the totals at finalization.
#[test]
fn test_refinement_updates_survive_finalization() {
    let fixture = HeapFixture::with_defaults();
    let cset = CollectionSet::new(Arc::clone(&fixture.heap), 0);
    cset.start_incremental_building();

    let eden = fixture.heap.acquire_region(RegionType::Eden).unwrap();
    eden.record_prediction(8, 1.0);
    cset.add_eden_region(&eden);
    cset.update_young_region_prediction(&eden, 20, 3.0);

    let remaining = cset.finalize_young_part(10.0, &[]);
    assert!((remaining - 7.0).abs() < 1e-9);
    assert_eq!(cset.recorded_rs_lengths(), 20);
}

/// **Bug this finds:** optional regions leaking membership flags when a
/// pause ends before their evacuation window.
#[test]
fn test_optional_overflow_returns_cleanly() {
    let fixture = HeapFixture::with_defaults();
    let cset = CollectionSet::new(Arc::clone(&fixture.heap), 2);
    cset.start_incremental_building();
    cset.finalize_young_part(1.0, &[]);

    let a = old_candidate(&fixture, 2.0);
    let b = old_candidate(&fixture, 3.0);
    let mut chooser = RankedChooser::new(vec![a.clone(), b.clone()]);
    // Budget 1ms: neither fits the main set, both go optional.
    cset.finalize_old_part(1.0, &mut chooser);
    assert_eq!(cset.optional_region_length(), 2);

    {
        let mut evac = OptionalEvacuation::new(&cset, &mut chooser);
        // Time only for the first.
        assert_eq!(evac.prepare_evacuation(2.0), 1);
        evac.complete_evacuation(&[]);
    }

    assert!(a.in_collection_set());
    assert!(!b.in_collection_set());
    assert_eq!(chooser.remaining(), 1);

    cset.clear();
    assert_eq!(cset.region_length(), 0);
    assert!(!a.in_collection_set());
}
