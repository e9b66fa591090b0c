//! Forwarding Table - Old-to-New Address Mapping
//!
//! One table per compacting region, built in the prepare phase and read
//! by the adjust and copy phases. Objects that do not move get no entry;
//! a missed lookup means "not moving", never an error.
//!
//! The tables live outside the objects themselves so headers stay
//! untouched until the copy phase, and so the mapping can be shipped to
//! another server before the copies land there.

use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::util::WORD_SIZE;

/// Per-region mapping from pre-compaction object addresses to their
/// destinations.
pub struct ForwardingTable {
    region_start: usize,
    region_size: usize,

    /// old_offset -> new_address, insertion order preserved so the copy
    /// phase walks objects bottom-up.
    entries: RwLock<IndexMap<usize, usize>>,

    /// Set once the prepare phase finished populating the table.
    complete: AtomicBool,
}

impl ForwardingTable {
    pub fn new(region_start: usize, region_size: usize) -> Self {
        Self {
            region_start,
            region_size,
            entries: RwLock::new(IndexMap::new()),
            complete: AtomicBool::new(false),
        }
    }

    /// Record that the object at `old_address` will move to
    /// `new_address`. Corrupt addresses abort: a bad entry here becomes
    /// silent heap corruption two phases later.
    pub fn add_entry(&self, old_address: usize, new_address: usize) {
        crate::guarantee!(
            new_address != 0 && new_address % WORD_SIZE == 0,
            "forwarding to invalid destination {:#x}",
            new_address
        );
        let offset = old_address.wrapping_sub(self.region_start);
        crate::guarantee!(
            offset < self.region_size,
            "forwarding source {:#x} outside region [{:#x}, {:#x})",
            old_address,
            self.region_start,
            self.region_start + self.region_size
        );
        self.entries.write().insert(offset, new_address);
    }

    /// Destination of the object at `old_address`, or None if it stays
    /// in place.
    pub fn lookup(&self, old_address: usize) -> Option<usize> {
        let offset = old_address.wrapping_sub(self.region_start);
        if offset >= self.region_size {
            return None;
        }
        self.entries.read().get(&offset).copied()
    }

    /// Apply the mapping to an address: forwarded objects resolve to
    /// their destination, everything else stays put.
    pub fn forwarded_or_self(&self, old_address: usize) -> usize {
        self.lookup(old_address).unwrap_or(old_address)
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn set_complete(&self) {
        self.complete.store(true, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot in insertion (bottom-up address) order.
    pub fn entries(&self) -> Vec<(usize, usize)> {
        self.entries
            .read()
            .iter()
            .map(|(&offset, &dest)| (self.region_start + offset, dest))
            .collect()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        self.complete.store(false, Ordering::Release);
    }

    pub fn region_start(&self) -> usize {
        self.region_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGION_START: usize = 0x1000_0000;
    const REGION_SIZE: usize = 0x10_0000;

    #[test]
    fn test_lookup_mapped_and_unmapped() {
        let table = ForwardingTable::new(REGION_START, REGION_SIZE);
        table.add_entry(REGION_START + 0x100, 0x2000_0000);

        assert_eq!(table.lookup(REGION_START + 0x100), Some(0x2000_0000));
        assert_eq!(table.lookup(REGION_START + 0x200), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_lookup_outside_region_is_none() {
        let table = ForwardingTable::new(REGION_START, REGION_SIZE);
        assert!(table.lookup(REGION_START - 8).is_none());
        assert!(table.lookup(REGION_START + REGION_SIZE).is_none());
    }

    #[test]
    fn test_forwarded_or_self() {
        let table = ForwardingTable::new(REGION_START, REGION_SIZE);
        table.add_entry(REGION_START, 0x3000_0000);

        assert_eq!(table.forwarded_or_self(REGION_START), 0x3000_0000);
        assert_eq!(table.forwarded_or_self(REGION_START + 64), REGION_START + 64);
    }

    #[test]
    fn test_entries_keep_insertion_order() {
        let table = ForwardingTable::new(REGION_START, REGION_SIZE);
        table.add_entry(REGION_START + 0x40, 0x2000_0000);
        table.add_entry(REGION_START + 0x80, 0x2000_0040);
        table.add_entry(REGION_START + 0x100, 0x2000_0080);

        let entries = table.entries();
        assert_eq!(entries[0], (REGION_START + 0x40, 0x2000_0000));
        assert_eq!(entries[2], (REGION_START + 0x100, 0x2000_0080));
    }

    #[test]
    fn test_clear_resets_completion() {
        let table = ForwardingTable::new(REGION_START, REGION_SIZE);
        table.add_entry(REGION_START, 0x2000_0000);
        table.set_complete();
        assert!(table.is_complete());

        table.clear();
        assert!(table.is_empty());
        assert!(!table.is_complete());
    }
}
