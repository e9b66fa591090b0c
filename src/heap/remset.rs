//! Remembered Set - Inbound Reference Tracking
//!
//! Each region records which (region, card) pairs elsewhere in the heap
//! hold references into it. The refinement machinery that populates these
//! sets lives outside this crate; the region owns the lifecycle (clear on
//! recycle, size queries for collection-set cost prediction).

use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};

/// A single inbound reference location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CardRef {
    /// Region holding the reference.
    pub from_region: u32,
    /// Card within that region.
    pub card: u32,
}

/// Per-region remembered set.
pub struct RememberedSet {
    cards: RwLock<IndexSet<CardRef>>,
    /// Serializes `clear_locked` against concurrent structural updates
    /// from refinement while mutators are running.
    update_lock: Mutex<()>,
}

impl Default for RememberedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RememberedSet {
    pub fn new() -> Self {
        Self {
            cards: RwLock::new(IndexSet::new()),
            update_lock: Mutex::new(()),
        }
    }

    /// Record that `from_region`'s `card` holds a reference into this
    /// region. Returns true if the card was not yet present.
    pub fn add_reference(&self, from_region: u32, card: u32) -> bool {
        self.cards.write().insert(CardRef { from_region, card })
    }

    /// Number of recorded cards. Feeds the collection-set RS-length
    /// predictions.
    pub fn occupied(&self) -> usize {
        self.cards.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.read().is_empty()
    }

    /// Drop all entries. Callers guarantee no concurrent refinement (at a
    /// pause, or for a region no mutator can reference).
    pub fn clear(&self) {
        self.cards.write().clear();
    }

    /// Drop all entries while refinement may still be running.
    pub fn clear_locked(&self) {
        let _guard = self.update_lock.lock();
        self.cards.write().clear();
    }

    /// Snapshot of the recorded cards, for scanning at a pause.
    pub fn cards(&self) -> Vec<CardRef> {
        self.cards.read().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_occupied() {
        let rs = RememberedSet::new();
        assert!(rs.is_empty());

        assert!(rs.add_reference(3, 17));
        assert!(rs.add_reference(3, 18));
        // Duplicate card is idempotent.
        assert!(!rs.add_reference(3, 17));

        assert_eq!(rs.occupied(), 2);
    }

    #[test]
    fn test_clear() {
        let rs = RememberedSet::new();
        rs.add_reference(1, 2);
        rs.add_reference(2, 3);

        rs.clear();
        assert!(rs.is_empty());

        rs.add_reference(1, 2);
        rs.clear_locked();
        assert!(rs.is_empty());
    }
}
