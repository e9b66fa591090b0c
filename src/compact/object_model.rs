//! Object Model - How the Collector Reads Objects
//!
//! The collector never hardcodes an object layout. Sizing, reference
//! iteration and header repair go through this trait so the runtime
//! embedding the collector supplies its own layout.

use crate::util::WORD_SIZE;

/// Layout knowledge the compaction phases need about heap objects.
///
/// All addresses are absolute object start addresses inside the heap
/// mapping. Implementations must be callable from multiple GC workers
/// at once.
pub trait ObjectModel: Sync {
    /// Object size in bytes, word-aligned.
    fn size_of(&self, obj: usize) -> usize;

    /// Call `f` with the address of every reference field in `obj`.
    fn for_each_reference(&self, obj: usize, f: &mut dyn FnMut(usize));

    /// Repair the header of a just-copied object at `obj`. Runtimes that
    /// encode a mark or forwarding state in the header reset it here.
    fn reinit_header(&self, obj: usize);
}

/// Minimal self-describing layout used by the collector's own tests:
/// one header word holding the byte size in the low half and the
/// reference-field count in the high half, followed by the reference
/// fields, then payload.
pub struct HeaderObjectModel;

impl HeaderObjectModel {
    const SIZE_MASK: u64 = 0xFFFF_FFFF;

    pub fn encode_header(size_bytes: usize, ref_count: usize) -> u64 {
        debug_assert!(size_bytes as u64 <= Self::SIZE_MASK);
        debug_assert!(size_bytes % WORD_SIZE == 0);
        debug_assert!((1 + ref_count) * WORD_SIZE <= size_bytes);
        size_bytes as u64 | ((ref_count as u64) << 32)
    }

    /// Write a header at `obj`. Test setup helper.
    ///
    /// # Safety
    /// `obj` must point at `size_bytes` of writable memory.
    pub unsafe fn write_object(obj: usize, size_bytes: usize, refs: &[usize]) {
        let header = Self::encode_header(size_bytes, refs.len());
        (obj as *mut u64).write(header);
        for (i, &target) in refs.iter().enumerate() {
            ((obj + (1 + i) * WORD_SIZE) as *mut usize).write(target);
        }
    }

    fn header(obj: usize) -> u64 {
        unsafe { (obj as *const u64).read() }
    }
}

impl ObjectModel for HeaderObjectModel {
    fn size_of(&self, obj: usize) -> usize {
        (Self::header(obj) & Self::SIZE_MASK) as usize
    }

    fn for_each_reference(&self, obj: usize, f: &mut dyn FnMut(usize)) {
        let ref_count = (Self::header(obj) >> 32) as usize;
        for i in 0..ref_count {
            f(obj + (1 + i) * WORD_SIZE);
        }
    }

    fn reinit_header(&self, _obj: usize) {
        // The header travels with the copy; nothing to repair.
    }
}
