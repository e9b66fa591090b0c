//! Mark Bitmap - Tracking Marked Objects
//!
//! One bit per heap word over the whole reserved heap. Marking happens
//! upstream of this crate; compaction and liveness queries read the bits
//! and clear them region by region once objects have moved.
//!
//! Bitmap structure:
//! ```text
//! Heap: 64MB
//! Granularity: 8 bytes per bit (one heap word)
//! Bitmap size: 64MB / 8 / 8 = 1MB
//!
//! Object at address base + 4096:
//! - Bit index: 4096 / 8 = 512
//! - Word index: 512 / 64 = 8
//! - Bit offset: 512 % 64 = 0
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::util::{is_aligned, LOG_WORD_SIZE, WORD_SIZE};

/// MarkBitmap - liveness bits for every word of the heap
///
/// All accesses use relaxed ordering: marking completes before any reader
/// of this bitmap starts (the pause is the synchronization point), so the
/// bits only need atomicity, not ordering.
pub struct MarkBitmap {
    /// Raw bitmap data, 1 bit per heap word
    bits: Box<[AtomicU64]>,

    /// First byte address covered
    base_address: usize,

    /// Bytes covered
    covered_size: usize,
}

impl MarkBitmap {
    /// Create a cleared bitmap covering `[base_address, base_address + covered_size)`.
    pub fn new(base_address: usize, covered_size: usize) -> Self {
        debug_assert!(is_aligned(base_address, WORD_SIZE));
        debug_assert!(is_aligned(covered_size, WORD_SIZE));

        let bit_count = covered_size >> LOG_WORD_SIZE;
        let word_count = (bit_count + 63) / 64;
        let bits = (0..word_count).map(|_| AtomicU64::new(0)).collect();

        Self {
            bits,
            base_address,
            covered_size,
        }
    }

    #[inline]
    fn bit_index(&self, address: usize) -> usize {
        debug_assert!(
            address >= self.base_address && address < self.base_address + self.covered_size,
            "address {:#x} outside bitmap coverage",
            address
        );
        debug_assert!(is_aligned(address, WORD_SIZE));
        (address - self.base_address) >> LOG_WORD_SIZE
    }

    /// Set the mark bit for `address`.
    pub fn mark(&self, address: usize) {
        let bit = self.bit_index(address);
        self.bits[bit / 64].fetch_or(1 << (bit % 64), Ordering::Relaxed);
    }

    /// Clear the mark bit for `address`.
    pub fn clear(&self, address: usize) {
        let bit = self.bit_index(address);
        self.bits[bit / 64].fetch_and(!(1 << (bit % 64)), Ordering::Relaxed);
    }

    /// Check whether `address` is marked.
    pub fn is_marked(&self, address: usize) -> bool {
        let bit = self.bit_index(address);
        (self.bits[bit / 64].load(Ordering::Relaxed) & (1 << (bit % 64))) != 0
    }

    /// First marked address in `[from, limit)`, or `limit` if none.
    ///
    /// Scans a word at a time so a sparse region costs one load per 64
    /// heap words.
    pub fn get_next_marked_addr(&self, from: usize, limit: usize) -> usize {
        debug_assert!(from <= limit);
        if from >= limit {
            return limit;
        }

        let start_bit = self.bit_index(from);
        let end_bit = (limit - self.base_address) >> LOG_WORD_SIZE;

        let mut word_index = start_bit / 64;
        // Mask off bits below the starting position in the first word.
        let mut word =
            self.bits[word_index].load(Ordering::Relaxed) & (u64::MAX << (start_bit % 64));

        loop {
            if word != 0 {
                let bit = word_index * 64 + word.trailing_zeros() as usize;
                if bit >= end_bit {
                    return limit;
                }
                return self.base_address + (bit << LOG_WORD_SIZE);
            }
            word_index += 1;
            if word_index * 64 >= end_bit {
                return limit;
            }
            word = self.bits[word_index].load(Ordering::Relaxed);
        }
    }

    /// Clear every bit in `[from, limit)`.
    pub fn clear_range(&self, from: usize, limit: usize) {
        debug_assert!(from <= limit);
        if from >= limit {
            return;
        }

        let start_bit = self.bit_index(from);
        let end_bit = (limit - self.base_address) >> LOG_WORD_SIZE;

        let first_word = start_bit / 64;
        let last_word = (end_bit + 63) / 64;
        for word_index in first_word..last_word {
            let lo = if word_index == first_word {
                start_bit % 64
            } else {
                0
            };
            let hi = if (word_index + 1) * 64 > end_bit {
                end_bit - word_index * 64
            } else {
                64
            };
            let mask = if hi - lo == 64 {
                u64::MAX
            } else {
                ((1u64 << (hi - lo)) - 1) << lo
            };
            self.bits[word_index].fetch_and(!mask, Ordering::Relaxed);
        }
    }

    /// Clear all bits.
    pub fn clear_all(&self) {
        for word in self.bits.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Number of marked words in `[from, limit)`.
    pub fn count_marked_words(&self, from: usize, limit: usize) -> usize {
        let mut count = 0;
        let mut addr = self.get_next_marked_addr(from, limit);
        while addr < limit {
            count += 1;
            addr = self.get_next_marked_addr(addr + WORD_SIZE, limit);
        }
        count
    }

    /// Base address of the covered range.
    pub fn base_address(&self) -> usize {
        self.base_address
    }
}
