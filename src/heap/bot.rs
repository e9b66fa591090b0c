//! Block Offset Table - Address-to-Block-Start Resolution
//!
//! One byte per 512-byte card over the whole reserved heap. Each entry
//! answers "how far back from this card's boundary does the block covering
//! the boundary start", either directly (entries `0..=63`, in words) or
//! through a logarithmic backskip chain for blocks that span many cards
//! (entry `64 + i` means "hop back `8^i` cards and look again").
//!
//! Entry encoding:
//! ```text
//!    offset
//!    card             2nd                       3rd
//!     | +- 1st        |                         |
//!     v v             v                         v
//!    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+     +-+-+-+-+-+-+-+-+-+-+-
//!    |x|64 .. 64 .. 64|65|65|65|65| ... |65|66|66|66|66|66|66| ...
//!    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+     +-+-+-+-+-+-+-+-+-+-+-
//!
//!    x   - direct entry of the offset card (words back to block start)
//!    1st - first logarithmic band: 64 + 0, backskip 8^0 = 1 card
//!    2nd - second band:            64 + 1, backskip 8^1 = 8 cards
//!    3rd - third band:             64 + 2, backskip 8^2 = 64 cards
//! ```
//!
//! The table is shared by all regions; each region owns a
//! [`BlockOffsetTablePart`] window with the allocation cursor for its
//! cards. Entries are whole atomic bytes so the concurrent refinement in
//! the lookup slow path never tears a neighbouring entry.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::util::{is_aligned, LOG_WORD_SIZE};

/// log2 of the card size in bytes.
pub const LOG_CARD_BYTES: u32 = 9;

/// Card size in bytes.
pub const CARD_BYTES: usize = 1 << LOG_CARD_BYTES;

/// log2 of the card size in words.
pub const LOG_CARD_WORDS: u32 = LOG_CARD_BYTES - LOG_WORD_SIZE;

/// Card size in words. Also the first logarithmic entry value.
pub const CARD_WORDS: usize = 1 << LOG_CARD_WORDS;

/// log2 of the backskip base: entry `CARD_WORDS + i` hops `8^i` cards.
pub const LOG_BASE: u32 = 3;

/// Number of logarithmic bands. Covers `8^14` cards, far more than any
/// supported region.
pub const N_POWERS: u32 = 14;

#[inline]
fn power_to_cards_back(i: u32) -> usize {
    1 << (LOG_BASE * i)
}

#[inline]
fn entry_to_cards_back(entry: u8) -> usize {
    debug_assert!(entry as usize >= CARD_WORDS);
    power_to_cards_back((entry as usize - CARD_WORDS) as u32)
}

/// The shared entry array covering the whole reserved heap.
pub struct BlockOffsetTable {
    offsets: Box<[AtomicU8]>,
    reserved_start: usize,
    reserved_end: usize,
}

impl BlockOffsetTable {
    /// Create a zeroed table covering `[reserved_start, reserved_start + reserved_size)`.
    pub fn new(reserved_start: usize, reserved_size: usize) -> Self {
        debug_assert!(is_aligned(reserved_size, CARD_BYTES));
        let cards = reserved_size >> LOG_CARD_BYTES;
        let offsets = (0..cards).map(|_| AtomicU8::new(0)).collect();
        Self {
            offsets,
            reserved_start,
            reserved_end: reserved_start + reserved_size,
        }
    }

    /// Card index covering `addr`.
    #[inline]
    pub fn index_for(&self, addr: usize) -> usize {
        debug_assert!(
            addr >= self.reserved_start && addr < self.reserved_end,
            "address {:#x} outside covered range",
            addr
        );
        (addr - self.reserved_start) >> LOG_CARD_BYTES
    }

    /// First address covered by card `index`.
    #[inline]
    pub fn address_for_index(&self, index: usize) -> usize {
        debug_assert!(index <= self.offsets.len());
        self.reserved_start + (index << LOG_CARD_BYTES)
    }

    /// Whether `addr` sits exactly on a card boundary.
    #[inline]
    pub fn is_card_boundary(&self, addr: usize) -> bool {
        is_aligned(addr - self.reserved_start, CARD_BYTES)
    }

    #[inline]
    fn entry(&self, index: usize) -> u8 {
        self.offsets[index].load(Ordering::Relaxed)
    }

    #[inline]
    fn set_entry(&self, index: usize, value: u8) {
        self.offsets[index].store(value, Ordering::Relaxed);
    }

    /// Store the same entry for the closed card interval `[from, to]`.
    fn set_entry_range(&self, from: usize, to: usize, value: u8) {
        for index in from..=to {
            self.set_entry(index, value);
        }
    }

    /// Store a direct entry: card `index` whose boundary is `boundary`
    /// belongs to the block starting at `blk_start`.
    #[inline]
    fn set_direct(&self, index: usize, boundary: usize, blk_start: usize) {
        debug_assert!(blk_start <= boundary);
        let delta_words = (boundary - blk_start) >> LOG_WORD_SIZE;
        debug_assert!(delta_words <= CARD_WORDS);
        self.set_entry(index, delta_words as u8);
    }

    /// The raw byte window backing the cards of `[start, start + size)`.
    ///
    /// Used to ship a region's table slice over a `RegionTransport`. The
    /// bytes stay valid for the lifetime of the table.
    pub fn window_for(&self, start: usize, size: usize) -> (usize, usize) {
        debug_assert!(is_aligned(size, CARD_BYTES));
        let first = self.index_for(start);
        let cards = size >> LOG_CARD_BYTES;
        let base = self.offsets.as_ptr() as usize;
        (base + first, cards)
    }
}

/// Allocation cursor for one region's window of the shared table.
///
/// `next_threshold` is the lowest card boundary no allocation has crossed
/// yet; `next_index` is its card.
struct BotCursor {
    next_threshold: usize,
    next_index: usize,
}

/// One region's view of the shared [`BlockOffsetTable`].
///
/// Writers (the region's allocators) serialize through the owning region's
/// allocation path; readers run concurrently and may refine stale entries
/// in place through the lookup slow path.
pub struct BlockOffsetTablePart {
    bot: Arc<BlockOffsetTable>,
    bottom: usize,
    end: usize,
    cursor: Mutex<BotCursor>,
    /// Set for ContinuesHumongous regions: lookups may walk back past
    /// `bottom` into the owning StartsHumongous region.
    object_can_span: AtomicBool,
}

impl BlockOffsetTablePart {
    /// Create the part for region `[bottom, end)` and reset its entries.
    pub fn new(bot: Arc<BlockOffsetTable>, bottom: usize, end: usize) -> Self {
        debug_assert!(bot.is_card_boundary(bottom));
        let part = Self {
            bot,
            bottom,
            end,
            cursor: Mutex::new(BotCursor {
                next_threshold: 0,
                next_index: 0,
            }),
            object_can_span: AtomicBool::new(false),
        };
        part.reset();
        part
    }

    /// Reset the cursor to an empty region and zero the bottom entry.
    pub fn reset(&self) {
        let mut cursor = self.cursor.lock();
        let bottom_index = self.bot.index_for(self.bottom);
        self.bot.set_entry(bottom_index, 0);
        cursor.next_index = bottom_index + 1;
        cursor.next_threshold = self.bot.address_for_index(cursor.next_index);
    }

    /// Rebind the cursor after the region's entries arrived from a remote
    /// server: the entries up to `top` are already populated, only the
    /// cursor is local state.
    pub fn reset_after_transfer(&self, top: usize) {
        if top == self.bottom {
            self.reset();
            return;
        }
        let mut cursor = self.cursor.lock();
        cursor.next_index = self.bot.index_for(top - 1) + 1;
        cursor.next_threshold = self.bot.address_for_index(cursor.next_index);
    }

    /// The heap-wide table this part is a window of.
    pub fn shared_table(&self) -> &Arc<BlockOffsetTable> {
        &self.bot
    }

    pub fn set_object_can_span(&self, can_span: bool) {
        self.object_can_span.store(can_span, Ordering::Relaxed);
    }

    pub fn object_can_span(&self) -> bool {
        self.object_can_span.load(Ordering::Relaxed)
    }

    /// Record the allocation of `[blk_start, blk_end)`.
    ///
    /// Cheap no-op unless the block crosses the next uncrossed card
    /// boundary. Callers serialize through the region's allocation path.
    pub fn alloc_block(&self, blk_start: usize, blk_end: usize) {
        let mut cursor = self.cursor.lock();
        if blk_end > cursor.next_threshold {
            let BotCursor {
                ref mut next_threshold,
                ref mut next_index,
            } = *cursor;
            self.alloc_block_work(next_threshold, next_index, blk_start, blk_end);
        }
    }

    /// Re-seed the window for a humongous series: one block from `bottom`
    /// to `obj_top`, plus the trailing filler if any.
    pub fn set_for_starts_humongous(&self, obj_top: usize, fill_size: usize) {
        // The first entry keeps offset 0.
        self.reset();
        self.alloc_block(self.bottom, obj_top);
        if fill_size > 0 {
            self.alloc_block(obj_top, obj_top + fill_size);
        }
    }

    /// Update the entries for a block `[blk_start, blk_end)` that crosses
    /// `*threshold`, and advance the threshold/index pair past the block.
    ///
    /// ```text
    ///              threshold
    ///              |   index
    ///              v   v
    ///      +-------+-------+-------+-------+-------+
    ///      | i-1   |   i   | i+1   | i+2   | i+3   |
    ///      +-------+-------+-------+-------+-------+
    ///       ( ^    ]
    ///         blk_start
    /// ```
    fn alloc_block_work(
        &self,
        threshold: &mut usize,
        index: &mut usize,
        blk_start: usize,
        blk_end: usize,
    ) {
        debug_assert!(blk_end > blk_start, "phantom block");
        debug_assert!(blk_end > *threshold, "should be past threshold");
        debug_assert!(blk_start <= *threshold, "blk_start at or before threshold");
        debug_assert!(
            *threshold - blk_start <= CARD_BYTES,
            "offset should fit a direct entry"
        );
        debug_assert_eq!(*threshold, self.bot.address_for_index(*index));

        // Mark the card that holds the offset into the block. The cursor
        // is not updated until the end of this method.
        self.bot.set_direct(*index, *threshold, blk_start);

        // Mark the subsequent cards the block spans.
        let end_index = self.bot.index_for(blk_end - 1);
        if *index + 1 <= end_index {
            let rem_start = self.bot.address_for_index(*index + 1);
            let rem_end = self.bot.address_for_index(end_index) + CARD_BYTES;
            self.set_remainder_to_point_to_start(rem_start, rem_end);
        }

        *index = end_index + 1;
        *threshold = self.bot.address_for_index(end_index) + CARD_BYTES;
        debug_assert!(*threshold >= blk_end, "incorrect offset threshold");
    }

    /// Write the backskip bands for the card range `[start, end)` (byte
    /// addresses, card-aligned), whose block starts in the card before
    /// `start`.
    fn set_remainder_to_point_to_start(&self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let start_card = self.bot.index_for(start);
        let end_card = self.bot.index_for(end - 1);
        debug_assert_eq!(start, self.bot.address_for_index(start_card));
        debug_assert_eq!(end, self.bot.address_for_index(end_card) + CARD_BYTES);
        self.set_remainder_to_point_to_start_incl(start_card, end_card);
    }

    /// Closed-interval variant of [`Self::set_remainder_to_point_to_start`].
    fn set_remainder_to_point_to_start_incl(&self, start_card: usize, end_card: usize) {
        if start_card > end_card {
            return;
        }
        debug_assert!(
            start_card > self.bot.index_for(self.bottom),
            "cannot be the first card"
        );
        debug_assert!(
            self.bot.entry(start_card - 1) as usize <= CARD_WORDS,
            "offset card has an unexpected value"
        );

        let mut start_card_for_band = start_card;
        for i in 0..N_POWERS {
            // -1 so the card with the actual offset is counted, another -1
            // so the band ends in this region and not at the start of the
            // next.
            let reach = start_card - 1 + (power_to_cards_back(i + 1) - 1);
            let entry = (CARD_WORDS as u32 + i) as u8;
            if reach >= end_card {
                self.bot.set_entry_range(start_card_for_band, end_card, entry);
                break;
            }
            self.bot.set_entry_range(start_card_for_band, reach, entry);
            start_card_for_band = reach + 1;
        }

        #[cfg(debug_assertions)]
        self.check_all_cards(start_card, end_card);
    }

    /// Expensive backskip-chain check over the closed interval
    /// `[start_card, end_card]`. Debug builds only.
    #[cfg(debug_assertions)]
    fn check_all_cards(&self, start_card: usize, end_card: usize) {
        if end_card < start_card {
            return;
        }
        assert_eq!(
            self.bot.entry(start_card) as usize,
            CARD_WORDS,
            "wrong value in second card"
        );
        for c in start_card + 1..=end_card {
            let entry = self.bot.entry(c);
            if c - start_card > power_to_cards_back(1) {
                assert!(
                    entry as usize > CARD_WORDS,
                    "card {} should be in a logarithmic band, entry {}",
                    c,
                    entry
                );
            }
            let backskip = entry_to_cards_back(entry);
            let landing_card = c - backskip;
            assert!(landing_card >= start_card - 1);
            if landing_card >= start_card {
                assert!(
                    self.bot.entry(landing_card) <= entry,
                    "monotonicity: landing entry {}, entry {}",
                    self.bot.entry(landing_card),
                    entry
                );
            } else {
                assert!(self.bot.entry(landing_card) as usize <= CARD_WORDS);
            }
        }
    }

    /// Start of the block containing `addr`, exact for every byte of every
    /// block at or below `top`.
    ///
    /// `block_size` supplies the size in bytes of the block starting at a
    /// given address; the table never interprets heap contents itself.
    pub fn block_start(
        &self,
        addr: usize,
        top: usize,
        block_size: &dyn Fn(usize) -> usize,
    ) -> usize {
        if addr >= top {
            return top;
        }
        let q = self.block_at_or_preceding(addr);
        let n = q + block_size(q);
        if n > addr {
            return q;
        }
        self.forward_to_block_containing_addr_slow(q, n, addr, top, block_size)
    }

    /// Follow the backskip chain to a direct entry at or before `addr`.
    fn block_at_or_preceding(&self, addr: usize) -> usize {
        let mut index = self.bot.index_for(addr);
        let mut entry = self.bot.entry(index);
        while entry as usize >= CARD_WORDS {
            index -= entry_to_cards_back(entry);
            entry = self.bot.entry(index);
        }
        let q = self.bot.address_for_index(index) - ((entry as usize) << LOG_WORD_SIZE);
        debug_assert!(
            q >= self.bottom || self.object_can_span(),
            "walked below region bottom without object_can_span"
        );
        q
    }

    /// Slow path: the entry was stale because a previously recorded bump
    /// allocation was subdivided into several objects afterwards. Repair
    /// the entries in place while answering the query.
    fn forward_to_block_containing_addr_slow(
        &self,
        mut q: usize,
        mut n: usize,
        addr: usize,
        top: usize,
        block_size: &dyn Fn(usize) -> usize,
    ) -> usize {
        let n_index = self.bot.index_for(n);
        let next_index = n_index + usize::from(!self.bot.is_card_boundary(n));
        // If n is not on a boundary already, step to the boundary.
        let mut next_boundary = self.bot.address_for_index(n_index)
            + if n_index == next_index { 0 } else { CARD_BYTES };
        let mut repair_index = next_index;

        if addr >= top {
            return top;
        }
        while next_boundary < addr {
            while n <= next_boundary {
                q = n;
                n += block_size(q);
            }
            debug_assert!(q <= next_boundary && n > next_boundary);
            // [q, n) is the block that crosses the boundary.
            self.alloc_block_work(&mut next_boundary, &mut repair_index, q, n);
        }
        while n <= addr {
            q = n;
            n += block_size(q);
        }
        q
    }

    /// Walk every entry of a non-empty region and abort on a broken chain.
    ///
    /// Direct entries must reach the current card by iterating the blocks
    /// that follow them; logarithmic entries must skip backwards without
    /// leaving the region.
    pub fn verify(&self, top: usize, block_size: &dyn Fn(usize) -> usize) {
        if top <= self.bottom {
            return;
        }
        let start_card = self.bot.index_for(self.bottom);
        let end_card = self.bot.index_for(top - 1);

        for current_card in start_card..end_card {
            let entry = self.bot.entry(current_card);
            if (entry as usize) < CARD_WORDS {
                let card_address = self.bot.address_for_index(current_card);
                let mut obj_end = card_address - ((entry as usize) << LOG_WORD_SIZE);
                while obj_end < card_address {
                    let obj = obj_end;
                    let obj_size = block_size(obj);
                    obj_end = obj + obj_size;
                    crate::guarantee!(
                        obj_end > obj && obj_end <= top,
                        "block offset table broken: obj {:#x} size {} end {:#x} top {:#x}",
                        obj,
                        obj_size,
                        obj_end,
                        top
                    );
                }
            } else {
                // Entries may be refined lazily, so only check that the
                // backskip goes backwards and stays inside the region.
                let backskip = entry_to_cards_back(entry);
                crate::guarantee!(backskip >= 1, "backskip must go back at least one card");
                crate::guarantee!(
                    backskip <= current_card - start_card,
                    "backskip {} crosses region start at card {}",
                    backskip,
                    current_card
                );
            }
        }
    }
}
