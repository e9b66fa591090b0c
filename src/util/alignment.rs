//! Alignment Utilities
//!
//! Helper functions for memory alignment. All heap addresses and object
//! sizes in this crate are word-granular (8-byte words).

/// Heap word size in bytes.
pub const WORD_SIZE: usize = 8;

/// log2 of [`WORD_SIZE`].
pub const LOG_WORD_SIZE: u32 = 3;

/// Align value up to boundary
///
/// # Examples
/// ```
/// use dgc::util::align_up;
/// assert_eq!(align_up(100, 8), 104);
/// assert_eq!(align_up(64, 8), 64);
/// ```
pub fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Align value down to boundary
pub fn align_down(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

/// Check if value is aligned
pub fn is_aligned(value: usize, alignment: usize) -> bool {
    debug_assert!(alignment.is_power_of_two());
    value & (alignment - 1) == 0
}
