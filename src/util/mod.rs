//! Small utilities shared across the collector.

pub mod alignment;

pub use alignment::{align_down, align_up, is_aligned, LOG_WORD_SIZE, WORD_SIZE};
