//! Liveness tracking collaborators.
//!
//! The collector consumes marking results; it does not produce them. The
//! marking pipeline itself lives outside this crate and hands over a
//! populated [`MarkBitmap`].

pub mod bitmap;

pub use bitmap::MarkBitmap;
