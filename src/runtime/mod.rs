//! Runtime Module - Thread Coordination
//!
//! Coordination between the concurrent GC threads and the pause
//! controller. The suspendible thread set is how concurrent phases stop
//! cleanly at a safepoint without being preempted mid-object.

pub mod suspendible;

pub use suspendible::SuspendibleThreadSet;
