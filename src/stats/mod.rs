//! Pause Statistics - Per-Phase Timing
//!
//! Wall-clock timing for the four compaction phases of a pause, kept
//! per pass and logged as one summary line.

use std::time::Duration;

/// Phase timings for one full-compaction pass.
#[derive(Debug, Clone, Default)]
pub struct PhaseTimes {
    pub prepare: Duration,
    pub adjust: Duration,
    pub compact: Duration,
    pub resolve: Duration,
    /// Workers used for the parallel phases.
    pub workers: usize,
}

impl PhaseTimes {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    pub fn total(&self) -> Duration {
        self.prepare + self.adjust + self.compact + self.resolve
    }

    pub fn log_summary(&self) {
        log::info!(
            "full compaction: total {:.2}ms (prepare {:.2}ms, adjust {:.2}ms, compact {:.2}ms, resolve {:.2}ms) with {} workers",
            self.total().as_secs_f64() * 1000.0,
            self.prepare.as_secs_f64() * 1000.0,
            self.adjust.as_secs_f64() * 1000.0,
            self.compact.as_secs_f64() * 1000.0,
            self.resolve.as_secs_f64() * 1000.0,
            self.workers
        );
    }
}
