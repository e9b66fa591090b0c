//! Configuration Module - GC Tuning Parameters
//!
//! Manages all configuration parameters for DGC, plus the fixed
//! [`HeapGeometry`] derived from them once at heap setup. The geometry is
//! immutable after construction and is passed by reference to every
//! component that needs region or card arithmetic; nothing in the crate
//! reads geometry from global state.

use crate::error::{GcError, Result};
use crate::util::align_down;

pub const KB: usize = 1024;
pub const MB: usize = 1024 * 1024;
pub const GB: usize = 1024 * 1024 * 1024;

/// Smallest supported region size.
pub const MIN_REGION_SIZE: usize = MB;

/// Largest supported region size.
pub const MAX_REGION_SIZE: usize = 32 * MB;

/// Region-size derivation aims for roughly this many regions.
const TARGET_REGION_COUNT: usize = 2048;

/// Main configuration for the disaggregated garbage collector
///
/// Stores all parameters affecting GC behavior.
/// Most parameters have sensible defaults.
///
/// # Examples
///
/// ```rust
/// use dgc::GcConfig;
///
/// // Use default configuration
/// let config = GcConfig::default();
///
/// // Custom configuration for low-latency
/// let config = GcConfig {
///     target_pause_time_ms: 5,
///     gc_threads: Some(8),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Minimum heap size in bytes
    ///
    /// Only feeds region-size derivation; the backing mapping is reserved
    /// at `max_heap_size` up front.
    /// Default: 1/4 of max_heap_size or 16MB (whichever is larger)
    pub min_heap_size: usize,

    /// Maximum heap size in bytes
    ///
    /// Hard limit; rounded down to a whole number of regions.
    /// Default: 256MB
    pub max_heap_size: usize,

    /// Target pause time in milliseconds
    ///
    /// Collection-set finalization stops adding regions once their summed
    /// predicted cost reaches this budget.
    ///
    /// Default: 10ms
    pub target_pause_time_ms: u64,

    /// Number of GC worker threads for parallel pause phases
    ///
    /// If None, auto-detects based on CPU cores: gc_threads = min(4, num_cpus / 2)
    ///
    /// Default: Auto-detect
    pub gc_threads: Option<usize>,

    /// Maximum regions admitted to the optional collection set per pause
    ///
    /// 0 disables the optional set entirely.
    ///
    /// Default: 0
    pub optional_cset_max_regions: u32,

    /// Suspendible-thread-set convergence timeout in milliseconds
    ///
    /// If > 0, a `synchronize()` that waits longer than this for the
    /// joined threads to yield is treated as a hung collector and aborts
    /// with a diagnostic. 0 disables the check.
    ///
    /// Default: 0
    pub sts_timeout_ms: u64,

    /// Enable verbose GC logging
    ///
    /// Logs region lifecycle transitions and per-phase timings at info
    /// level instead of debug.
    /// Default: false
    pub verbose: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        let max_heap = 256 * MB;

        GcConfig {
            min_heap_size: (max_heap / 4).max(16 * MB),
            max_heap_size: max_heap,
            target_pause_time_ms: 10,
            gc_threads: Some((num_cpus / 2).clamp(1, 4)),
            optional_cset_max_regions: 0,
            sts_timeout_ms: 0,
            verbose: false,
        }
    }
}

impl GcConfig {
    /// Validate configuration
    ///
    /// Checks if all values are in valid ranges.
    /// Returns error if configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_heap_size == 0 {
            return Err(GcError::Configuration(
                "max_heap_size must be > 0".to_string(),
            ));
        }

        if self.min_heap_size > self.max_heap_size {
            return Err(GcError::Configuration(
                "min_heap_size cannot exceed max_heap_size".to_string(),
            ));
        }

        if self.max_heap_size < MIN_REGION_SIZE {
            return Err(GcError::Configuration(format!(
                "max_heap_size must be at least one region ({} bytes)",
                MIN_REGION_SIZE
            )));
        }

        if let Some(threads) = self.gc_threads {
            if threads == 0 {
                return Err(GcError::Configuration(
                    "gc_threads must be > 0".to_string(),
                ));
            }
        }

        if self.target_pause_time_ms == 0 {
            return Err(GcError::Configuration(
                "target_pause_time_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - DGC_MAX_HEAP
    /// - DGC_MIN_HEAP
    /// - DGC_PAUSE_TIME_MS
    /// - DGC_GC_THREADS
    /// - DGC_OPTIONAL_REGIONS
    /// - DGC_STS_TIMEOUT_MS
    /// - DGC_VERBOSE
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DGC_MAX_HEAP") {
            if let Ok(size) = val.parse::<usize>() {
                config.max_heap_size = size;
            }
        }

        if let Ok(val) = std::env::var("DGC_MIN_HEAP") {
            if let Ok(size) = val.parse::<usize>() {
                config.min_heap_size = size;
            }
        }

        if let Ok(val) = std::env::var("DGC_PAUSE_TIME_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.target_pause_time_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("DGC_GC_THREADS") {
            if let Ok(threads) = val.parse::<usize>() {
                config.gc_threads = Some(threads);
            }
        }

        if let Ok(val) = std::env::var("DGC_OPTIONAL_REGIONS") {
            if let Ok(n) = val.parse::<u32>() {
                config.optional_cset_max_regions = n;
            }
        }

        if let Ok(val) = std::env::var("DGC_STS_TIMEOUT_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.sts_timeout_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("DGC_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Number of worker threads to use for parallel pause phases.
    pub fn worker_threads(&self) -> usize {
        self.gc_threads
            .unwrap_or_else(|| (num_cpus::get() / 2).clamp(1, 4))
    }
}

/// Fixed heap layout derived from a [`GcConfig`] once at setup.
///
/// Region size is a power of two between [`MIN_REGION_SIZE`] and
/// [`MAX_REGION_SIZE`], chosen so the average of min and max heap sizes
/// yields about [`TARGET_REGION_COUNT`] regions. The heap itself is the
/// max heap size rounded down to whole regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapGeometry {
    /// Bytes per region. Power of two.
    pub region_size: usize,

    /// log2 of `region_size`.
    pub log_region_size: u32,

    /// Total committed heap bytes; multiple of `region_size`.
    pub heap_size: usize,

    /// Number of regions covering the heap.
    pub region_count: usize,
}

impl HeapGeometry {
    /// Derive the geometry from a validated configuration.
    pub fn compute(config: &GcConfig) -> Result<HeapGeometry> {
        config.validate()?;

        let average = (config.min_heap_size / 2) + (config.max_heap_size / 2);
        let raw = average / TARGET_REGION_COUNT;
        let region_size = raw
            .checked_next_power_of_two()
            .unwrap_or(MAX_REGION_SIZE)
            .clamp(MIN_REGION_SIZE, MAX_REGION_SIZE);

        let heap_size = align_down(config.max_heap_size, region_size);
        if heap_size == 0 {
            return Err(GcError::Configuration(format!(
                "max_heap_size {} smaller than one region ({})",
                config.max_heap_size, region_size
            )));
        }

        Ok(HeapGeometry {
            region_size,
            log_region_size: region_size.trailing_zeros(),
            heap_size,
            region_count: heap_size / region_size,
        })
    }

    /// Index of the region containing the byte at `offset` from heap base.
    #[inline]
    pub fn region_index_for_offset(&self, offset: usize) -> usize {
        debug_assert!(offset < self.heap_size);
        offset >> self.log_region_size
    }
}
