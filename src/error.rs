//! Error Module - DGC Error Types
//!
//! Defines all error types used in DGC.
//!
//! Expected exhaustion (a full region, an empty chooser, a missed CAS) is
//! never an error: those paths return `Option`/`bool`. Errors are reserved
//! for setup failures, state-machine violations, and the remote transport.
//! Violations of invariants that must never be crossed even in release
//! builds go through [`fatal!`](crate::fatal) instead of `Result`.

use thiserror::Error;

/// Main error type for all DGC operations
///
/// # Examples
///
/// ```rust
/// use dgc::error::GcError;
///
/// fn handle_error(err: GcError) {
///     match err {
///         GcError::OutOfMemory { requested, available } => {
///             eprintln!("OOM: requested {}, available {}", requested, available);
///         }
///         _ => {
///             eprintln!("Other error: {}", err);
///         }
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum GcError {
    /// Out of memory - heap exhaustion
    ///
    /// **When returned:** No free region satisfies the request
    ///
    /// **Recovery strategy:** Trigger a collection pause or fail gracefully
    #[error("Out of memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: usize, available: usize },

    /// Heap initialization failed
    ///
    /// **When returned:** Backing memory reservation or region setup fails
    ///
    /// **Recovery strategy:** Cannot recover - terminate gracefully
    #[error("Heap initialization failed: {0}")]
    HeapInitialization(String),

    /// Configuration error
    ///
    /// **When returned:** Invalid tunables detected by `GcConfig::validate`
    ///
    /// **Recovery strategy:** Use default configuration or fail fast
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid state
    ///
    /// **When returned:** Internal state machine violation
    ///
    /// **Recovery strategy:** Cannot recover - indicates bug
    ///
    /// **Example scenario:** collection set built while Inactive
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Invalid argument
    ///
    /// **When returned:** Function argument fails validation
    ///
    /// **Recovery strategy:** Fix caller to provide valid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Remote transfer failed
    ///
    /// **When returned:** A `RegionTransport` send/receive reports failure
    ///
    /// **Recovery strategy:** None during a pause; callers outside a pause
    /// may retry
    #[error("Remote transfer failed: {0}")]
    TransferFailed(String),

    /// Operation timeout
    ///
    /// **When returned:** Operation exceeded time limit
    ///
    /// **Recovery strategy:** Retry with longer timeout or fail
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// The current pass was interrupted by the abort flag
    ///
    /// **When returned:** A compaction pass observed its abort flag between
    /// per-region work items and stopped claiming work
    ///
    /// **Recovery strategy:** Completed phase work stands; a later pause
    /// starts over
    #[error("Pass interrupted: {0}")]
    Interrupted(String),
}

impl GcError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GcError::OutOfMemory { .. } | GcError::Timeout(_) | GcError::Interrupted(_)
        )
    }

    /// Check if this error indicates a bug in the code
    pub fn is_bug(&self) -> bool {
        matches!(self, GcError::InvalidState { .. })
    }
}

/// Result type alias for DGC operations
pub type Result<T> = std::result::Result<T, GcError>;

/// Log a fatal diagnostic and abort the process.
///
/// Used for invariants that are checked unconditionally, in release builds
/// too: a corrupt forwarding destination, an illegal region state change,
/// a failed remote transfer mid-pause. There is no safe continuation from
/// any of these.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        std::process::abort();
    }};
}

/// Check a condition that must hold even in release builds; abort with a
/// diagnostic if it does not.
#[macro_export]
macro_rules! guarantee {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::fatal!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GcError::OutOfMemory {
            requested: 1024,
            available: 512,
        };
        let msg = err.to_string();
        assert!(msg.contains("1024"));
        assert!(msg.contains("512"));
    }

    #[test]
    fn test_recoverability() {
        assert!(GcError::OutOfMemory {
            requested: 1,
            available: 0
        }
        .is_recoverable());
        assert!(!GcError::Configuration("bad".into()).is_recoverable());
        assert!(GcError::InvalidState {
            expected: "Active".into(),
            actual: "Inactive".into()
        }
        .is_bug());
    }
}
