//! Error Module - NumaLens Error Types
//!
//! Defines all error types used by the profiler runtime.
//!
//! # Error Categories
//!
//! ## Fatal setup errors
//! - `MappingFailed` - anonymous mapping could not be created
//! - `FragmentOutOfRange` - address beyond the configured fragment table
//! - `Configuration` - invalid configuration rejected at init
//!
//! ## Recoverable conditions
//! Recoverable conditions on the access path (registry full, CAS retry
//! budget exhausted, address outside the page-map aperture) never become
//! errors at all: they are absorbed into `ProfilerStats` counters so the
//! profiler can never throw into the target program. Only initialisation
//! returns `Result`; everything after init either succeeds, counts a drop,
//! or goes through [`fatal`].

use thiserror::Error;

/// Main error type for all NumaLens operations
///
/// # Examples
///
/// ```rust
/// use nlens::error::NlensError;
///
/// fn handle_error(err: NlensError) {
///     match err {
///         NlensError::MappingFailed(msg) => {
///             eprintln!("mapping failed: {}", msg);
///         }
///         NlensError::FragmentOutOfRange { index, max } => {
///             eprintln!("fragment {} beyond table of {}", index, max);
///         }
///         _ => eprintln!("other error: {}", err),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum NlensError {
    /// Anonymous mapping failed
    ///
    /// **When returned:** `mmap` for a shadow fragment, registry, or arena
    /// could not be satisfied by the OS
    ///
    /// **Recovery strategy:** Cannot recover - all profiler storage is
    /// mapping-backed
    #[error("Memory mapping failed: {0}")]
    MappingFailed(String),

    /// Fragment index beyond the configured table
    ///
    /// **When returned:** A target address maps to a shadow fragment slot
    /// past `max_fragments`
    ///
    /// **Recovery strategy:** Cannot recover - raise `max_fragments` or
    /// `fragment_bytes` so the table covers the target's address range
    #[error("Shadow fragment index {index} out of range (table size {max})")]
    FragmentOutOfRange { index: usize, max: usize },

    /// Configuration error
    ///
    /// **When returned:** `ProfilerConfig::validate` rejected a field
    ///
    /// **Recovery strategy:** Fix the offending `NUMAPERF_*` variable or
    /// config field and re-init
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error - indicates a bug in NumaLens
    ///
    /// **When returned:** Invariant violation or unexpected state
    ///
    /// **Recovery strategy:** Cannot recover - this is a bug
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NlensError {
    /// Check if this error is recoverable by changing configuration
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NlensError::Configuration(_))
    }

    /// Check if this error is fatal for the profiled process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NlensError::MappingFailed(_)
                | NlensError::FragmentOutOfRange { .. }
                | NlensError::Internal(_)
        )
    }
}

impl From<crate::config::ConfigError> for NlensError {
    fn from(err: crate::config::ConfigError) -> Self {
        NlensError::Configuration(err.to_string())
    }
}

/// Result type alias for NumaLens operations
pub type Result<T> = std::result::Result<T, NlensError>;

/// Abort the process with a diagnostic.
///
/// Post-init fatal conditions (fragment table exhaustion, mapping failure
/// during fragment birth) funnel through here: the profiler must never
/// unwind into the target program, so the only options are counting a drop
/// or aborting, and these conditions are in the fatal list.
pub fn fatal(err: &NlensError) -> ! {
    use std::io::Write;
    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "nlens: fatal: {err}");
    let _ = stderr.flush();
    std::process::abort();
}
