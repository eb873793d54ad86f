//! Util Module - Shared Utilities
//!
//! Alignment math, atomic helpers, and the fragment-birth spinlock used
//! throughout the profiler.

pub mod alignment;
pub mod atomic;
pub mod spin;

pub use alignment::Alignment;
pub use atomic::AtomicUtils;
pub use spin::SpinLock;

/// Constants for NumaLens
pub mod constants {
    /// 1 Kilobyte
    pub const KB: usize = 1024;
    /// 1 Megabyte
    pub const MB: usize = 1024 * 1024;
    /// 1 Gigabyte
    pub const GB: usize = 1024 * 1024 * 1024;

    /// Retry budget for compare-and-set updates on the access path.
    /// Exhausting it drops the update and counts a lost sample.
    pub const CAS_RETRY_LIMIT: usize = 5;

    /// Spin budget while waiting for a shadow slot to publish.
    pub const PUBLISH_SPIN_LIMIT: usize = 1 << 20;

    /// Sentinel for "no thread recorded yet".
    pub const UNSET_THREAD: u32 = u32::MAX;
}
