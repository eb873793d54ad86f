//! Seriousness Scoring
//!
//! One scalar per finding so the priority queues can rank objects and cache
//! lines together. Invalidations that displaced a thread other than the
//! line's first toucher weigh double: traffic that ping-pongs between
//! non-owning sockets is the pattern the report exists to surface, while
//! first-toucher displacement also happens in benign producer/consumer
//! hand-offs.

/// Weight applied to invalidations whose displaced owner was not the
/// line's first-access thread.
pub const REMOTE_WEIGHT: u64 = 2;

/// Score for a cache line or an object from its invalidation split.
/// Monotonic non-decreasing in both arguments.
#[inline]
pub fn invalidation_score(invalidations_first: u64, invalidations_others: u64) -> u64 {
    invalidations_first + REMOTE_WEIGHT * invalidations_others
}
