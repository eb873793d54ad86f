//! Atomic Utilities
//!
//! Helper functions for atomic operations on the access path. Counter
//! updates use a bounded compare-and-set retry budget: under extreme
//! contention an update is dropped (and accounted as a lost sample by the
//! caller) instead of spinning, so the profiler can never livelock the
//! target program.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// AtomicUtils - utility for atomic operations
pub struct AtomicUtils;

impl AtomicUtils {
    /// Fetch-add with a bounded retry budget.
    ///
    /// Returns the previous value on success, `None` once the budget is
    /// exhausted. A budget of 0 attempts nothing and always drops.
    #[inline]
    pub fn bounded_add(atomic: &AtomicU64, value: u64, retries: usize) -> Option<u64> {
        let mut current = atomic.load(Ordering::Relaxed);

        for _ in 0..retries {
            let new_value = current.wrapping_add(value);

            match atomic.compare_exchange_weak(
                current,
                new_value,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(prev) => return Some(prev),
                Err(actual) => current = actual,
            }
        }

        None
    }

    /// Fetch-add on a 32-bit counter with a bounded retry budget.
    #[inline]
    pub fn bounded_add_u32(atomic: &AtomicU32, value: u32, retries: usize) -> Option<u32> {
        let mut current = atomic.load(Ordering::Relaxed);

        for _ in 0..retries {
            let new_value = current.wrapping_add(value);

            match atomic.compare_exchange_weak(
                current,
                new_value,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(prev) => return Some(prev),
                Err(actual) => current = actual,
            }
        }

        None
    }

    /// Atomic swap if the current value matches `expected`.
    ///
    /// One-shot: used for monotonic false-to-true escalation flags.
    #[inline]
    pub fn swap_if(atomic: &AtomicBool, expected: bool, new_value: bool) -> bool {
        atomic
            .compare_exchange(expected, new_value, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    /// Spin wait with backoff
    pub fn spin_wait<F>(mut condition: F, max_spins: usize) -> bool
    where
        F: FnMut() -> bool,
    {
        let mut spins = 0;
        let mut backoff = 1;

        while !condition() {
            if spins >= max_spins {
                return false;
            }

            // Exponential backoff
            for _ in 0..backoff {
                std::hint::spin_loop();
            }

            backoff = (backoff * 2).min(1000);
            spins += 1;
        }

        true
    }
}
