//! Per-Lock Records
//!
//! One record per pthread lock the interposer reports on. The waiter gauge
//! counts every thread that has entered acquire and not yet released,
//! including the holder; a value above one at acquire time means the
//! acquire was contended. Lock counters use plain fetch-adds (unbounded
//! mode): dropping an acquire would desynchronise the gauge permanently.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// LockRecord - contention state for one lock
pub struct LockRecord {
    /// Threads inside acquire/release, including the current holder.
    holders_waiting: AtomicI64,

    /// Monotonic count of contended acquires, for report ranking.
    contended_acquires: AtomicU64,
}

impl LockRecord {
    pub fn new() -> Self {
        Self {
            holders_waiting: AtomicI64::new(0),
            contended_acquires: AtomicU64::new(0),
        }
    }

    /// Record an acquire. Returns true when the acquire was contended.
    #[inline]
    pub fn acquire(&self) -> bool {
        let waiting = self.holders_waiting.fetch_add(1, Ordering::SeqCst) + 1;
        let contended = waiting > 1;
        if contended {
            self.contended_acquires.fetch_add(1, Ordering::SeqCst);
        }
        contended
    }

    /// Record a release.
    #[inline]
    pub fn release(&self) {
        self.holders_waiting.fetch_sub(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn has_contention(&self) -> bool {
        self.holders_waiting.load(Ordering::SeqCst) > 1
    }

    #[inline]
    pub fn holders_waiting(&self) -> i64 {
        self.holders_waiting.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn contended_acquires(&self) -> u64 {
        self.contended_acquires.load(Ordering::SeqCst)
    }
}

impl Default for LockRecord {
    fn default() -> Self {
        Self::new()
    }
}
