//! Fragment-Birth Spinlock
//!
//! The shadow maps create fragments behind a single spinlock. This is the
//! only lock on the access path and it is held for the duration of one
//! anonymous `mmap`, so a plain test-and-set lock with exponential backoff
//! is sufficient; parking would give the target's threads a blocking
//! dependency on the profiler.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicBool, Ordering};

/// SpinLock - test-and-set lock with exponential backoff
pub struct SpinLock {
    locked: CachePadded<AtomicBool>,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: CachePadded::new(AtomicBool::new(false)),
        }
    }

    /// Acquire the lock, spinning until it is free.
    pub fn lock(&self) -> SpinGuard<'_> {
        let mut backoff = 1;

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Read-only wait until the holder releases, then race again
            while self.locked.load(Ordering::Relaxed) {
                for _ in 0..backoff {
                    std::hint::spin_loop();
                }
                backoff = (backoff * 2).min(1000);
            }
        }

        SpinGuard { lock: self }
    }

    /// Try to acquire the lock without spinning.
    pub fn try_lock(&self) -> Option<SpinGuard<'_>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinGuard { lock: self })
        } else {
            None
        }
    }

    /// Whether the lock is currently held by some thread.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard releasing the spinlock on drop
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
