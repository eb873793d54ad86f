//! Per-Cache-Line Records
//!
//! `CacheLineRecord` is the detailed state for one escalated cache line:
//! which thread touched it first, which thread owns it now, how many times
//! ownership was torn away (split by whether the losing owner was the first
//! toucher), and which heap objects live in the line.
//!
//! The resident index has one slot per byte of the line. An object registers
//! at the byte offset of its start within the line (offset 0 when it spills
//! in from the previous line), and lookup for an access at `addr` reads the
//! slot at `addr % CACHE_LINE_SIZE`. Both directions are a single array
//! access.

use crate::mem::page::CACHE_LINE_SIZE;
use crate::util::atomic::AtomicUtils;
use crate::util::constants::UNSET_THREAD;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Which counter an ownership transfer lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationKind {
    /// The displaced owner was the line's first-access thread.
    FirstThread,
    /// The displaced owner was some other thread.
    Others,
}

/// Result of recording one access against a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No ownership change (read, same-owner write, or first access).
    NoChange,
    /// Ownership moved to the accessing thread.
    Invalidation(InvalidationKind),
    /// The CAS budget ran out; the update was dropped.
    Dropped,
}

/// CacheLineRecord - detailed access state for one escalated cache line
pub struct CacheLineRecord {
    /// Base address of the line. Written once before publication.
    line_base: usize,

    /// Thread whose escalation created this record.
    first_access_thread: u32,

    /// Thread currently owning the line (last writer, or first toucher
    /// until someone writes).
    owner_thread: AtomicU32,

    /// Ownership transfers that displaced the first-access thread.
    invalidations_first: AtomicU64,

    /// Ownership transfers that displaced any other thread.
    invalidations_others: AtomicU64,

    /// Resident object index: pointer to the `ObjectRecord` starting at
    /// each byte offset, 0 when none.
    residents: [AtomicUsize; CACHE_LINE_SIZE],
}

impl CacheLineRecord {
    pub fn new(line_base: usize, creator_thread: u32) -> Self {
        const SLOT_EMPTY: AtomicUsize = AtomicUsize::new(0);
        Self {
            line_base,
            first_access_thread: creator_thread,
            owner_thread: AtomicU32::new(UNSET_THREAD),
            invalidations_first: AtomicU64::new(0),
            invalidations_others: AtomicU64::new(0),
            residents: [SLOT_EMPTY; CACHE_LINE_SIZE],
        }
    }

    #[inline]
    pub fn line_base(&self) -> usize {
        self.line_base
    }

    #[inline]
    pub fn first_access_thread(&self) -> u32 {
        self.first_access_thread
    }

    #[inline]
    pub fn owner_thread(&self) -> u32 {
        self.owner_thread.load(Ordering::SeqCst)
    }

    /// Record one access by `thread`.
    ///
    /// Reads and same-owner writes leave ownership alone. A write by a
    /// non-owner takes ownership and counts one invalidation against the
    /// displaced owner. Ownership transfer uses a bounded CAS; on budget
    /// exhaustion the transfer is dropped and reported as such.
    #[inline]
    pub fn record_access(&self, thread: u32, is_write: bool, retries: usize) -> WriteOutcome {
        let owner = self.owner_thread.load(Ordering::SeqCst);

        if owner == UNSET_THREAD {
            // First access claims ownership; a racing claim is fine, the
            // loser just observes the winner as owner.
            let _ = self.owner_thread.compare_exchange(
                UNSET_THREAD,
                thread,
                Ordering::SeqCst,
                Ordering::Relaxed,
            );
            return WriteOutcome::NoChange;
        }

        if !is_write || owner == thread {
            return WriteOutcome::NoChange;
        }

        // Ownership transfer: whoever wins the CAS accounts the
        // invalidation against the owner it displaced.
        if self
            .owner_thread
            .compare_exchange(owner, thread, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return WriteOutcome::Dropped;
        }

        let kind = if owner == self.first_access_thread {
            InvalidationKind::FirstThread
        } else {
            InvalidationKind::Others
        };
        let counter = match kind {
            InvalidationKind::FirstThread => &self.invalidations_first,
            InvalidationKind::Others => &self.invalidations_others,
        };
        match AtomicUtils::bounded_add(counter, 1, retries) {
            Some(_) => WriteOutcome::Invalidation(kind),
            None => WriteOutcome::Dropped,
        }
    }

    #[inline]
    pub fn invalidations_first(&self) -> u64 {
        self.invalidations_first.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn invalidations_others(&self) -> u64 {
        self.invalidations_others.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn invalidations_total(&self) -> u64 {
        self.invalidations_first() + self.invalidations_others()
    }

    /// Register the object record at `object_start` in this line.
    ///
    /// Starts below the line base (interior pointers, spill-over from the
    /// previous line) clamp to slot 0.
    #[inline]
    pub fn install_resident(&self, object_start: usize, record_ptr: usize) {
        let slot = if object_start < self.line_base {
            0
        } else {
            object_start - self.line_base
        };
        debug_assert!(slot < CACHE_LINE_SIZE);
        self.residents[slot].store(record_ptr, Ordering::SeqCst);
    }

    /// Object record registered at the byte offset of `addr`, 0 when none.
    #[inline]
    pub fn resident_at(&self, addr: usize) -> usize {
        debug_assert!(addr >= self.line_base && addr < self.line_base + CACHE_LINE_SIZE);
        self.residents[addr - self.line_base].load(Ordering::SeqCst)
    }

    /// Clear the registration for an object starting at `object_start`,
    /// but only if it still points at `record_ptr` (a racing realloc may
    /// already have installed a new object in the slot).
    #[inline]
    pub fn clear_resident(&self, object_start: usize, record_ptr: usize) {
        let slot = if object_start < self.line_base {
            0
        } else {
            object_start - self.line_base
        };
        debug_assert!(slot < CACHE_LINE_SIZE);
        let _ = self.residents[slot].compare_exchange(
            record_ptr,
            0,
            Ordering::SeqCst,
            Ordering::Relaxed,
        );
    }

    /// Visit every non-empty resident slot.
    pub fn for_each_resident(&self, mut f: impl FnMut(usize, usize)) {
        for (slot, resident) in self.residents.iter().enumerate() {
            let ptr = resident.load(Ordering::SeqCst);
            if ptr != 0 {
                f(slot, ptr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_first_access_claims_ownership() {
        let line = CacheLineRecord::new(0x1000, 0);
        assert_eq!(line.owner_thread(), UNSET_THREAD);
        assert_eq!(line.record_access(2, false, 5), WriteOutcome::NoChange);
        assert_eq!(line.owner_thread(), 2);
        assert_eq!(line.invalidations_total(), 0);
    }

    #[test]
    fn test_reads_never_invalidate() {
        let line = CacheLineRecord::new(0x1000, 0);
        line.record_access(0, true, 5);
        for _ in 0..10 {
            assert_eq!(line.record_access(1, false, 5), WriteOutcome::NoChange);
        }
        assert_eq!(line.owner_thread(), 0);
        assert_eq!(line.invalidations_total(), 0);
    }

    #[test]
    fn test_write_pingpong_splits_invalidations() {
        let line = CacheLineRecord::new(0x1000, 0);
        line.record_access(0, true, 5); // owner = 0 (the first toucher)

        // Thread 1 displaces the first toucher
        assert_eq!(
            line.record_access(1, true, 5),
            WriteOutcome::Invalidation(InvalidationKind::FirstThread)
        );
        // Thread 2 displaces thread 1
        assert_eq!(
            line.record_access(2, true, 5),
            WriteOutcome::Invalidation(InvalidationKind::Others)
        );
        // Thread 0 displaces thread 2
        assert_eq!(
            line.record_access(0, true, 5),
            WriteOutcome::Invalidation(InvalidationKind::Others)
        );

        assert_eq!(line.invalidations_first(), 1);
        assert_eq!(line.invalidations_others(), 2);
    }

    #[test]
    fn test_same_owner_write_is_free() {
        let line = CacheLineRecord::new(0x1000, 7);
        line.record_access(7, true, 5);
        for _ in 0..100 {
            assert_eq!(line.record_access(7, true, 5), WriteOutcome::NoChange);
        }
        assert_eq!(line.invalidations_total(), 0);
    }

    #[test]
    fn test_resident_slots_by_offset() {
        let line = CacheLineRecord::new(0x1000, 0);
        line.install_resident(0x1008, 0xdead);
        line.install_resident(0x0ff0, 0xbeef); // below the line: slot 0

        assert_eq!(line.resident_at(0x1008), 0xdead);
        assert_eq!(line.resident_at(0x1000), 0xbeef);
        assert_eq!(line.resident_at(0x1010), 0);

        line.clear_resident(0x1008, 0xdead);
        assert_eq!(line.resident_at(0x1008), 0);
    }

    #[test]
    fn test_clear_resident_respects_reinstall() {
        let line = CacheLineRecord::new(0x1000, 0);
        line.install_resident(0x1008, 0xdead);
        // A newer object took the slot before the stale clear arrives
        line.install_resident(0x1008, 0xfeed);
        line.clear_resident(0x1008, 0xdead);
        assert_eq!(line.resident_at(0x1008), 0xfeed);
    }

    #[test]
    fn test_invalidations_bounded_by_accesses() {
        let line = Arc::new(CacheLineRecord::new(0x1000, 0));
        let accesses_per_thread = 10_000u64;
        let mut handles = Vec::new();

        for tid in 0..4u32 {
            let line = Arc::clone(&line);
            handles.push(thread::spawn(move || {
                for _ in 0..accesses_per_thread {
                    line.record_access(tid, true, 5);
                }
            }));
        }

        for handle in handles {
            handle.join().expect("thread should not panic");
        }

        assert!(line.invalidations_total() <= 4 * accesses_per_thread);
    }
}
