//! Object Arena - Pooled Object Records
//!
//! Fixed-capacity slab of `ObjectRecord`s over one non-reserving anonymous
//! mapping. Allocation bumps a high-water index until the pool has been
//! fully handed out once, after which records recycle through a lock-free
//! free list. The free-list head carries a generation tag next to the slot
//! index so a pop that races with a free-then-realloc of the same slot
//! cannot succeed with a stale next pointer (the ABA case).
//!
//! Records are never dropped; reuse goes through `ObjectRecord::reset`,
//! which is a sequence of atomic stores, so a reader racing with reuse sees
//! stale or fresh field values but never torn memory.

use crate::error::Result;
use crate::record::ObjectRecord;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::mapping::MemoryMapping;

/// Free-list head layout: generation tag in the high 32 bits, slot index
/// plus one in the low 32 (0 = empty list).
const INDEX_MASK: u64 = 0xffff_ffff;

/// ObjectArena - fixed-capacity pool of object records
pub struct ObjectArena {
    /// `[records: capacity * size_of::<ObjectRecord>()] [next: capacity * 8]`
    mapping: MemoryMapping,
    capacity: usize,
    next_offset: usize,
    /// Slots handed out at least once.
    high_water: AtomicUsize,
    /// Tagged free-list head.
    free_head: AtomicU64,
    /// Live records, for capacity reporting.
    live: AtomicUsize,
}

impl ObjectArena {
    pub fn new(capacity: usize) -> Result<Self> {
        let record_size = std::mem::size_of::<ObjectRecord>();
        let next_offset = capacity * record_size;
        let mapping = MemoryMapping::anonymous_noreserve(next_offset + capacity * 8)?;

        Ok(Self {
            mapping,
            capacity,
            next_offset,
            high_water: AtomicUsize::new(0),
            free_head: AtomicU64::new(0),
            live: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    #[inline]
    fn next_slot(&self, index: usize) -> &AtomicU64 {
        debug_assert!(index < self.capacity);
        // SAFETY: the next array starts at next_offset inside the mapping
        // and the index is bounds-checked above; zeroed memory is a valid
        // AtomicU64.
        unsafe {
            &*(self
                .mapping
                .as_ptr()
                .add(self.next_offset + index * 8)
                .cast::<AtomicU64>())
        }
    }

    /// Record at `index`. The reference lives as long as the arena; the
    /// record may be recycled underneath long-held references, which the
    /// all-atomic field layout tolerates.
    #[inline]
    pub fn get(&self, index: u32) -> &ObjectRecord {
        debug_assert!((index as usize) < self.capacity);
        // SAFETY: index is within the slab and every ObjectRecord field is
        // an atomic whose all-zeroes bit pattern is valid.
        unsafe {
            &*(self
                .mapping
                .as_ptr()
                .add(index as usize * std::mem::size_of::<ObjectRecord>())
                .cast::<ObjectRecord>())
        }
    }

    /// Stable address of the record at `index`, for resident slots.
    #[inline]
    pub fn record_ptr(&self, index: u32) -> usize {
        self.get(index) as *const ObjectRecord as usize
    }

    /// Arena index of a record address obtained from [`record_ptr`].
    ///
    /// [`record_ptr`]: Self::record_ptr
    #[inline]
    pub fn index_of(&self, record_ptr: usize) -> u32 {
        let base = self.mapping.base();
        debug_assert!(record_ptr >= base && record_ptr < base + self.next_offset);
        ((record_ptr - base) / std::mem::size_of::<ObjectRecord>()) as u32
    }

    /// Take a slot. Returns `None` when the pool is exhausted (a capacity
    /// drop for the caller to count).
    pub fn alloc(&self) -> Option<u32> {
        // Free list first
        loop {
            let head = self.free_head.load(Ordering::SeqCst);
            let slot_plus_one = head & INDEX_MASK;
            if slot_plus_one == 0 {
                break;
            }
            let index = (slot_plus_one - 1) as u32;
            let next = self.next_slot(index as usize).load(Ordering::SeqCst) & INDEX_MASK;
            let tagged = ((head >> 32).wrapping_add(1)) << 32 | next;
            if self
                .free_head
                .compare_exchange_weak(head, tagged, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                self.live.fetch_add(1, Ordering::SeqCst);
                return Some(index);
            }
        }

        // Fresh slot from the untouched tail
        let index = self.high_water.fetch_add(1, Ordering::SeqCst);
        if index >= self.capacity {
            // Keep the counter from creeping toward overflow on a
            // persistently full pool.
            self.high_water.store(self.capacity, Ordering::SeqCst);
            return None;
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Some(index as u32)
    }

    /// Return a slot to the pool.
    pub fn free(&self, index: u32) {
        loop {
            let head = self.free_head.load(Ordering::SeqCst);
            self.next_slot(index as usize)
                .store(head & INDEX_MASK, Ordering::SeqCst);
            let tagged = ((head >> 32).wrapping_add(1)) << 32 | (index as u64 + 1);
            if self
                .free_head
                .compare_exchange_weak(head, tagged, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                self.live.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        }
    }
}
