//! Object and Allocation-Site Records
//!
//! `ObjectRecord` tracks one live heap object: who allocated it, how its
//! accesses split between the allocating thread and everyone else, and how
//! many line invalidations were attributed to it. Records live in the object
//! arena and are reused after free, so every field is an atomic and reuse is
//! a sequence of atomic stores; a racing reader may see a half-reset record
//! but never torn memory.
//!
//! `SiteRecord` aggregates over every object born at one allocation site.
//! Objects merge into their site on free and again (for the still-live ones)
//! at report time, so short-lived objects are not lost from the report.

use crate::util::atomic::AtomicUtils;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// ObjectRecord - access state for one live heap object
pub struct ObjectRecord {
    start_address: AtomicUsize,
    size: AtomicUsize,
    site_fingerprint: AtomicU64,
    alloc_thread: AtomicU32,
    accesses_by_alloc_thread: AtomicU64,
    accesses_by_others: AtomicU64,
    invalidations_attributed: AtomicU64,
}

impl ObjectRecord {
    /// Re-initialise a (possibly reused) record for a fresh allocation.
    pub fn reset(&self, start_address: usize, size: usize, fingerprint: u64, alloc_thread: u32) {
        self.start_address.store(start_address, Ordering::SeqCst);
        self.size.store(size, Ordering::SeqCst);
        self.site_fingerprint.store(fingerprint, Ordering::SeqCst);
        self.alloc_thread.store(alloc_thread, Ordering::SeqCst);
        self.accesses_by_alloc_thread.store(0, Ordering::SeqCst);
        self.accesses_by_others.store(0, Ordering::SeqCst);
        self.invalidations_attributed.store(0, Ordering::SeqCst);
    }

    #[inline]
    pub fn start_address(&self) -> usize {
        self.start_address.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn site_fingerprint(&self) -> u64 {
        self.site_fingerprint.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn alloc_thread(&self) -> u32 {
        self.alloc_thread.load(Ordering::SeqCst)
    }

    /// Count one access, split by whether `thread` allocated the object.
    /// Returns `None` on CAS budget exhaustion.
    #[inline]
    pub fn record_access(&self, thread: u32, retries: usize) -> Option<u64> {
        let counter = if thread == self.alloc_thread.load(Ordering::Relaxed) {
            &self.accesses_by_alloc_thread
        } else {
            &self.accesses_by_others
        };
        AtomicUtils::bounded_add(counter, 1, retries)
    }

    /// Attribute one cache-line invalidation to this object.
    #[inline]
    pub fn record_invalidation(&self, retries: usize) -> Option<u64> {
        AtomicUtils::bounded_add(&self.invalidations_attributed, 1, retries)
    }

    #[inline]
    pub fn accesses_by_alloc_thread(&self) -> u64 {
        self.accesses_by_alloc_thread.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn accesses_by_others(&self) -> u64 {
        self.accesses_by_others.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn invalidations_attributed(&self) -> u64 {
        self.invalidations_attributed.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn total_accesses(&self) -> u64 {
        self.accesses_by_alloc_thread() + self.accesses_by_others()
    }
}

impl Default for ObjectRecord {
    /// A zeroed record, matching what the arena's fresh mapping hands out.
    fn default() -> Self {
        Self {
            start_address: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
            site_fingerprint: AtomicU64::new(0),
            alloc_thread: AtomicU32::new(0),
            accesses_by_alloc_thread: AtomicU64::new(0),
            accesses_by_others: AtomicU64::new(0),
            invalidations_attributed: AtomicU64::new(0),
        }
    }
}

/// SiteRecord - aggregate over all objects born at one allocation site
///
/// Merges use plain fetch-adds (the unbounded atomic mode): the free path
/// must not lose history, and site merges are far off the hot access path.
pub struct SiteRecord {
    fingerprint: u64,
    objects_allocated: AtomicU64,
    objects_freed: AtomicU64,
    bytes_allocated: AtomicU64,
    accesses_by_alloc_thread: AtomicU64,
    accesses_by_others: AtomicU64,
    invalidations: AtomicU64,
}

impl SiteRecord {
    pub fn new(fingerprint: u64) -> Self {
        Self {
            fingerprint,
            objects_allocated: AtomicU64::new(0),
            objects_freed: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
            accesses_by_alloc_thread: AtomicU64::new(0),
            accesses_by_others: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Count one object born at this site.
    #[inline]
    pub fn record_allocation(&self, size: usize) {
        self.objects_allocated.fetch_add(1, Ordering::SeqCst);
        self.bytes_allocated.fetch_add(size as u64, Ordering::SeqCst);
    }

    /// Fold a dying (or report-time live) object's counters into the site.
    pub fn merge_object(&self, object: &ObjectRecord, freed: bool) {
        if freed {
            self.objects_freed.fetch_add(1, Ordering::SeqCst);
        }
        self.accesses_by_alloc_thread
            .fetch_add(object.accesses_by_alloc_thread(), Ordering::SeqCst);
        self.accesses_by_others
            .fetch_add(object.accesses_by_others(), Ordering::SeqCst);
        self.invalidations
            .fetch_add(object.invalidations_attributed(), Ordering::SeqCst);
    }

    pub fn objects_allocated(&self) -> u64 {
        self.objects_allocated.load(Ordering::SeqCst)
    }

    pub fn objects_freed(&self) -> u64 {
        self.objects_freed.load(Ordering::SeqCst)
    }

    pub fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated.load(Ordering::SeqCst)
    }

    pub fn accesses_by_alloc_thread(&self) -> u64 {
        self.accesses_by_alloc_thread.load(Ordering::SeqCst)
    }

    pub fn accesses_by_others(&self) -> u64 {
        self.accesses_by_others.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }
}
