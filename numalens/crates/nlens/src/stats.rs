//! Profiler Statistics - Event Accounting
//!
//! Every recoverable condition on the access path turns into a counter here
//! instead of an error: lost samples from exhausted CAS budgets, addresses
//! outside the page-map aperture, full registries, frees of unknown
//! pointers. The counters also carry the drop-accounting invariant the test
//! suite checks: every access event is counted exactly once as observed,
//! lost, or aperture-dropped.
//!
//! # Thread Safety
//! All fields are atomics padded to their own cache lines; the `record_*`
//! methods are safe from any thread and never allocate.

use crossbeam::utils::CachePadded;
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// ProfilerStats - thread-safe event counters
///
/// One instance lives in the profiler context; the hot callbacks bump it
/// through `#[inline]` methods. Readers take a [`StatsSnapshot`].
pub struct ProfilerStats {
    /// Access callbacks entering the pipeline
    access_callbacks: CachePadded<AtomicU64>,
    /// Extra events produced by page-boundary splits
    split_accesses: CachePadded<AtomicU64>,
    /// Access events fully applied
    accesses_observed: CachePadded<AtomicU64>,
    /// Access events partially or fully dropped on CAS budget exhaustion
    lost_samples: CachePadded<AtomicU64>,
    /// Access events outside the flat page-map aperture
    aperture_drops: CachePadded<AtomicU64>,
    /// Pages materialised in the flat map
    pages_tracked: CachePadded<AtomicU64>,
    /// Pages escalated to detailed tracking
    page_escalations: CachePadded<AtomicU64>,
    /// Cache lines escalated to detailed tracking
    line_escalations: CachePadded<AtomicU64>,
    /// Allocations handed to the profiler
    allocations: CachePadded<AtomicU64>,
    /// Frees handed to the profiler
    frees: CachePadded<AtomicU64>,
    /// Frees of pointers the registry does not know
    unknown_frees: CachePadded<AtomicU64>,
    /// Allocations over a still-live pointer (target missed a free)
    missed_frees: CachePadded<AtomicU64>,
    /// Events dropped because a registry or the arena was full
    capacity_drops: CachePadded<AtomicU64>,
    /// Lock acquires seen
    lock_acquires: CachePadded<AtomicU64>,
    /// Lock acquires that were contended
    lock_contended: CachePadded<AtomicU64>,
}

impl ProfilerStats {
    pub fn new() -> Self {
        Self {
            access_callbacks: CachePadded::new(AtomicU64::new(0)),
            split_accesses: CachePadded::new(AtomicU64::new(0)),
            accesses_observed: CachePadded::new(AtomicU64::new(0)),
            lost_samples: CachePadded::new(AtomicU64::new(0)),
            aperture_drops: CachePadded::new(AtomicU64::new(0)),
            pages_tracked: CachePadded::new(AtomicU64::new(0)),
            page_escalations: CachePadded::new(AtomicU64::new(0)),
            line_escalations: CachePadded::new(AtomicU64::new(0)),
            allocations: CachePadded::new(AtomicU64::new(0)),
            frees: CachePadded::new(AtomicU64::new(0)),
            unknown_frees: CachePadded::new(AtomicU64::new(0)),
            missed_frees: CachePadded::new(AtomicU64::new(0)),
            capacity_drops: CachePadded::new(AtomicU64::new(0)),
            lock_acquires: CachePadded::new(AtomicU64::new(0)),
            lock_contended: CachePadded::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    pub fn record_access_callback(&self) {
        self.access_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_split_access(&self) {
        self.split_accesses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_observed(&self) {
        self.accesses_observed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_lost_sample(&self) {
        self.lost_samples.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_aperture_drop(&self) {
        self.aperture_drops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_page_tracked(&self) {
        self.pages_tracked.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_page_escalation(&self) {
        self.page_escalations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_line_escalation(&self) {
        self.line_escalations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_free(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_free(&self) {
        self.unknown_frees.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_missed_free(&self) {
        self.missed_frees.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_capacity_drop(&self) {
        self.capacity_drops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_lock_acquire(&self, contended: bool) {
        self.lock_acquires.fetch_add(1, Ordering::Relaxed);
        if contended {
            self.lock_contended.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Consistent point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            access_callbacks: self.access_callbacks.load(Ordering::SeqCst),
            split_accesses: self.split_accesses.load(Ordering::SeqCst),
            accesses_observed: self.accesses_observed.load(Ordering::SeqCst),
            lost_samples: self.lost_samples.load(Ordering::SeqCst),
            aperture_drops: self.aperture_drops.load(Ordering::SeqCst),
            pages_tracked: self.pages_tracked.load(Ordering::SeqCst),
            page_escalations: self.page_escalations.load(Ordering::SeqCst),
            line_escalations: self.line_escalations.load(Ordering::SeqCst),
            allocations: self.allocations.load(Ordering::SeqCst),
            frees: self.frees.load(Ordering::SeqCst),
            unknown_frees: self.unknown_frees.load(Ordering::SeqCst),
            missed_frees: self.missed_frees.load(Ordering::SeqCst),
            capacity_drops: self.capacity_drops.load(Ordering::SeqCst),
            lock_acquires: self.lock_acquires.load(Ordering::SeqCst),
            lock_contended: self.lock_contended.load(Ordering::SeqCst),
        }
    }
}

impl Default for ProfilerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// StatsSnapshot - plain copy of the counters for readers
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub access_callbacks: u64,
    pub split_accesses: u64,
    pub accesses_observed: u64,
    pub lost_samples: u64,
    pub aperture_drops: u64,
    pub pages_tracked: u64,
    pub page_escalations: u64,
    pub line_escalations: u64,
    pub allocations: u64,
    pub frees: u64,
    pub unknown_frees: u64,
    pub missed_frees: u64,
    pub capacity_drops: u64,
    pub lock_acquires: u64,
    pub lock_contended: u64,
}

impl StatsSnapshot {
    /// Total access events: callbacks plus the second halves of splits.
    pub fn access_events(&self) -> u64 {
        self.access_callbacks + self.split_accesses
    }

    /// Stable-order export feeding the report footer (text and JSON).
    pub fn export(&self) -> IndexMap<&'static str, u64> {
        let mut map = IndexMap::new();
        map.insert("access_callbacks", self.access_callbacks);
        map.insert("split_accesses", self.split_accesses);
        map.insert("accesses_observed", self.accesses_observed);
        map.insert("lost_samples", self.lost_samples);
        map.insert("aperture_drops", self.aperture_drops);
        map.insert("pages_tracked", self.pages_tracked);
        map.insert("page_escalations", self.page_escalations);
        map.insert("line_escalations", self.line_escalations);
        map.insert("allocations", self.allocations);
        map.insert("frees", self.frees);
        map.insert("unknown_frees", self.unknown_frees);
        map.insert("missed_frees", self.missed_frees);
        map.insert("capacity_drops", self.capacity_drops);
        map.insert("lock_acquires", self.lock_acquires);
        map.insert("lock_contended", self.lock_contended);
        map
    }
}
