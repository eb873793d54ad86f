//! Per-Page Records
//!
//! `PageRecord` is the always-on state for every page the target touches:
//! who touched it first, how much foreign traffic it sees, and how contended
//! each of its cache lines is. It answers the two escalation questions (page
//! detail, cache-line detail) on the fly.
//!
//! The per-line counter counts writer *transitions*, not raw writes: a line
//! hammered by a single thread generates no coherence traffic and must never
//! escalate, however hot it is.
//!
//! `PageDetailRecord` is created once a page crosses the page-sharing
//! threshold and splits subsequent traffic into reads/writes by local/remote
//! thread, which is what the report's page-sharing section prints.

use crate::mem::page::CACHE_LINES_PER_PAGE;
use crate::util::atomic::AtomicUtils;
use crate::util::constants::UNSET_THREAD;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// PageRecord - basic access state for one page
///
/// Created by whichever thread wins the page's `insertIfAbsent`; that
/// thread's id becomes the immutable first-touch identity (the NUMA
/// first-touch policy would bind the page to that thread's node).
pub struct PageRecord {
    /// Thread that first touched the page. Written once, before the record
    /// is published; never changes afterwards.
    first_touch_thread: u32,

    /// Accesses by any thread other than the first-touch thread.
    foreign_accesses: AtomicU64,

    /// Page escalated into the detailed page map.
    page_detail: AtomicBool,

    /// At least one line of this page has a detailed record.
    cache_detail: AtomicBool,

    /// Writer transitions per cache line, indexed by line position within
    /// the page.
    writes_per_line: [AtomicU32; CACHE_LINES_PER_PAGE],

    /// Last thread seen writing each line, for transition detection.
    last_writer_per_line: [AtomicU32; CACHE_LINES_PER_PAGE],
}

impl PageRecord {
    pub fn new(first_touch_thread: u32) -> Self {
        const LINE_ZERO: AtomicU32 = AtomicU32::new(0);
        const WRITER_UNSET: AtomicU32 = AtomicU32::new(UNSET_THREAD);
        Self {
            first_touch_thread,
            foreign_accesses: AtomicU64::new(0),
            page_detail: AtomicBool::new(false),
            cache_detail: AtomicBool::new(false),
            writes_per_line: [LINE_ZERO; CACHE_LINES_PER_PAGE],
            last_writer_per_line: [WRITER_UNSET; CACHE_LINES_PER_PAGE],
        }
    }

    #[inline]
    pub fn first_touch_thread(&self) -> u32 {
        self.first_touch_thread
    }

    #[inline]
    pub fn is_foreign(&self, thread: u32) -> bool {
        thread != self.first_touch_thread
    }

    /// Count one foreign access. Returns `None` when the bounded CAS budget
    /// is exhausted (the caller records a lost sample).
    #[inline]
    pub fn add_foreign_access(&self, retries: usize) -> Option<u64> {
        AtomicUtils::bounded_add(&self.foreign_accesses, 1, retries)
    }

    /// Record one write by `thread` against the line at `line_index`.
    ///
    /// Bumps the transition counter only when the writer differs from the
    /// previous writer of that line; the very first writer establishes the
    /// baseline without counting. Returns `None` when the bounded CAS
    /// budget is exhausted.
    #[inline]
    pub fn add_line_write(&self, line_index: usize, thread: u32, retries: usize) -> Option<u32> {
        debug_assert!(line_index < CACHE_LINES_PER_PAGE);

        let last = self.last_writer_per_line[line_index].load(Ordering::Relaxed);
        if last == thread {
            return Some(self.writes_per_line[line_index].load(Ordering::Relaxed));
        }

        // Claim the writer transition; a racing thread that wins the swap
        // accounts the transition instead.
        if self.last_writer_per_line[line_index]
            .compare_exchange(last, thread, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        if last == UNSET_THREAD {
            return Some(self.writes_per_line[line_index].load(Ordering::Relaxed));
        }
        AtomicUtils::bounded_add_u32(&self.writes_per_line[line_index], 1, retries)
    }

    #[inline]
    pub fn foreign_accesses(&self) -> u64 {
        self.foreign_accesses.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn line_writes(&self, line_index: usize) -> u32 {
        self.writes_per_line[line_index].load(Ordering::SeqCst)
    }

    /// Whether foreign traffic has crossed the page-sharing threshold.
    #[inline]
    pub fn wants_page_detail(&self, threshold: u64) -> bool {
        self.foreign_accesses.load(Ordering::Relaxed) > threshold
    }

    /// Whether writes to `line_index` have crossed the cache-sharing
    /// threshold.
    #[inline]
    pub fn wants_line_detail(&self, line_index: usize, threshold: u32) -> bool {
        self.writes_per_line[line_index].load(Ordering::Relaxed) > threshold
    }

    /// One-shot transition of the page-detail flag. Returns true for exactly
    /// one caller; the flag never goes back to false.
    #[inline]
    pub fn mark_page_detail(&self) -> bool {
        AtomicUtils::swap_if(&self.page_detail, false, true)
    }

    #[inline]
    pub fn has_page_detail(&self) -> bool {
        self.page_detail.load(Ordering::SeqCst)
    }

    /// One-shot transition of the cache-detail flag.
    #[inline]
    pub fn mark_cache_detail(&self) -> bool {
        AtomicUtils::swap_if(&self.cache_detail, false, true)
    }

    #[inline]
    pub fn has_cache_detail(&self) -> bool {
        self.cache_detail.load(Ordering::SeqCst)
    }
}

/// PageDetailRecord - read/write split by locality for an escalated page
///
/// "Local" means the accessing thread is the page's first-touch thread.
pub struct PageDetailRecord {
    reads_local: AtomicU64,
    reads_remote: AtomicU64,
    writes_local: AtomicU64,
    writes_remote: AtomicU64,
}

impl PageDetailRecord {
    pub fn new() -> Self {
        Self {
            reads_local: AtomicU64::new(0),
            reads_remote: AtomicU64::new(0),
            writes_local: AtomicU64::new(0),
            writes_remote: AtomicU64::new(0),
        }
    }

    /// Count one access. Returns `None` on CAS budget exhaustion.
    #[inline]
    pub fn record_access(&self, is_local: bool, is_write: bool, retries: usize) -> Option<u64> {
        let counter = match (is_write, is_local) {
            (false, true) => &self.reads_local,
            (false, false) => &self.reads_remote,
            (true, true) => &self.writes_local,
            (true, false) => &self.writes_remote,
        };
        AtomicUtils::bounded_add(counter, 1, retries)
    }

    pub fn reads_local(&self) -> u64 {
        self.reads_local.load(Ordering::SeqCst)
    }

    pub fn reads_remote(&self) -> u64 {
        self.reads_remote.load(Ordering::SeqCst)
    }

    pub fn writes_local(&self) -> u64 {
        self.writes_local.load(Ordering::SeqCst)
    }

    pub fn writes_remote(&self) -> u64 {
        self.writes_remote.load(Ordering::SeqCst)
    }

    /// Remote share of all recorded traffic, for report ranking.
    pub fn remote_total(&self) -> u64 {
        self.reads_remote() + self.writes_remote()
    }
}

impl Default for PageDetailRecord {
    fn default() -> Self {
        Self::new()
    }
}
