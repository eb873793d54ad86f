//! Access-Handling Pipeline
//!
//! The state machine behind every callback: resolve the address to its page
//! record, do the cheap page-level bookkeeping, escalate pages and cache
//! lines that cross their thresholds, and attribute detailed traffic to the
//! resident heap objects. Everything here runs on the target program's
//! threads: no heap allocation, no locks the target could hold, no
//! logging, and every recoverable failure becomes a counter instead of
//! an error.
//!
//! Drop accounting: each access event ends in exactly one of `observed`,
//! `lost_samples`, or `aperture_drops`; a page-crossing access contributes
//! two events (`split_accesses` counts the extra one).

use crate::config::ProfilerConfig;
use crate::error::{self, Result};
use crate::mem::page::{
    crosses_page, line_base, line_index_in_page, page_base, CACHE_LINE_SIZE, PAGE_SIZE,
};
use crate::mem::{MemoryMapping, ObjectArena};
use crate::record::{
    CacheLineRecord, LockRecord, ObjectRecord, PageDetailRecord, PageRecord, SiteRecord,
    WriteOutcome,
};
use crate::shadow::{FlatShadowMap, ShadowRegistry, TieredShadowMap};
use crate::stats::ProfilerStats;
use crate::thread::current_thread_id;
use crate::util::constants::UNSET_THREAD;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Escalated pages remembered for the report's page-sharing section.
const PAGE_LOG_CAPACITY: usize = 1 << 16;

/// Registry entry pointing a live heap pointer at its arena record.
///
/// The index is unset for the short window between winning the registry
/// slot and claiming an arena slot; readers skip unset entries.
pub struct ObjectSlot {
    index: AtomicU32,
}

impl ObjectSlot {
    fn new() -> Self {
        Self {
            index: AtomicU32::new(UNSET_THREAD),
        }
    }

    #[inline]
    pub fn index(&self) -> Option<u32> {
        let index = self.index.load(Ordering::SeqCst);
        if index == UNSET_THREAD {
            None
        } else {
            Some(index)
        }
    }

    fn set(&self, index: u32) {
        self.index.store(index, Ordering::SeqCst);
    }
}

/// Append-only list of escalated page bases, mapping-backed so pushes on
/// the access path allocate nothing. Pushes past capacity are silently
/// absorbed; the page still has its detail record, it just falls out of
/// the report's page section.
struct AddressLog {
    mapping: MemoryMapping,
    len: AtomicUsize,
}

impl AddressLog {
    fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            mapping: MemoryMapping::anonymous_noreserve(capacity * 8)?,
            len: AtomicUsize::new(0),
        })
    }

    fn capacity(&self) -> usize {
        self.mapping.size() / 8
    }

    fn push(&self, addr: usize) {
        let index = self.len.fetch_add(1, Ordering::SeqCst);
        if index >= self.capacity() {
            return;
        }
        // SAFETY: index is below capacity; the slot is exclusively ours via
        // the fetch_add reservation.
        unsafe {
            let slot = self.mapping.as_ptr().add(index * 8).cast::<AtomicUsize>();
            (*slot).store(addr, Ordering::SeqCst);
        }
    }

    fn for_each(&self, mut visit: impl FnMut(usize)) {
        let len = self.len.load(Ordering::SeqCst).min(self.capacity());
        for index in 0..len {
            // SAFETY: bounded by the clamped length.
            let addr = unsafe {
                (*self.mapping.as_ptr().add(index * 8).cast::<AtomicUsize>())
                    .load(Ordering::SeqCst)
            };
            // A racing push may not have stored yet
            if addr != 0 {
                visit(addr);
            }
        }
    }
}

/// Profiler - the access-attribution engine
///
/// Owns every shadow structure and registry. One instance lives in the
/// global context behind the C ABI; tests build private instances with
/// small geometry.
pub struct Profiler {
    config: ProfilerConfig,
    stats: ProfilerStats,
    /// Always-on per-page records over the flat aperture.
    page_map: FlatShadowMap<PageRecord>,
    /// Locality splits for escalated pages.
    page_detail_map: TieredShadowMap<PageDetailRecord>,
    /// Detailed records for escalated cache lines.
    line_map: TieredShadowMap<CacheLineRecord>,
    /// Live heap pointers to arena records.
    objects: ShadowRegistry<ObjectSlot>,
    /// Allocation-site aggregates by fingerprint.
    sites: ShadowRegistry<SiteRecord>,
    /// Lock records by lock address.
    locks: ShadowRegistry<LockRecord>,
    arena: ObjectArena,
    escalated_pages: AddressLog,
}

impl core::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Profiler").finish_non_exhaustive()
    }
}

impl Profiler {
    /// Build a profiler from a validated configuration. All shadow memory
    /// is reserved here; the only mappings created later are tiered
    /// fragments.
    pub fn new(config: ProfilerConfig) -> Result<Self> {
        config.validate()?;

        // One line record covers 64B where a page record covers 4KB, so
        // the line map needs proportionally larger fragments to span the
        // same addresses with the same fragment table.
        let line_fragment_bytes = config.fragment_bytes * (PAGE_SIZE / CACHE_LINE_SIZE);

        let profiler = Self {
            page_map: FlatShadowMap::new(config.page_map_span, PAGE_SIZE, true)?,
            page_detail_map: TieredShadowMap::new(
                PAGE_SIZE,
                config.fragment_bytes,
                config.max_fragments,
                false,
            )?,
            line_map: TieredShadowMap::new(
                CACHE_LINE_SIZE,
                line_fragment_bytes,
                config.max_fragments,
                true,
            )?,
            objects: ShadowRegistry::new(config.object_capacity)?,
            sites: ShadowRegistry::new(config.site_capacity)?,
            locks: ShadowRegistry::new(config.lock_capacity)?,
            arena: ObjectArena::new(config.object_capacity)?,
            escalated_pages: AddressLog::new(PAGE_LOG_CAPACITY)?,
            stats: ProfilerStats::new(),
            config,
        };

        if profiler.config.verbose {
            log::info!(
                "profiler up: aperture {:#x}, {} shadow bytes reserved for pages",
                profiler.config.page_map_span,
                profiler.page_map.shadow_bytes()
            );
        }
        Ok(profiler)
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn stats(&self) -> &ProfilerStats {
        &self.stats
    }

    /// One load or store from the instrumented program.
    #[inline]
    pub fn on_access(&self, addr: usize, size: usize, is_write: bool) {
        self.stats.record_access_callback();
        let thread = current_thread_id();

        if crosses_page(addr, size) {
            // Split into one event per touched page; the second half is an
            // extra event for the accounting.
            self.stats.record_split_access();
            self.handle_event(thread, addr, is_write);
            self.handle_event(thread, page_base(addr) + PAGE_SIZE, is_write);
        } else {
            self.handle_event(thread, addr, is_write);
        }
    }

    /// One access event, already confined to a single page.
    fn handle_event(&self, thread: u32, addr: usize, is_write: bool) {
        // 1. Page resolution
        let Some((page, created)) = self
            .page_map
            .get_or_insert_with(addr, || PageRecord::new(thread))
        else {
            self.stats.record_aperture_drop();
            return;
        };
        if created {
            self.stats.record_page_tracked();
        }

        let mut lost = false;
        let retries = self.config.retry_limit;

        // 2. Page-level bookkeeping
        if page.is_foreign(thread) && page.add_foreign_access(retries).is_none() {
            lost = true;
        }
        let line_index = line_index_in_page(addr);
        if is_write && page.add_line_write(line_index, thread, retries).is_none() {
            lost = true;
        }

        // 3. Escalation checks
        if page.wants_page_detail(self.config.page_detail_threshold) && !page.has_page_detail() {
            self.escalate_page(page, addr);
        }
        if page.has_page_detail() {
            if let Some(detail) = self.page_detail_map.find(addr) {
                if detail
                    .record_access(!page.is_foreign(thread), is_write, retries)
                    .is_none()
                {
                    lost = true;
                }
            }
        }
        if page.wants_line_detail(line_index, self.config.cache_detail_threshold)
            && self.line_map.find(line_base(addr)).is_none()
        {
            self.escalate_line(page, line_base(addr), thread);
        }

        // 4 + 5. Cache-line bookkeeping and object attribution
        if page.has_cache_detail() {
            if let Some(line) = self.line_map.find(line_base(addr)) {
                let outcome = line.record_access(thread, is_write, retries);
                if outcome == WriteOutcome::Dropped {
                    lost = true;
                }

                let resident = line.resident_at(addr);
                if resident != 0 {
                    // SAFETY: resident slots only ever hold addresses of
                    // arena records, which live as long as the profiler.
                    let object = unsafe { &*(resident as *const ObjectRecord) };
                    if object.record_access(thread, retries).is_none() {
                        lost = true;
                    }
                    if matches!(outcome, WriteOutcome::Invalidation(_))
                        && object.record_invalidation(retries).is_none()
                    {
                        lost = true;
                    }
                }
            }
        }

        if lost {
            self.stats.record_lost_sample();
        } else {
            self.stats.record_observed();
        }
    }

    /// One-shot page escalation: exactly the thread that wins the flag
    /// creates the detail record and logs the page.
    fn escalate_page(&self, page: &PageRecord, addr: usize) {
        if !page.mark_page_detail() {
            return;
        }
        match self
            .page_detail_map
            .get_or_insert_with(page_base(addr), PageDetailRecord::new)
        {
            Ok(_) => {
                self.stats.record_page_escalation();
                self.escalated_pages.push(page_base(addr));
            }
            Err(err) => error::fatal(&err),
        }
    }

    /// Create the detailed record for one cache line and back-fill its
    /// resident index.
    fn escalate_line(&self, page: &PageRecord, line: usize, thread: u32) {
        match self
            .line_map
            .get_or_insert_with(line, || CacheLineRecord::new(line, thread))
        {
            Ok((record, true)) => {
                page.mark_cache_detail();
                self.stats.record_line_escalation();
                self.backfill_residents(record, line);
            }
            Ok((_, false)) => {
                // Lost the creation race; the winner back-fills.
                page.mark_cache_detail();
            }
            Err(err) => error::fatal(&err),
        }
    }

    /// Late-escalation back-fill: probe the object registry for objects
    /// starting inside the line, and the previous line's residents for one
    /// spilling across the boundary. Objects allocated before escalation
    /// whose start lies in a line that never re-allocates may stay
    /// unattributed; that is the accepted bounded-cost trade.
    fn backfill_residents(&self, record: &CacheLineRecord, line: usize) {
        for offset in 0..CACHE_LINE_SIZE {
            if let Some(slot) = self.objects.find(line + offset) {
                if let Some(index) = slot.index() {
                    record.install_resident(line + offset, self.arena.record_ptr(index));
                }
            }
        }

        if let Some(previous) = self.line_map.find(line.wrapping_sub(CACHE_LINE_SIZE)) {
            previous.for_each_resident(|_, ptr| {
                // SAFETY: resident slots hold arena record addresses.
                let object = unsafe { &*(ptr as *const ObjectRecord) };
                if object.start_address() + object.size() > line {
                    record.install_resident(object.start_address(), ptr);
                }
            });
        }
    }

    /// One allocation from the interposer. Zero-sized allocations are
    /// ignored.
    pub fn on_alloc(&self, fingerprint: u64, ptr: usize, size: usize) {
        if size == 0 {
            return;
        }
        self.stats.record_allocation();
        let thread = current_thread_id();

        if let Some((site, _)) = self
            .sites
            .get_or_insert_with(fingerprint as usize, || SiteRecord::new(fingerprint))
        {
            site.record_allocation(size);
        } else {
            self.stats.record_capacity_drop();
        }

        let Some((slot, created)) = self.objects.get_or_insert_with(ptr, ObjectSlot::new) else {
            self.stats.record_capacity_drop();
            return;
        };

        let index = if created {
            match self.arena.alloc() {
                Some(index) => {
                    slot.set(index);
                    index
                }
                None => {
                    self.objects.remove(ptr);
                    self.stats.record_capacity_drop();
                    return;
                }
            }
        } else {
            // The pointer is still live in the registry: the target missed
            // a free. Merge the stale record into its site, then reuse the
            // registry and arena slots for the new generation.
            let Some(index) = slot.index() else {
                self.stats.record_capacity_drop();
                return;
            };
            let stale = self.arena.get(index);
            self.merge_into_site(stale, true);
            self.clear_residents(stale.start_address(), stale.size(), index);
            self.stats.record_missed_free();
            index
        };

        self.arena.get(index).reset(ptr, size, fingerprint, thread);
        self.install_residents(ptr, size, index);
    }

    /// One free from the interposer. Unknown pointers are counted and
    /// ignored.
    pub fn on_free(&self, ptr: usize) {
        self.stats.record_free();

        let index = match self.objects.find(ptr).and_then(ObjectSlot::index) {
            Some(index) => index,
            None => {
                self.stats.record_unknown_free();
                return;
            }
        };

        let object = self.arena.get(index);
        self.merge_into_site(object, true);
        self.clear_residents(object.start_address(), object.size(), index);
        self.objects.remove(ptr);
        self.arena.free(index);
    }

    /// Report-time merge of a still-live object into its site, without
    /// counting a free.
    pub fn merge_live_object(&self, object: &ObjectRecord) {
        self.merge_into_site(object, false);
    }

    fn merge_into_site(&self, object: &ObjectRecord, freed: bool) {
        if let Some(site) = self.sites.find(object.site_fingerprint() as usize) {
            site.merge_object(object, freed);
        }
    }

    /// Register the object in every already-escalated line it touches.
    /// Lines that escalate later pick it up through the back-fill.
    fn install_residents(&self, ptr: usize, size: usize, index: u32) {
        let record_ptr = self.arena.record_ptr(index);
        let mut line = line_base(ptr);
        while line < ptr + size {
            if let Some(record) = self.line_map.find(line) {
                record.install_resident(ptr, record_ptr);
            }
            line += CACHE_LINE_SIZE;
        }
    }

    fn clear_residents(&self, ptr: usize, size: usize, index: u32) {
        let record_ptr = self.arena.record_ptr(index);
        let mut line = line_base(ptr);
        while line < ptr + size {
            if let Some(record) = self.line_map.find(line) {
                record.clear_resident(ptr, record_ptr);
            }
            line += CACHE_LINE_SIZE;
        }
    }

    /// One lock acquire from the pthread interposer. Lock counters never
    /// drop; a full lock registry only costs the per-lock split.
    pub fn on_lock_acquire(&self, lock: usize) {
        match self.locks.get_or_insert_with(lock, LockRecord::new) {
            Some((record, _)) => {
                let contended = record.acquire();
                self.stats.record_lock_acquire(contended);
            }
            None => {
                self.stats.record_capacity_drop();
                self.stats.record_lock_acquire(false);
            }
        }
    }

    pub fn on_lock_release(&self, lock: usize) {
        if let Some(record) = self.locks.find(lock) {
            record.release();
        }
    }

    pub fn lock_has_contention(&self, lock: usize) -> bool {
        self.locks
            .find(lock)
            .map(LockRecord::has_contention)
            .unwrap_or(false)
    }

    // Reporter access. All of these are also what the integration tests
    // assert against.

    pub fn page_record(&self, addr: usize) -> Option<&PageRecord> {
        self.page_map.find(addr)
    }

    pub fn page_detail(&self, addr: usize) -> Option<&PageDetailRecord> {
        self.page_detail_map.find(addr)
    }

    pub fn line_record(&self, addr: usize) -> Option<&CacheLineRecord> {
        self.line_map.find(line_base(addr))
    }

    pub fn live_objects(&self) -> usize {
        self.arena.live()
    }

    /// Visit every live object record.
    pub fn for_each_object(&self, mut visit: impl FnMut(&ObjectRecord)) {
        let arena = &self.arena;
        self.objects.for_each(|_, slot| {
            if let Some(index) = slot.index() {
                visit(arena.get(index));
            }
        });
    }

    pub fn for_each_site(&self, mut visit: impl FnMut(&SiteRecord)) {
        self.sites.for_each(|_, site| visit(site));
    }

    pub fn for_each_lock(&self, mut visit: impl FnMut(usize, &LockRecord)) {
        self.locks.for_each(|addr, lock| visit(addr, lock));
    }

    /// Visit every escalated page with its basic and detailed records.
    pub fn for_each_escalated_page(
        &self,
        mut visit: impl FnMut(usize, &PageRecord, &PageDetailRecord),
    ) {
        self.escalated_pages.for_each(|page| {
            if let (Some(record), Some(detail)) =
                (self.page_map.find(page), self.page_detail_map.find(page))
            {
                visit(page, record, detail);
            }
        });
    }

    /// Escalated lines inside `[start, start + size)`, for per-object
    /// diagnosis.
    pub fn lines_of_range(&self, start: usize, size: usize, mut visit: impl FnMut(&CacheLineRecord)) {
        let mut line = line_base(start);
        while line < start + size {
            if let Some(record) = self.line_map.find(line) {
                visit(record);
            }
            line += CACHE_LINE_SIZE;
        }
    }
}
