//! Page and Cache-Line Geometry
//!
//! Address math shared by the whole profiler. A page is the unit of NUMA
//! placement (4KB), a cache line the unit of coherence traffic (64B); every
//! shadow structure is keyed by one of the two.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Standard page size (4KB)
pub const PAGE_SIZE: usize = 4 * 1024;

/// Cache line size (64 bytes)
pub const CACHE_LINE_SIZE: usize = 64;

/// Cache lines per page
pub const CACHE_LINES_PER_PAGE: usize = PAGE_SIZE / CACHE_LINE_SIZE;

/// System page size (cached)
static SYSTEM_PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Get system page size dynamically
///
/// Returns actual system page size from OS.
/// Caches result for performance.
pub fn get_page_size() -> usize {
    let cached = SYSTEM_PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }

    let size = page_size::get();
    SYSTEM_PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

/// Align address to page boundary (round down)
pub fn page_base(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Calculate page number from address
pub fn page_number(addr: usize) -> usize {
    addr >> PAGE_SIZE.trailing_zeros()
}

/// Calculate offset within page
pub fn page_offset(addr: usize) -> usize {
    addr & (PAGE_SIZE - 1)
}

/// Align address to cache-line boundary (round down)
pub fn line_base(addr: usize) -> usize {
    addr & !(CACHE_LINE_SIZE - 1)
}

/// Index of the cache line within its page (0..CACHE_LINES_PER_PAGE)
pub fn line_index_in_page(addr: usize) -> usize {
    (addr & (PAGE_SIZE - 1)) >> CACHE_LINE_SIZE.trailing_zeros()
}

/// Offset within the cache line
pub fn line_offset(addr: usize) -> usize {
    addr & (CACHE_LINE_SIZE - 1)
}

/// Align size to page boundary (round up)
pub fn align_to_page(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Whether `[addr, addr + size)` crosses a page boundary.
///
/// Such accesses are split into two events by the pipeline.
pub fn crosses_page(addr: usize, size: usize) -> bool {
    size > 0 && page_base(addr) != page_base(addr + size - 1)
}
