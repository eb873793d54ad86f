//! Allocation-Freedom Tests
//!
//! The access path runs inside the target's own loads and stores, so it
//! must never touch the heap: a malloc there re-enters the interposed
//! allocator. These tests wrap the global allocator in a counter and
//! assert a zero delta across every hot-path operation.

mod common;

use common::{ProfFixture, HEAP_BASE, PAGE};
use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

static HEAP_OPS: AtomicU64 = AtomicU64::new(0);

struct CountingAlloc;

// SAFETY: defers every operation to System; only adds counting.
unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        HEAP_OPS.fetch_add(1, Ordering::Relaxed);
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        HEAP_OPS.fetch_add(1, Ordering::Relaxed);
        System.realloc(ptr, layout, new_size)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        HEAP_OPS.fetch_add(1, Ordering::Relaxed);
        System.alloc_zeroed(layout)
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

fn heap_ops() -> u64 {
    HEAP_OPS.load(Ordering::Relaxed)
}

/// Scenario: the whole hot surface measured against a counting allocator.
/// Setup (profiler construction, thread registration, escalation) happens
/// first; the measured region is single-threaded.
///
/// **Bug this finds:** Any heap allocation on the access, alloc/free, or
/// lock path, including on the already-escalated branches
#[test]
fn test_hot_paths_never_allocate() {
    let fixture = ProfFixture::with_defaults();
    let cold_page = HEAP_BASE + 700 * PAGE;
    let hot_line = HEAP_BASE + 710 * PAGE;

    // Register this thread's profiler id and escalate one line so the
    // measured region exercises the detailed branches too.
    fixture.reads(cold_page, 8, 1);
    common::escalate_line(&fixture.profiler, hot_line);
    fixture.profiler.on_alloc(0x71, hot_line, 8);

    let before = heap_ops();

    // Basic-page traffic, escalated-line traffic, attribution through the
    // resident object, page-map birth of a fresh page
    for i in 0..1_000 {
        fixture.profiler.on_access(cold_page + (i % 64) * 8, 8, true);
        fixture.profiler.on_access(hot_line, 8, true);
    }
    fixture.profiler.on_access(HEAP_BASE + 720 * PAGE, 8, false);

    // Allocation lifecycle, including the registry and arena paths
    for i in 0..100 {
        let ptr = HEAP_BASE + 730 * PAGE + i * 64;
        fixture.profiler.on_alloc(0x72, ptr, 16);
        fixture.profiler.on_access(ptr, 8, true);
        fixture.profiler.on_free(ptr);
    }
    fixture.profiler.on_free(HEAP_BASE + 740 * PAGE);

    // Lock hooks
    for _ in 0..100 {
        fixture.profiler.on_lock_acquire(0xb000);
        fixture.profiler.on_lock_release(0xb000);
    }

    let delta = heap_ops() - before;
    assert_eq!(delta, 0, "hot paths performed {delta} heap operations");
}

/// **Bug this finds:** Escalation itself reaching for the heap instead of
/// the pre-reserved shadow mappings
#[test]
fn test_escalation_paths_never_allocate() {
    let fixture = ProfFixture::with_defaults();
    let page = HEAP_BASE + 760 * PAGE;

    // Thread registration for both workers happens on their first access,
    // outside any measured window; escalation work itself runs on the
    // access path and must stay allocation-free. Threads and their stacks
    // allocate, so measure only the profiler's own window: park both
    // workers at a barrier first, then count.
    let barrier = std::sync::Barrier::new(2);
    let before = AtomicU64::new(0);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            fixture.profiler.on_access(page, 8, true);
            barrier.wait();
            for _ in 0..5_000 {
                fixture.profiler.on_access(page, 8, true);
            }
        });
        scope.spawn(|| {
            fixture.profiler.on_access(page + 8, 8, true);
            barrier.wait();
            before.store(heap_ops(), Ordering::SeqCst);
            for _ in 0..5_000 {
                fixture.profiler.on_access(page + 8, 8, true);
            }
        });
    });

    // The page escalated inside the measured window
    let record = fixture.profiler.page_record(page).expect("page tracked");
    assert!(record.has_page_detail());
    let delta = heap_ops() - before.load(Ordering::SeqCst);
    assert_eq!(delta, 0, "escalation performed {delta} heap operations");
}
