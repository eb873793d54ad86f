//! Thread Identity - Profiler Thread Ids
//!
//! The runtime callbacks carry no thread argument, so each thread derives a
//! small dense profiler id on first use from a global counter. The id is
//! cached in a thread-local register; after the first callback the lookup is
//! a plain thread-local read with no atomics and no allocation.
//!
//! Id 0 belongs to whichever thread reaches the profiler first, which in a
//! preloaded process is the main thread.

use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::util::constants::UNSET_THREAD;

/// Next id to hand out
static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(0);

thread_local! {
    static THREAD_ID: Cell<u32> = const { Cell::new(UNSET_THREAD) };
}

/// Profiler id of the calling thread, assigned on first use.
#[inline]
pub fn current_thread_id() -> u32 {
    THREAD_ID.with(|slot| {
        let id = slot.get();
        if id != UNSET_THREAD {
            return id;
        }
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::SeqCst);
        slot.set(id);
        id
    })
}

/// Number of threads that have touched the profiler so far.
pub fn registered_threads() -> u32 {
    NEXT_THREAD_ID.load(Ordering::SeqCst)
}
