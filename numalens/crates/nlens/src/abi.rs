//! C ABI Surface
//!
//! The ten access callbacks the compiler pass targets, plus the hooks the
//! allocator/pthread interposer calls. All of them forward into one global
//! [`Profiler`] built lazily from the environment, so the first callback to
//! arrive initialises the runtime even when no constructor ran.
//!
//! With the `preload` feature the crate builds as a `cdylib`: an
//! `.init_array` constructor brings the profiler up before the target's
//! `main`, and the shutdown report is registered with `atexit`. The report
//! runs at most once even if the exit hook and an explicit
//! `nlens_shutdown` race.

use crate::config::ProfilerConfig;
use crate::error;
use crate::pipeline::Profiler;
use crate::report;
use lazy_static::lazy_static;
use parking_lot::Once;

lazy_static! {
    static ref PROFILER: Profiler = match Profiler::new(ProfilerConfig::from_env()) {
        Ok(profiler) => profiler,
        Err(err) => error::fatal(&err),
    };
}

static REPORT_ONCE: Once = Once::new();

/// The process-wide profiler, created on first use.
pub fn global() -> &'static Profiler {
    &PROFILER
}

#[no_mangle]
pub extern "C" fn load_1bytes(addr: usize) {
    global().on_access(addr, 1, false);
}

#[no_mangle]
pub extern "C" fn load_2bytes(addr: usize) {
    global().on_access(addr, 2, false);
}

#[no_mangle]
pub extern "C" fn load_4bytes(addr: usize) {
    global().on_access(addr, 4, false);
}

#[no_mangle]
pub extern "C" fn load_8bytes(addr: usize) {
    global().on_access(addr, 8, false);
}

#[no_mangle]
pub extern "C" fn load_16bytes(addr: usize) {
    global().on_access(addr, 16, false);
}

#[no_mangle]
pub extern "C" fn store_1bytes(addr: usize) {
    global().on_access(addr, 1, true);
}

#[no_mangle]
pub extern "C" fn store_2bytes(addr: usize) {
    global().on_access(addr, 2, true);
}

#[no_mangle]
pub extern "C" fn store_4bytes(addr: usize) {
    global().on_access(addr, 4, true);
}

#[no_mangle]
pub extern "C" fn store_8bytes(addr: usize) {
    global().on_access(addr, 8, true);
}

#[no_mangle]
pub extern "C" fn store_16bytes(addr: usize) {
    global().on_access(addr, 16, true);
}

/// Allocation hook for the interposer.
#[no_mangle]
pub extern "C" fn nlens_alloc(fingerprint: u64, ptr: usize, size: usize) {
    global().on_alloc(fingerprint, ptr, size);
}

/// Free hook for the interposer.
#[no_mangle]
pub extern "C" fn nlens_free(ptr: usize) {
    global().on_free(ptr);
}

/// pthread lock-acquire hook.
#[no_mangle]
pub extern "C" fn nlens_lock_acquire(lock: usize) {
    global().on_lock_acquire(lock);
}

/// pthread lock-release hook.
#[no_mangle]
pub extern "C" fn nlens_lock_release(lock: usize) {
    global().on_lock_release(lock);
}

/// Force profiler initialisation. Idempotent.
#[no_mangle]
pub extern "C" fn nlens_init() {
    let _ = global();
}

/// Emit the shutdown report. Safe to call from `atexit` and explicitly;
/// only the first caller emits.
#[no_mangle]
pub extern "C" fn nlens_shutdown() {
    REPORT_ONCE.call_once(|| {
        if let Err(err) = report::emit(global()) {
            log::error!("report emission failed: {err}");
        }
    });
}

#[cfg(feature = "preload")]
mod preload {
    /// Runs before the target's `main` via `.init_array`.
    extern "C" fn startup() {
        super::nlens_init();
        // SAFETY: registering a plain extern fn with no captured state.
        unsafe {
            libc::atexit(shutdown_hook);
        }
    }

    extern "C" fn shutdown_hook() {
        super::nlens_shutdown();
    }

    #[used]
    #[link_section = ".init_array"]
    static CONSTRUCTOR: extern "C" fn() = startup;
}
