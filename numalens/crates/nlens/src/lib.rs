//! # NumaLens - NUMA and Cache Pathology Profiler Runtime
//!
//! NumaLens is a runtime profiler that detects NUMA- and cache-related
//! performance pathologies in multithreaded native programs: cross-socket
//! page sharing, cache-line false sharing, and lock contention. It observes
//! every load and store of the target via compiler-inserted callbacks,
//! attributes accesses to heap objects, and at shutdown reports the
//! objects, cache lines, and allocation sites most responsible for
//! inter-thread coherence traffic.
//!
//! ## Overview
//!
//! The runtime is built around a tiered set of O(1) shadow structures:
//!
//! - **Flat page map**: one eager, non-reserving mapping with a record per
//!   page of a configurable address aperture; the always-on first stop of
//!   every access
//! - **Tiered detail maps**: lazily mapped fragments holding detailed page
//!   and cache-line records, which exist only for escalated addresses
//! - **Shadow registries**: open-addressed, mapping-backed tables for live
//!   objects, allocation sites, and locks
//! - **Object arena**: a fixed slab of object records recycled through a
//!   lock-free free list
//!
//! Everything runs on the target program's threads. The access path takes
//! no locks, never calls the target's allocator, and resolves every
//! recoverable failure into a counter rather than an error, so the profiler
//! can never deadlock or unwind into the program it is watching.
//!
//! ## Quick Start
//!
//! ```rust
//! use nlens::ProfilerConfig;
//!
//! fn main() -> Result<(), nlens::NlensError> {
//!     // Private profiler instance with aggressive escalation
//!     let profiler = nlens::init_with_config(ProfilerConfig {
//!         page_detail_threshold: 10,
//!         cache_detail_threshold: 10,
//!         page_map_span: 1 << 32,
//!         fragment_bytes: 1 << 20,
//!         max_fragments: 1 << 16,
//!         ..Default::default()
//!     })?;
//!
//!     // Feed it events the way the compiler callbacks would
//!     profiler.on_alloc(0xfeed, 0x20_0000, 64);
//!     profiler.on_access(0x20_0000, 8, true);
//!
//!     let report = nlens::report::build_report(&profiler);
//!     assert_eq!(report.counters["allocations"], 1);
//!     Ok(())
//! }
//! ```
//!
//! In a real deployment the crate is built with the `preload` feature as a
//! `cdylib`, loaded with `LD_PRELOAD`, and driven entirely through the C
//! ABI in [`abi`]; the snippet above is the same engine with a private
//! context, which is how the test suite exercises it.
//!
//! ## Architecture
//!
//! ```text
//! instrumented program
//!   load_8bytes(addr) / store_8bytes(addr) / nlens_alloc / nlens_free
//!        │
//!        ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ pipeline::Profiler                                  │
//! │                                                     │
//! │  flat page map ──► PageRecord (first touch,         │
//! │        │            foreign traffic, line writes)   │
//! │        │ escalation                                 │
//! │        ▼                                            │
//! │  tiered maps ────► PageDetailRecord                 │
//! │        │           CacheLineRecord ── residents ─┐  │
//! │        ▼                                         │  │
//! │  registries ─────► ObjectRecord ◄────────────────┘  │
//! │   + arena          SiteRecord, LockRecord           │
//! └────────────────────────┬────────────────────────────┘
//!                          │ shutdown
//!                          ▼
//!              report::Report (text or JSON)
//! ```
//!
//! ## Modules
//!
//! - [`abi`]: C ABI exports for the compiler callbacks and the interposer
//! - [`config`]: configuration parameters and `NUMAPERF_*` environment parsing
//! - [`error`]: error types for all NumaLens operations
//! - [`mem`]: profiler-private mappings, page geometry, and the object arena
//! - [`pipeline`]: the access-attribution engine
//! - [`record`]: per-page, per-line, per-object, and per-lock records
//! - [`report`]: shutdown report building and rendering
//! - [`shadow`]: the O(1) address-keyed shadow stores
//! - [`stats`]: event counters and drop accounting
//! - [`thread`]: dense profiler thread ids
//! - [`util`]: alignment math, atomic helpers, spinlock
//!
//! ## Limitations
//!
//! - Addresses above the configured page-map aperture are counted, not
//!   tracked
//! - Objects allocated before their cache line escalates may stay
//!   unattributed if the line never sees another allocation
//! - Counter updates losing a bounded CAS race are dropped (and counted)
//!   rather than retried forever

// Engine
pub mod pipeline;
pub mod config;
pub mod error;

// Storage subsystems
pub mod mem;
pub mod record;
pub mod shadow;

// External surface
pub mod abi;
pub mod report;

// Monitoring
pub mod stats;
pub mod thread;

// Utilities
pub mod util;

// Re-export main types for convenience
pub use config::{ConfigError, ProfilerConfig};
pub use error::{NlensError, Result};
pub use pipeline::Profiler;
pub use stats::{ProfilerStats, StatsSnapshot};

/// NumaLens version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize a profiler from the `NUMAPERF_*` environment
///
/// Builds a private [`Profiler`] instance; the global instance behind the
/// C ABI initialises itself lazily and does not go through here.
///
/// # Returns
///
/// - `Ok(Profiler)` - profiler with all shadow memory reserved
/// - `Err(NlensError)` - invalid configuration or a failed mapping
pub fn init() -> Result<Profiler> {
    Profiler::new(ProfilerConfig::from_env())
}

/// Initialize a profiler with a custom configuration
///
/// # Arguments
///
/// * `config` - profiler configuration; validated before any mapping is
///   created
pub fn init_with_config(config: ProfilerConfig) -> Result<Profiler> {
    Profiler::new(config)
}
