//! Record Module - Per-Address Profiling State
//!
//! The fixed-size records the shadow maps and registries hand out: one per
//! page, per escalated page, per escalated cache line, per live heap object,
//! per allocation site, and per lock. Every mutable field is an atomic; the
//! records are built in place inside profiler-owned mappings and are never
//! moved, so the pipeline can hold plain references across threads.

pub mod cache_line;
pub mod lock;
pub mod object;
pub mod page;

pub use cache_line::{CacheLineRecord, InvalidationKind, WriteOutcome};
pub use lock::LockRecord;
pub use object::{ObjectRecord, SiteRecord};
pub use page::{PageDetailRecord, PageRecord};
