//! Shadow Module - O(1) Address-Keyed Stores
//!
//! Three stores cover every record the profiler keeps:
//!
//! - [`FlatShadowMap`]: one eager non-reserving fragment spanning a fixed
//!   address aperture; backs the always-on per-page records.
//! - [`TieredShadowMap`]: lazily mapped fragments selected by the high
//!   address bits; backs the detailed page and cache-line records, which
//!   only ever exist for a tiny slice of the address space.
//! - [`ShadowRegistry`]: open-addressed fixed-capacity hash map; backs the
//!   object, allocation-site, and lock registries, whose keys are dense in
//!   value but sparse in address space.
//!
//! All three share a slot protocol: a two-byte status word in front of each
//! value moves `EMPTY -> WRITING -> READY`, writers win the slot with a
//! compare-and-set, construct the value in place, and publish; readers
//! either see `READY` or spin out the short `WRITING` gap. Backing memory
//! is always an anonymous mapping, never the process allocator.

pub mod flat;
pub mod registry;
pub mod tiered;

pub use flat::FlatShadowMap;
pub use registry::ShadowRegistry;
pub use tiered::TieredShadowMap;

/// Slot has never held a value. Must be zero: fresh mappings are zeroed.
pub(crate) const SLOT_EMPTY: u16 = 0;
/// A writer owns the slot and is constructing the value.
pub(crate) const SLOT_WRITING: u16 = 1;
/// The value is published.
pub(crate) const SLOT_READY: u16 = 2;
/// The value was removed; the slot stays claimed for probe continuity
/// (registry only).
pub(crate) const SLOT_TOMBSTONE: u16 = 3;

/// Bytes reserved for the status word in front of each value.
pub(crate) const STATUS_SIZE: usize = 2;
