//! Memory Module - Profiler-Private Memory
//!
//! Everything the profiler stores lives in memory it maps itself: shadow
//! fragments, registries, and the object arena are all carved out of
//! anonymous mappings. The target program's allocator is never involved, so
//! the callbacks stay safe to run from inside an allocator interposer.

pub mod arena;
pub mod mapping;
pub mod page;

pub use arena::ObjectArena;
pub use mapping::MemoryMapping;
