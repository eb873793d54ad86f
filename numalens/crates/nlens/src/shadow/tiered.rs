//! Multi-Fragment Shadow Map
//!
//! The tiered map divides the address space into power-of-two windows. The
//! high bits of a key select a fragment slot; the low bits index within the
//! fragment. Fragments are non-reserving anonymous mappings born lazily
//! behind a single spinlock, so a map whose detail records cover a handful
//! of hot regions pays for exactly those fragments and nothing else.
//!
//! The window is derived from the configured fragment size: the fragment
//! holds `fragment_bytes / block_size` records covering `granularity` bytes
//! each, and that coverage is rounded up to the next power of two so the
//! fragment selector is a plain shift. A key whose fragment slot lies past
//! the table is a fatal setup error; the table never grows.

use crate::error::{NlensError, Result};
use crate::mem::MemoryMapping;
use crate::util::{Alignment, SpinLock};
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

use super::{SLOT_EMPTY, SLOT_READY, SLOT_WRITING, STATUS_SIZE};

struct FragmentEntry {
    /// Base address of the fragment, 0 until born. Published with Release
    /// after the mapping below is in place.
    base: AtomicUsize,
    /// Owning mapping, written once under the birth lock.
    mapping: UnsafeCell<Option<MemoryMapping>>,
}

/// TieredShadowMap - lazily fragmented shadow store
pub struct TieredShadowMap<V> {
    entries: Box<[FragmentEntry]>,
    birth_lock: SpinLock,
    granularity_shift: u32,
    window_shift: u32,
    window_mask: usize,
    block_size: usize,
    value_offset: usize,
    fragment_bytes: usize,
    _marker: PhantomData<V>,
}

// Fragment entries are written once under the birth lock and read through
// the atomic base; values mutate only through their own atomics.
unsafe impl<V: Send + Sync> Send for TieredShadowMap<V> {}
unsafe impl<V: Send + Sync> Sync for TieredShadowMap<V> {}

impl<V> TieredShadowMap<V> {
    /// Build a map with one record per `granularity` bytes, fragments of
    /// roughly `fragment_bytes`, and a table of `max_fragments` slots.
    pub fn new(
        granularity: usize,
        fragment_bytes: usize,
        max_fragments: usize,
        cache_line_blocks: bool,
    ) -> Result<Self> {
        debug_assert!(granularity.is_power_of_two());

        let value_offset = Alignment::align_up(STATUS_SIZE, std::mem::align_of::<V>().max(STATUS_SIZE));
        let rounding = if cache_line_blocks {
            Alignment::CACHE_LINE
        } else {
            Alignment::WORD
        };
        let block_size = Alignment::align_up(value_offset + std::mem::size_of::<V>(), rounding);

        // Address span one fragment covers, rounded up to a power of two
        // so the high bits select the fragment directly.
        let coverage = fragment_bytes / block_size * granularity;
        let window = Alignment::next_power_of_two(coverage.max(granularity));
        let granularity_shift = Alignment::shift_of(granularity);
        // Re-derive the fragment size from the rounded window so every
        // in-window key has a slot.
        let actual_fragment_bytes = (window >> granularity_shift) * block_size;

        let entries: Vec<FragmentEntry> = (0..max_fragments)
            .map(|_| FragmentEntry {
                base: AtomicUsize::new(0),
                mapping: UnsafeCell::new(None),
            })
            .collect();

        Ok(Self {
            entries: entries.into_boxed_slice(),
            birth_lock: SpinLock::new(),
            granularity_shift,
            window_shift: Alignment::shift_of(window),
            window_mask: window - 1,
            block_size,
            value_offset,
            fragment_bytes: actual_fragment_bytes,
            _marker: PhantomData,
        })
    }

    /// Actual per-fragment mapping size after window rounding.
    pub fn fragment_bytes(&self) -> usize {
        self.fragment_bytes
    }

    /// Number of fragments currently mapped.
    pub fn fragments_born(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.base.load(Ordering::SeqCst) != 0)
            .count()
    }

    #[inline]
    fn fragment_index(&self, key: usize) -> Result<usize> {
        let index = key >> self.window_shift;
        if index >= self.entries.len() {
            return Err(NlensError::FragmentOutOfRange {
                index,
                max: self.entries.len(),
            });
        }
        Ok(index)
    }

    fn create_fragment(&self, index: usize) -> Result<usize> {
        let _guard = self.birth_lock.lock();

        let existing = self.entries[index].base.load(Ordering::SeqCst);
        if existing != 0 {
            return Ok(existing);
        }

        let mapping = MemoryMapping::anonymous_noreserve(self.fragment_bytes)?;
        mapping.disable_transparent_huge_pages();
        let base = mapping.base();

        // SAFETY: the birth lock serialises all writers of this cell and
        // readers never touch it before `base` publishes below.
        unsafe {
            *self.entries[index].mapping.get() = Some(mapping);
        }
        self.entries[index].base.store(base, Ordering::SeqCst);
        Ok(base)
    }

    /// Block for `key`, birthing the fragment if it does not exist yet.
    #[inline]
    fn block_create(&self, key: usize) -> Result<*mut u8> {
        let index = self.fragment_index(key)?;
        let mut base = self.entries[index].base.load(Ordering::SeqCst);
        if base == 0 {
            base = self.create_fragment(index)?;
        }
        Ok(self.block_at(base, key))
    }

    /// Block for `key` if its fragment exists. Out-of-table keys are
    /// simply absent on the lookup side.
    #[inline]
    fn block_find(&self, key: usize) -> Option<*mut u8> {
        let index = self.fragment_index(key).ok()?;
        let base = self.entries[index].base.load(Ordering::SeqCst);
        if base == 0 {
            return None;
        }
        Some(self.block_at(base, key))
    }

    #[inline]
    fn block_at(&self, base: usize, key: usize) -> *mut u8 {
        let slot = (key & self.window_mask) >> self.granularity_shift;
        (base + slot * self.block_size) as *mut u8
    }

    #[inline]
    fn status(block: *mut u8) -> &'static AtomicU16 {
        // SAFETY: the status word leads every block; zeroed memory is a
        // valid AtomicU16.
        unsafe { &*(block as *const AtomicU16) }
    }

    #[inline]
    fn value(&self, block: *mut u8) -> *mut V {
        // SAFETY: value_offset respects V's alignment by construction.
        unsafe { block.add(self.value_offset) as *mut V }
    }

    /// Return the record for `key`, creating it (and its fragment) if
    /// absent. Exactly one caller per key observes `true`; losers spin
    /// until the winner publishes. Errors only on fragment-table overflow
    /// or a failed fragment mapping, both fatal for the caller.
    #[inline]
    pub fn get_or_insert_with(&self, key: usize, make: impl FnOnce() -> V) -> Result<(&V, bool)> {
        let block = self.block_create(key)?;
        let status = Self::status(block);

        loop {
            match status.compare_exchange(
                SLOT_EMPTY,
                SLOT_WRITING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    let value_ptr = self.value(block);
                    // SAFETY: this thread owns the slot (WRITING).
                    unsafe { value_ptr.write(make()) };
                    status.store(SLOT_READY, Ordering::SeqCst);
                    return Ok((unsafe { &*value_ptr }, true));
                }
                Err(SLOT_READY) => {
                    return Ok((unsafe { &*self.value(block) }, false));
                }
                Err(_) => std::hint::spin_loop(),
            }
        }
    }

    /// Record for `key`, if its fragment exists and the slot is published.
    /// Never creates a fragment; out-of-table keys are simply absent.
    #[inline]
    pub fn find(&self, key: usize) -> Option<&V> {
        let block = self.block_find(key)?;
        let status = Self::status(block);

        loop {
            match status.load(Ordering::SeqCst) {
                SLOT_READY => return Some(unsafe { &*self.value(block) }),
                SLOT_EMPTY => return None,
                _ => std::hint::spin_loop(),
            }
        }
    }

    /// Clear the status word for `key`; the value bytes are reclaimed by
    /// the next insert's in-place construction.
    pub fn remove(&self, key: usize) {
        if let Some(block) = self.block_find(key) {
            Self::status(block).store(SLOT_EMPTY, Ordering::SeqCst);
        }
    }
}
