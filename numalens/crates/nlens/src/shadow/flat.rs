//! Single-Fragment Shadow Map
//!
//! The flat map is one eager, non-reserving anonymous mapping covering a
//! configurable address aperture starting at zero. A key maps to its slot
//! with a shift and a multiply, so the always-on page lookup on the access
//! path is two instructions of address math plus one status load. Addresses
//! above the aperture return `None`; the caller counts them as capacity
//! drops (the aperture is a tuning choice, not a structural bound).

use crate::error::Result;
use crate::mem::MemoryMapping;
use crate::util::Alignment;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU16, Ordering};

use super::{SLOT_EMPTY, SLOT_READY, SLOT_WRITING, STATUS_SIZE};

/// FlatShadowMap - eager single-fragment shadow store
///
/// One slot per `granularity` bytes of target address space. Values are
/// constructed in place behind the `EMPTY -> WRITING -> READY` protocol and
/// never move.
pub struct FlatShadowMap<V> {
    mapping: MemoryMapping,
    granularity_shift: u32,
    block_size: usize,
    value_offset: usize,
    slots: usize,
    _marker: PhantomData<V>,
}

// Slots are only ever mutated through the status protocol and the atomic
// fields of V.
unsafe impl<V: Send + Sync> Send for FlatShadowMap<V> {}
unsafe impl<V: Send + Sync> Sync for FlatShadowMap<V> {}

impl<V> FlatShadowMap<V> {
    /// Map a shadow aperture of `span` bytes of target address space, one
    /// record per `granularity` bytes. With `cache_line_blocks` each
    /// record is rounded up to its own cache line so adjacent records do
    /// not false-share; otherwise rounding is to the machine word.
    pub fn new(span: usize, granularity: usize, cache_line_blocks: bool) -> Result<Self> {
        debug_assert!(granularity.is_power_of_two());

        let value_offset = Alignment::align_up(STATUS_SIZE, std::mem::align_of::<V>().max(STATUS_SIZE));
        let rounding = if cache_line_blocks {
            Alignment::CACHE_LINE
        } else {
            Alignment::WORD
        };
        let block_size = Alignment::align_up(value_offset + std::mem::size_of::<V>(), rounding);
        let slots = span / granularity;

        let mapping = MemoryMapping::anonymous_noreserve(slots * block_size)?;
        // Slots are touched sparsely; huge pages would commit 2MB apiece.
        mapping.disable_transparent_huge_pages();

        Ok(Self {
            mapping,
            granularity_shift: Alignment::shift_of(granularity),
            block_size,
            value_offset,
            slots,
            _marker: PhantomData,
        })
    }

    /// Bytes of virtual address space behind the map.
    pub fn shadow_bytes(&self) -> usize {
        self.mapping.size()
    }

    #[inline]
    fn block(&self, key: usize) -> Option<*mut u8> {
        let index = key >> self.granularity_shift;
        if index >= self.slots {
            return None;
        }
        // SAFETY: index is bounds-checked against the mapping geometry.
        Some(unsafe { self.mapping.as_ptr().add(index * self.block_size) })
    }

    #[inline]
    fn status(block: *mut u8) -> &'static AtomicU16 {
        // SAFETY: the status word leads every block and blocks are at
        // least word-aligned; zeroed memory is a valid AtomicU16.
        unsafe { &*(block as *const AtomicU16) }
    }

    #[inline]
    fn value(&self, block: *mut u8) -> *mut V {
        // SAFETY: value_offset respects V's alignment by construction.
        unsafe { block.add(self.value_offset) as *mut V }
    }

    /// Return the record for `key`, creating it with `make` if absent.
    ///
    /// Exactly one caller per key observes `true` in the second tuple
    /// field across all threads; losers of the creation race busy-wait
    /// until the winner publishes and then use the shared record. `None`
    /// means the key lies outside the aperture.
    #[inline]
    pub fn get_or_insert_with(&self, key: usize, make: impl FnOnce() -> V) -> Option<(&V, bool)> {
        let block = self.block(key)?;
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
                    // SAFETY: this thread owns the slot (WRITING) and the
                    // destination is properly aligned, unused memory.
                    unsafe { value_ptr.write(make()) };
                    status.store(SLOT_READY, Ordering::SeqCst);
                    // SAFETY: just initialised above.
                    return Some((unsafe { &*value_ptr }, true));
                }
                Err(SLOT_READY) => {
                    // SAFETY: READY slots hold a published value.
                    return Some((unsafe { &*self.value(block) }, false));
                }
                // A winner is mid-construction; the publish is a handful
                // of stores away.
                Err(_) => std::hint::spin_loop(),
            }
        }
    }

    /// Record for `key`, if one was ever inserted.
    #[inline]
    pub fn find(&self, key: usize) -> Option<&V> {
        let block = self.block(key)?;
        let status = Self::status(block);

        loop {
            match status.load(Ordering::SeqCst) {
                SLOT_READY => return Some(unsafe { &*self.value(block) }),
                SLOT_EMPTY => return None,
                _ => std::hint::spin_loop(),
            }
        }
    }

    /// Clear the slot for `key`, zeroing the whole block so a later
    /// insert starts from fresh memory.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no other thread holds a reference into
    /// this key's record or accesses the key concurrently.
    pub unsafe fn remove(&self, key: usize) {
        if let Some(block) = self.block(key) {
            Self::status(block).store(SLOT_EMPTY, Ordering::SeqCst);
            std::ptr::write_bytes(block.add(STATUS_SIZE), 0, self.block_size - STATUS_SIZE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::{Arc, Barrier};
    use std::thread;

    struct Counter {
        creator: u32,
        hits: AtomicU64,
    }

    fn test_map() -> FlatShadowMap<Counter> {
        FlatShadowMap::new(1 << 24, 4096, false).expect("map should create")
    }

    #[test]
    fn test_find_before_insert_is_none() {
        let map = test_map();
        assert!(map.find(0x5000).is_none());
    }

    #[test]
    fn test_insert_then_find() {
        let map = test_map();
        let (record, created) = map
            .get_or_insert_with(0x5000, || Counter {
                creator: 3,
                hits: AtomicU64::new(0),
            })
            .expect("in aperture");
        assert!(created);
        assert_eq!(record.creator, 3);

        record.hits.fetch_add(1, Ordering::SeqCst);
        let found = map.find(0x5000).expect("inserted");
        assert_eq!(found.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keys_in_same_granule_share_a_record() {
        let map = test_map();
        map.get_or_insert_with(0x5000, || Counter {
            creator: 1,
            hits: AtomicU64::new(0),
        });
        // 0x5fff sits in the same 4KB granule
        let shared = map.find(0x5fff).expect("same granule");
        assert_eq!(shared.creator, 1);
        // 0x6000 does not
        assert!(map.find(0x6000).is_none());
    }

    #[test]
    fn test_out_of_aperture_is_none() {
        let map = test_map();
        assert!(map.get_or_insert_with(1 << 25, || Counter {
            creator: 0,
            hits: AtomicU64::new(0),
        })
        .is_none());
        assert!(map.find(1 << 25).is_none());
    }

    #[test]
    fn test_remove_resets_slot() {
        let map = test_map();
        map.get_or_insert_with(0x5000, || Counter {
            creator: 9,
            hits: AtomicU64::new(7),
        });
        unsafe { map.remove(0x5000) };
        assert!(map.find(0x5000).is_none());

        let (fresh, created) = map
            .get_or_insert_with(0x5000, || Counter {
                creator: 1,
                hits: AtomicU64::new(0),
            })
            .expect("in aperture");
        assert!(created);
        assert_eq!(fresh.hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_exactly_one_creator_per_key() {
        let map = Arc::new(test_map());
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();

        for tid in 0..8u32 {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let (record, created) = map
                    .get_or_insert_with(0x9000, || Counter {
                        creator: tid,
                        hits: AtomicU64::new(0),
                    })
                    .expect("in aperture");
                (record.creator, created)
            }));
        }

        let results: Vec<(u32, bool)> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();

        let winners = results.iter().filter(|(_, created)| *created).count();
        assert_eq!(winners, 1, "creation race must have a single winner");

        // Every thread observed the same creator identity
        let creator = results[0].0;
        assert!(results.iter().all(|(c, _)| *c == creator));
    }
}
