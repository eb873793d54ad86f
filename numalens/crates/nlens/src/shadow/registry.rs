//! Shadow Registry - Open-Addressed Record Store
//!
//! Fixed-capacity hash table over one non-reserving anonymous mapping, for
//! record families whose keys are sparse in address space (live objects,
//! allocation sites, locks). Probing is linear and bounded: a key that
//! cannot land within [`PROBE_WINDOW`] slots of its home is rejected and
//! the caller counts a capacity drop, so a pathological key distribution
//! degrades coverage instead of latency.
//!
//! Removal writes a tombstone. Tombstones keep probe chains intact and are
//! reclaimed by later inserts, so a free-heavy workload does not leak
//! slots. Values are plain atomic-field records and are never dropped;
//! reuse overwrites them in place.

use crate::error::Result;
use crate::mem::MemoryMapping;
use crate::util::Alignment;
use rustc_hash::FxHasher;
use std::hash::Hasher;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

use super::{SLOT_EMPTY, SLOT_READY, SLOT_TOMBSTONE, SLOT_WRITING, STATUS_SIZE};

/// Longest probe sequence before an insert is dropped.
const PROBE_WINDOW: usize = 64;

/// ShadowRegistry - bounded open-addressed map from usize keys to records
pub struct ShadowRegistry<V> {
    mapping: MemoryMapping,
    /// Power of two, so the home slot is a mask of the hash.
    capacity: usize,
    slot_size: usize,
    key_offset: usize,
    value_offset: usize,
    len: AtomicUsize,
    _marker: PhantomData<V>,
}

unsafe impl<V: Send + Sync> Send for ShadowRegistry<V> {}
unsafe impl<V: Send + Sync> Sync for ShadowRegistry<V> {}

impl<V> ShadowRegistry<V> {
    /// Map a registry of `capacity` slots. `capacity` must be a power of
    /// two (the config layer validates this).
    pub fn new(capacity: usize) -> Result<Self> {
        debug_assert!(capacity.is_power_of_two());

        let key_offset = Alignment::align_up(STATUS_SIZE, std::mem::align_of::<usize>());
        let value_offset = Alignment::align_up(
            key_offset + std::mem::size_of::<usize>(),
            std::mem::align_of::<V>().max(1),
        );
        let slot_size = Alignment::align_up(value_offset + std::mem::size_of::<V>(), Alignment::WORD);
        let mapping = MemoryMapping::anonymous_noreserve(capacity * slot_size)?;

        Ok(Self {
            mapping,
            capacity,
            slot_size,
            key_offset,
            value_offset,
            len: AtomicUsize::new(0),
            _marker: PhantomData,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Published records currently in the table.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn home_slot(&self, key: usize) -> usize {
        let mut hasher = FxHasher::default();
        hasher.write_usize(key);
        (hasher.finish() as usize) & (self.capacity - 1)
    }

    #[inline]
    fn slot(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.capacity);
        // SAFETY: index is reduced modulo capacity by every caller.
        unsafe { self.mapping.as_ptr().add(index * self.slot_size) }
    }

    #[inline]
    fn status(slot: *mut u8) -> &'static AtomicU16 {
        // SAFETY: the status word leads every slot; zeroed memory is a
        // valid AtomicU16.
        unsafe { &*(slot as *const AtomicU16) }
    }

    #[inline]
    fn key(&self, slot: *mut u8) -> &AtomicUsize {
        // SAFETY: key_offset is usize-aligned by construction.
        unsafe { &*(slot.add(self.key_offset) as *const AtomicUsize) }
    }

    #[inline]
    fn value(&self, slot: *mut u8) -> *mut V {
        // SAFETY: value_offset respects V's alignment by construction.
        unsafe { slot.add(self.value_offset) as *mut V }
    }

    /// Record for `key`, creating it with `make` if absent. `None` means
    /// the probe window is exhausted (a capacity drop for the caller).
    ///
    /// The scan spins out `WRITING` slots it meets, so a looked-up key
    /// that is mid-insert on another thread resolves to the published
    /// record rather than a duplicate.
    pub fn get_or_insert_with(&self, key: usize, make: impl FnOnce() -> V) -> Option<(&V, bool)> {
        let home = self.home_slot(key);

        loop {
            let mut reusable: Option<usize> = None;

            for probe in 0..PROBE_WINDOW {
                let index = (home + probe) & (self.capacity - 1);
                let slot = self.slot(index);

                match Self::status(slot).load(Ordering::SeqCst) {
                    SLOT_READY => {
                        if self.key(slot).load(Ordering::SeqCst) == key {
                            // SAFETY: READY slots hold a published value.
                            return Some((unsafe { &*self.value(slot) }, false));
                        }
                    }
                    SLOT_EMPTY | SLOT_TOMBSTONE => {
                        if reusable.is_none() {
                            reusable = Some(index);
                        }
                        // An empty slot ends the probe chain: the key was
                        // never inserted past this point.
                        if Self::status(slot).load(Ordering::SeqCst) == SLOT_EMPTY {
                            break;
                        }
                    }
                    // Publish is a handful of stores away.
                    _ => {
                        std::hint::spin_loop();
                        // Re-inspect the same slot
                        while Self::status(slot).load(Ordering::SeqCst) == SLOT_WRITING {
                            std::hint::spin_loop();
                        }
                        if Self::status(slot).load(Ordering::SeqCst) == SLOT_READY
                            && self.key(slot).load(Ordering::SeqCst) == key
                        {
                            return Some((unsafe { &*self.value(slot) }, false));
                        }
                    }
                }
            }

            let index = reusable?;
            let slot = self.slot(index);
            let previous = Self::status(slot).load(Ordering::SeqCst);
            if previous != SLOT_EMPTY && previous != SLOT_TOMBSTONE {
                // Someone claimed our candidate; rescan, they may be
                // inserting this very key.
                continue;
            }
            if Self::status(slot)
                .compare_exchange(previous, SLOT_WRITING, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                continue;
            }

            self.key(slot).store(key, Ordering::SeqCst);
            let value_ptr = self.value(slot);
            // SAFETY: this thread owns the slot (WRITING).
            unsafe { value_ptr.write(make()) };
            Self::status(slot).store(SLOT_READY, Ordering::SeqCst);
            self.len.fetch_add(1, Ordering::SeqCst);
            // SAFETY: just initialised above.
            return Some((unsafe { &*value_ptr }, true));
        }
    }

    /// Published record for `key`, if present.
    pub fn find(&self, key: usize) -> Option<&V> {
        let home = self.home_slot(key);

        for probe in 0..PROBE_WINDOW {
            let index = (home + probe) & (self.capacity - 1);
            let slot = self.slot(index);

            match Self::status(slot).load(Ordering::SeqCst) {
                SLOT_READY => {
                    if self.key(slot).load(Ordering::SeqCst) == key {
                        return Some(unsafe { &*self.value(slot) });
                    }
                }
                SLOT_EMPTY => return None,
                SLOT_TOMBSTONE => {}
                _ => {
                    while Self::status(slot).load(Ordering::SeqCst) == SLOT_WRITING {
                        std::hint::spin_loop();
                    }
                    if Self::status(slot).load(Ordering::SeqCst) == SLOT_READY
                        && self.key(slot).load(Ordering::SeqCst) == key
                    {
                        return Some(unsafe { &*self.value(slot) });
                    }
                }
            }
        }
        None
    }

    /// Tombstone the record for `key`. Returns true when a record was
    /// removed. The value bytes stay behind the tombstone until an insert
    /// reclaims the slot.
    pub fn remove(&self, key: usize) -> bool {
        let home = self.home_slot(key);

        for probe in 0..PROBE_WINDOW {
            let index = (home + probe) & (self.capacity - 1);
            let slot = self.slot(index);

            match Self::status(slot).load(Ordering::SeqCst) {
                SLOT_READY => {
                    if self.key(slot).load(Ordering::SeqCst) == key {
                        if Self::status(slot)
                            .compare_exchange(
                                SLOT_READY,
                                SLOT_TOMBSTONE,
                                Ordering::SeqCst,
                                Ordering::SeqCst,
                            )
                            .is_ok()
                        {
                            self.len.fetch_sub(1, Ordering::SeqCst);
                            return true;
                        }
                        return false;
                    }
                }
                SLOT_EMPTY => return false,
                _ => {}
            }
        }
        false
    }

    /// Visit every published record. Records inserted or removed during
    /// the walk may or may not be seen; the shutdown reporter runs this
    /// after the workload quiesces.
    pub fn for_each(&self, mut visit: impl FnMut(usize, &V)) {
        for index in 0..self.capacity {
            let slot = self.slot(index);
            if Self::status(slot).load(Ordering::SeqCst) == SLOT_READY {
                let key = self.key(slot).load(Ordering::SeqCst);
                visit(key, unsafe { &*self.value(slot) });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::{Arc, Barrier};
    use std::thread;

    struct Entry {
        creator: u32,
        hits: AtomicU64,
    }

    fn entry(creator: u32) -> impl FnOnce() -> Entry {
        move || Entry {
            creator,
            hits: AtomicU64::new(0),
        }
    }

    #[test]
    fn test_insert_find_remove() {
        let registry: ShadowRegistry<Entry> = ShadowRegistry::new(256).expect("registry");
        assert!(registry.find(0x7000).is_none());

        let (record, created) = registry
            .get_or_insert_with(0x7000, entry(4))
            .expect("capacity");
        assert!(created);
        assert_eq!(record.creator, 4);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.find(0x7000).expect("present").creator, 4);
        assert!(registry.remove(0x7000));
        assert!(registry.find(0x7000).is_none());
        assert_eq!(registry.len(), 0);
        assert!(!registry.remove(0x7000));
    }

    #[test]
    fn test_second_insert_returns_existing() {
        let registry: ShadowRegistry<Entry> = ShadowRegistry::new(256).expect("registry");
        registry.get_or_insert_with(0x7000, entry(1)).expect("capacity");

        let (record, created) = registry
            .get_or_insert_with(0x7000, entry(2))
            .expect("capacity");
        assert!(!created);
        assert_eq!(record.creator, 1, "existing record wins");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_tombstones_keep_probe_chains_intact() {
        let registry: ShadowRegistry<Entry> = ShadowRegistry::new(256).expect("registry");
        // Dense enough that some keys share probe chains
        for key in 0..128usize {
            registry
                .get_or_insert_with(key * 8, entry(key as u32))
                .expect("capacity");
        }
        // Remove every other key, then every survivor must still resolve
        for key in (0..128usize).step_by(2) {
            assert!(registry.remove(key * 8));
        }
        for key in (1..128usize).step_by(2) {
            let record = registry.find(key * 8).expect("survivor resolves");
            assert_eq!(record.creator, key as u32);
        }
        assert_eq!(registry.len(), 64);
    }

    #[test]
    fn test_tombstones_are_reclaimed() {
        let registry: ShadowRegistry<Entry> = ShadowRegistry::new(64).expect("registry");
        // Churn far more keys through than the table holds
        for round in 0..1_000usize {
            let key = 0x1000 + (round % 48) * 8;
            registry.get_or_insert_with(key, entry(0)).expect("capacity");
            registry.remove(key);
        }
        assert_eq!(registry.len(), 0);
        // A fresh insert must still find room
        assert!(registry.get_or_insert_with(0x9999, entry(7)).is_some());
    }

    #[test]
    fn test_probe_window_exhaustion_drops() {
        let registry: ShadowRegistry<Entry> = ShadowRegistry::new(64).expect("registry");
        let mut inserted = 0usize;
        let mut dropped = 0usize;
        for key in 0..256usize {
            match registry.get_or_insert_with(0x10_0000 + key * 8, entry(0)) {
                Some(_) => inserted += 1,
                None => dropped += 1,
            }
        }
        assert_eq!(inserted, 64, "a full table accepts exactly capacity");
        assert_eq!(dropped, 192);
    }

    #[test]
    fn test_for_each_visits_live_records_only() {
        let registry: ShadowRegistry<Entry> = ShadowRegistry::new(256).expect("registry");
        for key in 0..10usize {
            registry
                .get_or_insert_with(0x2000 + key * 64, entry(key as u32))
                .expect("capacity");
        }
        registry.remove(0x2000);
        registry.remove(0x2000 + 5 * 64);

        let mut seen = Vec::new();
        registry.for_each(|key, record| seen.push((key, record.creator)));
        seen.sort_unstable();

        assert_eq!(seen.len(), 8);
        assert!(!seen.iter().any(|(key, _)| *key == 0x2000));
        assert!(seen.contains(&(0x2000 + 64, 1)));
    }

    #[test]
    fn test_racing_inserts_single_winner() {
        let registry: Arc<ShadowRegistry<Entry>> =
            Arc::new(ShadowRegistry::new(256).expect("registry"));
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();

        for tid in 0..8u32 {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let (record, created) = registry
                    .get_or_insert_with(0xbeef_0000, entry(tid))
                    .expect("capacity");
                record.hits.fetch_add(1, Ordering::SeqCst);
                (record.creator, created)
            }));
        }

        let results: Vec<(u32, bool)> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();

        assert_eq!(results.iter().filter(|(_, c)| *c).count(), 1);
        let creator = results[0].0;
        assert!(results.iter().all(|(c, _)| *c == creator));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry
                .find(0xbeef_0000)
                .expect("published")
                .hits
                .load(Ordering::SeqCst),
            8
        );
    }
}
