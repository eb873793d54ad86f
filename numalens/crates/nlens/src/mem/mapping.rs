//! Anonymous Memory Mappings
//!
//! All profiler-owned storage is backed by anonymous mappings created here.
//! Two flavours exist:
//!
//! - `anonymous`: a committed mapping via `memmap2`, for bounded structures
//!   (registries, the object arena) whose full size is reasonable to account.
//! - `anonymous_noreserve`: a raw `mmap` with `MAP_NORESERVE`, for shadow
//!   fragments and the flat page map, which reserve large sparse windows of
//!   address space and materialise physical pages only where the target
//!   program actually touches memory.
//!
//! Mappings start zeroed, which the shadow maps rely on for their `EMPTY`
//! slot state.

use crate::error::{NlensError, Result};
use memmap2::{MmapMut, MmapOptions};

use super::page::align_to_page;

enum Backing {
    /// Owned by memmap2; unmapped when dropped.
    Mapped(#[allow(dead_code)] MmapMut),
    /// Raw mmap; munmapped in Drop.
    #[cfg(unix)]
    Raw,
}

/// MemoryMapping - an anonymous, page-aligned, zero-initialised mapping
pub struct MemoryMapping {
    backing: Backing,
    base: usize,
    size: usize,
}

impl MemoryMapping {
    /// Create a committed anonymous mapping of at least `size` bytes.
    pub fn anonymous(size: usize) -> Result<Self> {
        let aligned = align_to_page(size.max(1));

        let mut mmap = MmapOptions::new()
            .len(aligned)
            .map_anon()
            .map_err(|e| NlensError::MappingFailed(format!("anonymous map of {aligned} bytes: {e}")))?;

        let base = mmap.as_mut_ptr() as usize;

        Ok(Self {
            backing: Backing::Mapped(mmap),
            base,
            size: aligned,
        })
    }

    /// Create a non-reserving anonymous mapping of at least `size` bytes.
    ///
    /// The kernel charges no commit for the region; untouched pages cost
    /// nothing. This is what makes multi-terabyte shadow windows viable.
    #[cfg(unix)]
    pub fn anonymous_noreserve(size: usize) -> Result<Self> {
        let aligned = align_to_page(size.max(1));

        // SAFETY: plain anonymous mapping request; a MAP_FAILED result is
        // checked before the pointer is used.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                aligned,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(NlensError::MappingFailed(format!(
                "noreserve map of {aligned} bytes: {}",
                std::io::Error::last_os_error()
            )));
        }

        Ok(Self {
            backing: Backing::Raw,
            base: ptr as usize,
            size: aligned,
        })
    }

    #[cfg(not(unix))]
    pub fn anonymous_noreserve(size: usize) -> Result<Self> {
        Self::anonymous(size)
    }

    /// Base address of the mapping
    pub fn base(&self) -> usize {
        self.base
    }

    /// Size of the mapping in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether `addr` falls inside the mapping
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.base + self.size
    }

    /// Raw pointer to the start of the mapping
    pub fn as_ptr(&self) -> *mut u8 {
        self.base as *mut u8
    }

    /// Opt the mapping out of transparent huge pages.
    ///
    /// Shadow slots are touched sparsely; huge pages would commit 2MB per
    /// stray access. No-op where the advice does not exist.
    pub fn disable_transparent_huge_pages(&self) {
        #[cfg(target_os = "linux")]
        // SAFETY: the range is exactly this mapping.
        unsafe {
            libc::madvise(self.base as *mut libc::c_void, self.size, libc::MADV_NOHUGEPAGE);
        }
    }

    /// Zero `len` bytes at `offset`.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no other thread is concurrently accessing
    /// the range; this is a plain (non-atomic) write.
    pub unsafe fn zero_range(&self, offset: usize, len: usize) {
        debug_assert!(offset + len <= self.size);
        std::ptr::write_bytes((self.base + offset) as *mut u8, 0, len);
    }
}

// The mapping is only ever mutated through atomics at computed offsets.
unsafe impl Send for MemoryMapping {}
unsafe impl Sync for MemoryMapping {}

impl Drop for MemoryMapping {
    fn drop(&mut self) {
        #[cfg(unix)]
        if matches!(self.backing, Backing::Raw) {
            // SAFETY: base/size describe a live mapping we own.
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.size);
            }
        }
    }
}
