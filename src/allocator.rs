// SPDX-License-Identifier: MIT
//
// Shared allocator (spec §4.1): wraps the anonymous, page-populated,
// page-locked shared region that backs every other piece of cache state
// (entry table, directory, locks, statistics). All other shared structures
// are carved out of one [`SharedRegion`] by byte offset, the same pattern
// the teacher uses for a chunk-storage segment's header-plus-array layout
// (`chunk_storage.rs`'s `ChunkInfo` + trailing chunk array).

use std::io;

use crate::platform::posix;

/// A single anonymous `mmap` region, shared across `fork`, never unmapped
/// except by an explicit [`SharedRegion::unmap`] call from `Cache::destroy`.
///
/// This type intentionally does **not** implement `Drop`: per spec §3, the
/// cache "is created by init; destroyed only by explicit teardown. Never
/// implicitly reclaimed." A `Cache` handle going out of scope in a forked
/// child must never unmap pages the parent or siblings still rely on.
pub struct SharedRegion {
    ptr: *mut u8,
    len: usize,
}

// Safety: backed by a `MAP_SHARED` mapping, meant for concurrent
// cross-process and cross-thread access guarded by the spinlocks carved out
// of it.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Allocate a new zero-initialized region of `len` bytes.
    pub fn new(len: usize) -> io::Result<Self> {
        let ptr = posix::map_anonymous_shared_locked(len)?;
        Ok(Self { ptr, len })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Explicitly release the mapping. Only called from `Cache::destroy`.
    ///
    /// # Safety
    /// The caller must guarantee no other thread or process is still
    /// dereferencing pointers into this region (spec §4.7: "Safe only when
    /// no other process holds the cache").
    pub unsafe fn unmap(&self) {
        posix::unmap_anonymous(self.ptr, self.len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_region_is_zeroed() {
        let region = SharedRegion::new(4096).unwrap();
        let slice = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.len()) };
        assert!(slice.iter().all(|&b| b == 0));
        unsafe { region.unmap() };
    }
}
