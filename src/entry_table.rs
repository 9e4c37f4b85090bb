// SPDX-License-Identifier: MIT
//
// Entry-table bump allocator (spec §4.3): a fixed-capacity array of
// `EntryRecord`s, handed out by an atomic fetch-and-add on a shared counter.
// Slots are never reclaimed or rolled back on overflow — a failed reservation
// still consumes its counter value, the spec's "wasted slots" policy, which
// keeps the reservation itself lock-free and branch-free.

use tracing::warn;

use crate::layout::Layout;

/// Returned by [`EntryTable::reserve_slot`] when the table has no more room.
#[derive(Debug)]
pub struct TableFull;

pub struct EntryTable {
    base: *mut u8,
    layout: Layout,
}

// Safety: `base` points into a `MAP_SHARED` region; all access to individual
// entries is serialized by the bucket lock covering that entry's index.
unsafe impl Send for EntryTable {}
unsafe impl Sync for EntryTable {}

impl EntryTable {
    /// # Safety
    /// `base` must be the base pointer of a region laid out per `layout`,
    /// outliving this `EntryTable`.
    pub unsafe fn new(base: *mut u8, layout: Layout) -> Self {
        Self { base, layout }
    }

    pub fn capacity(&self) -> u64 {
        self.layout.n_max as u64
    }

    /// Reserve the next slot index. Lock-free: a single atomic fetch-add on
    /// the shared `n_entries` counter (spec §4.3 step "Reserve a slot via
    /// atomic fetch-and-add on n_entries"). Once `n_max` has been exceeded,
    /// every subsequent call keeps bumping the counter and returns
    /// [`TableFull`] — by design, not a bug (spec §9).
    pub fn reserve_slot(&self, header: &crate::layout::CacheHeader) -> Result<usize, TableFull> {
        let idx = header.n_entries.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if idx >= self.capacity() {
            warn!(idx, n_max = self.capacity(), "entry table exhausted");
            return Err(TableFull);
        }
        Ok(idx as usize)
    }

    /// # Safety
    /// The caller must hold the bucket lock covering `idx` before mutating
    /// the returned record, and must not call this with an `idx` outside
    /// `0..capacity()`.
    pub unsafe fn entry(&self, idx: usize) -> &mut crate::entry::EntryRecord {
        self.layout.entry(self.base, idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::CacheHeader;

    fn make(n_max: usize) -> (Vec<u8>, Layout) {
        let layout = Layout::compute(n_max, 8, 128);
        let mem = vec![0u8; layout.total_len];
        (mem, layout)
    }

    #[test]
    fn reserves_increasing_indices() {
        let (mut mem, layout) = make(4);
        let header = CacheHeader::new(0, 0, 4, 8, 128);
        unsafe {
            std::ptr::write(mem.as_mut_ptr() as *mut CacheHeader, header);
        }
        let header_ref = unsafe { &*(mem.as_ptr() as *const CacheHeader) };
        let table = unsafe { EntryTable::new(mem.as_mut_ptr(), layout) };

        assert_eq!(table.reserve_slot(header_ref).unwrap(), 0);
        assert_eq!(table.reserve_slot(header_ref).unwrap(), 1);
        assert_eq!(table.reserve_slot(header_ref).unwrap(), 2);
        assert_eq!(table.reserve_slot(header_ref).unwrap(), 3);
        assert!(table.reserve_slot(header_ref).is_err());
        // still bumps on overflow
        assert!(table.reserve_slot(header_ref).is_err());
        assert_eq!(header_ref.n_entries.load(std::sync::atomic::Ordering::Relaxed), 6);
    }
}
