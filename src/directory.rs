// SPDX-License-Identifier: MIT
//
// Path -> slot-index directory: an open-addressed hash index keyed by the
// FNV-1a hash of the cache key (shm_name.rs), guarded by the single spinlock
// in the shared header (spec §3). Modeled on the teacher's
// `service_registry.rs`, which also guards a small fixed-capacity array with
// one spinlock rather than per-slot locks.
//
// Lookup only needs the directory lock long enough to resolve a path to a
// slot index; the caller then takes the slot's *bucket* lock (payload.rs)
// before touching the entry or its payload segment. That hand-off is what
// lets `flush` safely unmap a payload out from under a reader that is only
// ever holding one lock at a time.

use crate::layout::{CacheHeader, DirSlot, Layout};
use crate::shm_name::fnv1a_64;

pub struct Directory {
    base: *mut u8,
    layout: Layout,
}

// Safety: guarded entirely by `CacheHeader::dir_lock`.
unsafe impl Send for Directory {}
unsafe impl Sync for Directory {}

impl Directory {
    /// # Safety
    /// `base` must be the base pointer of a region laid out per `layout`.
    pub unsafe fn new(base: *mut u8, layout: Layout) -> Self {
        Self { base, layout }
    }

    fn slot_for_hash(&self, hash: u64) -> usize {
        (hash % self.layout.dir_slots as u64) as usize
    }

    /// Resolve `path` to its entry-table slot index, or `None` if absent.
    /// Takes the directory lock for the duration of the probe only.
    ///
    /// Linear-probes from `hash`'s home slot. There are no tombstones —
    /// entries are only ever cleared all at once, by `flush` — so the first
    /// empty slot encountered proves the key is absent and the scan stops
    /// immediately; continuing past it would turn every miss into an
    /// O(dir_slots) scan held under the directory lock.
    pub fn lookup(&self, header: &CacheHeader, path: &str) -> Option<usize> {
        let hash = fnv1a_64(path.as_bytes());
        let start = self.slot_for_hash(hash);

        header.dir_lock.lock();
        let mut found = None;
        for step in 0..self.layout.dir_slots {
            let i = (start + step) % self.layout.dir_slots;
            let slot = unsafe { self.layout.dir_slot(self.base, i) };
            let slot_index = slot.index.load(std::sync::atomic::Ordering::Acquire);
            if slot_index == DirSlot::EMPTY {
                break;
            }
            let slot_hash = slot.hash.load(std::sync::atomic::Ordering::Relaxed);
            if slot_hash == hash {
                // Hash equality alone doesn't prove identity: compare the
                // actual key stored at the candidate slot before trusting it.
                let entry = unsafe { self.layout.entry(self.base, slot_index as usize) };
                if entry.path() == path {
                    found = Some(slot_index as usize);
                    break;
                }
            }
        }
        header.dir_lock.unlock();
        found
    }

    /// Publish `path -> index` into the directory. Caller guarantees `path`
    /// is not already present (spec §4.3, §4.4). Takes the directory lock
    /// for the duration of the probe + write only.
    pub fn insert(&self, header: &CacheHeader, path: &str, index: usize) -> Result<(), &'static str> {
        let hash = fnv1a_64(path.as_bytes());
        let start = self.slot_for_hash(hash);

        header.dir_lock.lock();
        let mut result = Err("directory is full");
        for step in 0..self.layout.dir_slots {
            let i = (start + step) % self.layout.dir_slots;
            let slot = unsafe { self.layout.dir_slot(self.base, i) };
            if slot.index.load(std::sync::atomic::Ordering::Acquire) == DirSlot::EMPTY {
                slot.hash.store(hash, std::sync::atomic::Ordering::Relaxed);
                slot.index
                    .store(index as u64, std::sync::atomic::Ordering::Release);
                result = Ok(());
                break;
            }
        }
        header.dir_lock.unlock();
        result
    }

    /// Clear every slot. Only called from `flush`, which already holds the
    /// directory lock for its whole sweep.
    ///
    /// # Safety
    /// Caller must hold `header.dir_lock`.
    pub unsafe fn clear_all(&self) {
        for i in 0..self.layout.dir_slots {
            let slot = self.layout.dir_slot(self.base, i);
            slot.index
                .store(DirSlot::EMPTY, std::sync::atomic::Ordering::Relaxed);
        }
    }
}
