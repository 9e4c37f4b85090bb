// SPDX-License-Identifier: MIT
//
// The public cache handle (spec §3, §6): ties the shared region, its layout,
// the entry table and the directory together behind one API. `init` and
// `destroy` are the only lifecycle operations — there is no `Drop` impl, by
// design (see allocator.rs): a handle going out of scope in a forked child
// must never tear down memory the rest of the tree still uses.

use tracing::{debug, info};

use crate::allocator::SharedRegion;
use crate::config::CacheConfig;
use crate::directory::Directory;
use crate::entry_table::EntryTable;
use crate::error::Result;
use crate::layout::Layout;
use crate::payload;
use crate::platform::posix;
use crate::read_through;
use crate::shm_name::payload_name;
use crate::stats::CacheStats;

/// Directory load factor: twice `n_max`, rounded up to a power of two, gives
/// open addressing plenty of headroom without an unbounded directory.
fn dir_slots_for(n_max: u64) -> usize {
    let want = (n_max * 2).max(8);
    want.next_power_of_two() as usize
}

pub struct Cache {
    region: SharedRegion,
    layout: Layout,
    config: CacheConfig,
    entry_table: EntryTable,
    directory: Directory,
}

// Safety: all shared state is reached through atomics and spinlocks.
unsafe impl Send for Cache {}
unsafe impl Sync for Cache {}

impl Cache {
    /// Create a fresh cache backed by a new anonymous shared mapping (spec §3
    /// `init`). Must be called once, before any `fork`.
    pub fn init(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let n_max = config.n_max();
        let lock_count = config.lock_count();
        let dir_slots = dir_slots_for(n_max) as u64;

        let layout = Layout::compute(n_max as usize, lock_count as usize, dir_slots as usize);
        let region = SharedRegion::new(layout.total_len)?;

        let header = crate::layout::CacheHeader::new(
            config.capacity,
            config.max_item_size,
            n_max,
            lock_count,
            dir_slots,
        );
        unsafe {
            std::ptr::write(region.as_mut_ptr() as *mut crate::layout::CacheHeader, header);
        }

        for i in 0..dir_slots as usize {
            unsafe {
                std::ptr::write(layout.dir_slot_ptr(region.as_mut_ptr(), i), crate::layout::DirSlot::empty());
            }
        }
        for i in 0..lock_count as usize {
            unsafe {
                std::ptr::write(
                    layout.bucket_lock_ptr(region.as_mut_ptr(), i),
                    crate::spin_lock::SpinLock::new(),
                );
            }
        }
        for i in 0..n_max as usize {
            unsafe {
                std::ptr::write(layout.entry(region.as_mut_ptr(), i), crate::entry::EntryRecord::empty());
            }
        }

        let entry_table = unsafe { EntryTable::new(region.as_mut_ptr(), layout) };
        let directory = unsafe { Directory::new(region.as_mut_ptr(), layout) };

        info!(
            capacity = config.capacity,
            n_max, lock_count, dir_slots, "cache initialized"
        );

        Ok(Self {
            region,
            layout,
            config,
            entry_table,
            directory,
        })
    }

    fn header(&self) -> &crate::layout::CacheHeader {
        unsafe { self.layout.header(self.region.as_mut_ptr()) }
    }

    /// Directly admit `path` with `data` as its contents, bypassing the
    /// read-through path. Exposed for callers that already have bytes in
    /// hand (spec §4.4 `store`).
    pub fn store(&self, path: &str, data: &[u8]) -> Result<()> {
        payload::store(
            &self.layout,
            self.region.as_mut_ptr(),
            self.header(),
            &self.entry_table,
            &self.directory,
            &self.config,
            path,
            data,
        )
    }

    /// Serve `path` from the cache only; `Err(Miss)` if absent (spec §4.4
    /// `load`).
    pub fn load(&self, path: &str, out: &mut [u8]) -> Result<usize> {
        payload::load(
            &self.layout,
            self.region.as_mut_ptr(),
            self.header(),
            &self.entry_table,
            &self.directory,
            path,
            out,
        )
    }

    /// `true` if `path` is currently cached.
    pub fn contains(&self, path: &str) -> bool {
        self.directory.lookup(self.header(), path).is_some()
    }

    /// The read-through path: cache hit, or read from storage and admit
    /// (spec §4.5 `read`). `max == 0` means unbounded.
    pub fn read(&self, path: &str, buf: &mut [u8], max: u64) -> Result<usize> {
        read_through::read(
            &self.layout,
            self.region.as_mut_ptr(),
            self.header(),
            &self.entry_table,
            &self.directory,
            &self.config,
            path,
            buf,
            max,
        )
    }

    /// Evict every entry and reclaim all capacity (spec §5 `flush`): walk the
    /// entry table under the directory lock, unmap and unlink each payload
    /// segment under its bucket lock, then clear the directory and reset
    /// `used`/`n_entries`. Statistics are left untouched.
    pub fn flush(&self) {
        let header = self.header();
        // Clear the directory first, under the directory lock alone, so no
        // new lookup can resolve a path while payloads are being unlinked
        // below. The directory lock is released before any bucket lock is
        // taken — store()'s bucket-then-directory order must never invert
        // with flush's, or the two deadlock against each other.
        header.dir_lock.lock();
        let n_entries = header
            .n_entries
            .load(std::sync::atomic::Ordering::Relaxed)
            .min(header.n_max);
        unsafe { self.directory.clear_all() };
        header.dir_lock.unlock();

        for idx in 0..n_entries as usize {
            let bucket = crate::entry::bucket_id_for(idx, self.layout.lock_count as u64) as usize;
            let bucket_lock = unsafe { self.layout.bucket_lock(self.region.as_mut_ptr(), bucket) };
            bucket_lock.lock();
            let entry = unsafe { self.entry_table.entry(idx) };
            if !entry.path().is_empty() {
                let name = payload_name(entry.path());
                posix::payload_unlink(&name);
            }
            bucket_lock.unlock();
        }

        header.used.store(0, std::sync::atomic::Ordering::Relaxed);
        header
            .n_entries
            .store(0, std::sync::atomic::Ordering::Relaxed);

        debug!(entries_walked = n_entries, "cache flushed");
    }

    /// A point-in-time snapshot of the cache's counters (spec §6 `stats`).
    pub fn stats(&self) -> CacheStats {
        self.header().stats.snapshot()
    }

    /// Tear down the cache: unmap the shared region. Safe only when no other
    /// process still holds the cache (spec §4.7).
    ///
    /// # Safety
    /// The caller must guarantee no other thread or process maps or accesses
    /// this cache's shared region after this call returns.
    pub unsafe fn destroy(self) {
        let header = self.header();
        let n_entries = header
            .n_entries
            .load(std::sync::atomic::Ordering::Relaxed)
            .min(header.n_max);
        for idx in 0..n_entries as usize {
            let entry = self.entry_table.entry(idx);
            if !entry.path().is_empty() {
                posix::payload_unlink(&payload_name(entry.path()));
            }
        }
        self.region.unmap();
        info!("cache destroyed");
    }
}
