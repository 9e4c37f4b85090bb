// SPDX-License-Identifier: MIT
//
// Payload storage and retrieval (spec §4.4): each cached file's bytes live in
// their own named shm segment, mapped only for the duration of the copy in or
// out. Byte-capacity accounting uses fetch-add-with-rollback (only rolled
// back here, never for slot reservation — see entry_table.rs); the bucket
// lock is what lets `flush` unmap a payload safely while a reader might be
// mid-copy.

use std::sync::atomic::Ordering;

use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::directory::Directory;
use crate::entry::bucket_id_for;
use crate::entry_table::EntryTable;
use crate::error::{CacheError, Result};
use crate::layout::{CacheHeader, Layout};
use crate::platform::posix;
use crate::shm_name::payload_name;

/// Reserve `size` bytes against the shared capacity counter, rolling back on
/// overflow (spec §4.2's admission check: "if it doesn't fit, reject").
fn reserve_bytes(header: &CacheHeader, size: u64) -> Result<()> {
    let prev = header.used.fetch_add(size, Ordering::AcqRel);
    if prev + size > header.capacity {
        header.used.fetch_sub(size, Ordering::AcqRel);
        return Err(CacheError::OutOfMemory);
    }
    Ok(())
}

/// Admit `path` with contents `data` (spec §4.4 `store`).
#[allow(clippy::too_many_arguments)]
pub fn store(
    layout: &Layout,
    base: *mut u8,
    header: &CacheHeader,
    entry_table: &EntryTable,
    directory: &Directory,
    config: &CacheConfig,
    path: &str,
    data: &[u8],
) -> Result<()> {
    let size = data.len() as u64;
    if config.max_item_size != 0 && size > config.max_item_size {
        return Err(CacheError::TooBig {
            size,
            max_item_size: config.max_item_size,
        });
    }

    reserve_bytes(header, size)?;

    let idx = match entry_table.reserve_slot(header) {
        Ok(idx) => idx,
        Err(_) => {
            header.used.fetch_sub(size, Ordering::AcqRel);
            return Err(CacheError::OutOfMemory);
        }
    };

    let bucket = bucket_id_for(idx, layout.lock_count as u64) as usize;
    let bucket_lock = unsafe { layout.bucket_lock(base, bucket) };
    bucket_lock.lock();

    let result = (|| -> Result<()> {
        let entry = unsafe { entry_table.entry(idx) };
        entry
            .init(path, size, bucket as u32)
            .map_err(CacheError::Invalid)?;

        let name = payload_name(path);
        let mem = posix::payload_create(&name, size as usize)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mem, size as usize);
        }
        posix::payload_unmap(mem, size as usize);

        directory
            .insert(header, path, idx)
            .map_err(CacheError::Invalid)?;
        Ok(())
    })();

    bucket_lock.unlock();

    if result.is_err() {
        header.used.fetch_sub(size, Ordering::AcqRel);
    } else {
        debug!(path, size, idx, "admitted payload");
    }
    result
}

/// Resolve `path` to an index and copy its payload into `out`, returning the
/// number of bytes written (spec §4.4 `load`).
pub fn load(
    layout: &Layout,
    base: *mut u8,
    header: &CacheHeader,
    entry_table: &EntryTable,
    directory: &Directory,
    path: &str,
    out: &mut [u8],
) -> Result<usize> {
    let idx = match directory.lookup(header, path) {
        Some(idx) => idx,
        None => return Err(CacheError::Miss),
    };

    let bucket = bucket_id_for(idx, layout.lock_count as u64) as usize;
    let bucket_lock = unsafe { layout.bucket_lock(base, bucket) };
    bucket_lock.lock();
    trace!(path, idx, bucket, "load: bucket lock acquired");

    let result = (|| -> Result<usize> {
        let entry = unsafe { entry_table.entry(idx) };
        debug_assert_eq!(entry.bucket_id() as usize, bucket);
        let size = entry.size() as usize;
        if out.len() < size {
            return Err(CacheError::TooLarge {
                entry_size: size as u64,
                max: out.len() as u64,
            });
        }

        let name = payload_name(entry.path());
        let mem = posix::payload_open(&name, size, false)?;
        unsafe {
            std::ptr::copy_nonoverlapping(mem, out.as_mut_ptr(), size);
        }
        posix::payload_unmap(mem, size);
        Ok(size)
    })();

    bucket_lock.unlock();
    if let Err(ref e) = result {
        warn!(path, error = %e, "load failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Policy;

    fn make(n_max: usize, lock_count: usize, dir_slots: usize, capacity: u64, max_item_size: u64) -> (Vec<u8>, Layout, CacheConfig) {
        let layout = Layout::compute(n_max, lock_count, dir_slots);
        let mut mem = vec![0u8; layout.total_len];
        for i in 0..dir_slots {
            unsafe {
                std::ptr::write(layout.dir_slot_ptr(mem.as_mut_ptr(), i), crate::layout::DirSlot::empty());
            }
        }
        let config = CacheConfig {
            capacity,
            max_item_size,
            avg_item_size: 0,
            policy: Policy::MinIo,
        };
        (mem, layout, config)
    }

    #[test]
    fn store_then_load_roundtrips() {
        let (mut mem, layout, config) = make(8, 4, 32, 1 << 20, 0);
        unsafe {
            std::ptr::write(
                mem.as_mut_ptr() as *mut CacheHeader,
                CacheHeader::new(config.capacity, config.max_item_size, 8, 4, 32),
            );
        }
        let header = unsafe { &*(mem.as_ptr() as *const CacheHeader) };
        let entry_table = unsafe { EntryTable::new(mem.as_mut_ptr(), layout) };
        let directory = unsafe { Directory::new(mem.as_mut_ptr(), layout) };

        let data = b"hello cache".to_vec();
        store(
            &layout,
            mem.as_mut_ptr(),
            header,
            &entry_table,
            &directory,
            &config,
            "/tmp/fake/path.bin",
            &data,
        )
        .unwrap();

        let mut out = vec![0u8; 64];
        let n = load(&layout, mem.as_mut_ptr(), header, &entry_table, &directory, "/tmp/fake/path.bin", &mut out).unwrap();
        assert_eq!(&out[..n], &data[..]);

        crate::platform::posix::payload_unlink(&crate::shm_name::payload_name("/tmp/fake/path.bin"));
    }

    #[test]
    fn oversize_item_rejected_before_reserving() {
        let (mut mem, layout, config) = make(8, 4, 32, 1 << 20, 4);
        unsafe {
            std::ptr::write(
                mem.as_mut_ptr() as *mut CacheHeader,
                CacheHeader::new(config.capacity, config.max_item_size, 8, 4, 32),
            );
        }
        let header = unsafe { &*(mem.as_ptr() as *const CacheHeader) };
        let entry_table = unsafe { EntryTable::new(mem.as_mut_ptr(), layout) };
        let directory = unsafe { Directory::new(mem.as_mut_ptr(), layout) };

        let data = b"way too big".to_vec();
        let err = store(
            &layout,
            mem.as_mut_ptr(),
            header,
            &entry_table,
            &directory,
            &config,
            "/tmp/fake/oversize.bin",
            &data,
        )
        .unwrap_err();
        assert!(matches!(err, CacheError::TooBig { .. }));
        assert_eq!(header.used.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn miss_on_unknown_path() {
        let (mut mem, layout, config) = make(8, 4, 32, 1 << 20, 0);
        unsafe {
            std::ptr::write(
                mem.as_mut_ptr() as *mut CacheHeader,
                CacheHeader::new(config.capacity, config.max_item_size, 8, 4, 32),
            );
        }
        let header = unsafe { &*(mem.as_ptr() as *const CacheHeader) };
        let entry_table = unsafe { EntryTable::new(mem.as_mut_ptr(), layout) };
        let directory = unsafe { Directory::new(mem.as_mut_ptr(), layout) };
        let mut out = vec![0u8; 16];
        let err = load(&layout, mem.as_mut_ptr(), header, &entry_table, &directory, "/not/there", &mut out).unwrap_err();
        assert!(matches!(err, CacheError::Miss));
    }
}
