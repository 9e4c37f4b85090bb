// SPDX-License-Identifier: MIT
//
// The read-through engine (spec §4.5): try the cache first; on a miss, read
// the file directly from storage, hand the bytes back to the caller
// regardless of what happens next, and only then attempt admission. A failed
// admission (oversize, or the cache is full) never turns a successful origin
// read into an error — it only shows up in the stats.

use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::directory::Directory;
use crate::entry_table::EntryTable;
use crate::error::{CacheError, Result};
use crate::layout::{CacheHeader, Layout};
use crate::payload;
use crate::platform::posix::{self, DirectFile};

/// `read(path, buf, max)`: serve from cache if present, else read through
/// from `path` on disk, admitting it into the cache on the way out.
///
/// `buf` must be at least `max` bytes; `max == 0` means unbounded (limited
/// only by `buf.len()`). Returns the number of bytes written to `buf`, which
/// is always the file's true size.
#[allow(clippy::too_many_arguments)]
pub fn read(
    layout: &Layout,
    base: *mut u8,
    header: &CacheHeader,
    entry_table: &EntryTable,
    directory: &Directory,
    config: &CacheConfig,
    path: &str,
    buf: &mut [u8],
    max: u64,
) -> Result<usize> {
    header.stats.bump_accesses();

    match payload::load(layout, base, header, entry_table, directory, path, buf) {
        Ok(n) => {
            header.stats.bump_hits();
            return Ok(n);
        }
        Err(CacheError::Miss) => {}
        Err(e) => {
            header.stats.bump_fails();
            return Err(e);
        }
    }

    match read_cold(layout, base, header, entry_table, directory, config, path, buf, max) {
        Ok(n) => Ok(n),
        Err(e) => {
            header.stats.bump_fails();
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn read_cold(
    layout: &Layout,
    base: *mut u8,
    header: &CacheHeader,
    entry_table: &EntryTable,
    directory: &Directory,
    config: &CacheConfig,
    path: &str,
    buf: &mut [u8],
    max: u64,
) -> Result<usize> {
    let file = DirectFile::open(path)?;
    let true_size = file.size()?;

    if true_size == 0 {
        return Err(CacheError::Invalid("file is empty"));
    }
    if max != 0 && true_size > max {
        return Err(CacheError::TooLarge {
            entry_size: true_size,
            max,
        });
    }
    if buf.len() < true_size as usize {
        return Err(CacheError::TooLarge {
            entry_size: true_size,
            max: buf.len() as u64,
        });
    }

    let rounded = round_up(true_size as usize, crate::config::DIRECT_IO_BLOCK_SIZE);
    let aligned = posix::alloc_aligned(rounded, crate::config::DIRECT_IO_BLOCK_SIZE)?;
    let read_result = (|| -> Result<()> {
        let aligned_slice = unsafe { std::slice::from_raw_parts_mut(aligned, rounded) };
        file.read_rounded(aligned_slice, true_size)?;
        Ok(())
    })();
    if let Err(e) = read_result {
        posix::free_aligned(aligned);
        return Err(e);
    }

    unsafe {
        std::ptr::copy_nonoverlapping(aligned, buf.as_mut_ptr(), true_size as usize);
    }
    let data = unsafe { std::slice::from_raw_parts(aligned, true_size as usize) }.to_vec();
    posix::free_aligned(aligned);

    match payload::store(layout, base, header, entry_table, directory, config, path, &data) {
        Ok(()) => {
            header.stats.bump_cold_misses();
            debug!(path, size = true_size, "read-through: admitted");
        }
        Err(CacheError::OutOfMemory) => {
            header.stats.bump_capacity_misses();
            debug!(path, size = true_size, "read-through: capacity miss, not admitted");
        }
        Err(e) => {
            warn!(path, error = %e, "read-through: admission failed");
            header.stats.bump_capacity_misses();
        }
    }

    Ok(true_size as usize)
}

fn round_up(n: usize, block: usize) -> usize {
    (n + block - 1) / block * block
}
