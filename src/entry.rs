// SPDX-License-Identifier: MIT
//
// Entry records: the sole storage for per-file metadata (spec §3, §4.3).
//
// `payload_fd` / `payload_addr` from the original data model are process-
// local by nature (a mapped address is only meaningful within the process
// that mapped it) and are therefore not part of this shared record — see
// DESIGN.md. Only `path`, `size`, `payload_name` and `bucket_id` need to be
// visible to every process sharing the cache.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::MAX_PATH_LEN;
use crate::shm_name::fnv1a_64;

/// `bucket_id = hash(slot_index) mod L` (spec §3): the bucket-lock selector
/// for a given entry-table slot. Computable from `slot_index` alone, before
/// the slot's entry has been touched — which is what lets `store` pick the
/// right bucket lock to guard the very `init` call that publishes this value
/// into the entry, and lets `load`/`flush` re-derive the same lock from a
/// directory-resolved index without reading the entry first.
pub fn bucket_id_for(slot_index: usize, lock_count: u64) -> u32 {
    (fnv1a_64(&slot_index.to_le_bytes()) % lock_count) as u32
}

/// A single cached file's metadata, bump-allocated into the entry table
/// (entry_table.rs) and published into the directory once fully initialized.
///
/// Written exactly once by the admitting thread before the directory insert
/// publishes it; read-only thereafter until `flush` (spec §5).
#[repr(C)]
pub struct EntryRecord {
    /// Bounded key, not required to be nul-terminated at exactly
    /// `MAX_PATH_LEN - 1` — `path_len` is authoritative.
    path: [u8; MAX_PATH_LEN],
    path_len: u32,
    /// `bucket_id = hash(slot_index) mod L`, fixed at init (spec §3).
    bucket_id: u32,
    size: AtomicU64,
}

impl EntryRecord {
    /// A zeroed, uninitialized record — the state every entry-table slot
    /// starts in before `init` is called on it.
    pub const fn empty() -> Self {
        Self {
            path: [0u8; MAX_PATH_LEN],
            path_len: 0,
            bucket_id: 0,
            size: AtomicU64::new(0),
        }
    }

    /// Initialize a freshly reserved slot. Must only be called once, by the
    /// thread that reserved the slot, before the directory insert that
    /// publishes it (spec §4.3's "Caller must guarantee path not currently
    /// present", §4.4 step 4).
    ///
    /// Returns `Err` if `path` does not fit in [`MAX_PATH_LEN`] bytes
    /// (including the implicit terminator accounting — spec §3, §9).
    pub fn init(&mut self, path: &str, size: u64, bucket_id: u32) -> Result<(), &'static str> {
        let bytes = path.as_bytes();
        if bytes.len() >= MAX_PATH_LEN {
            return Err("path exceeds MAX_PATH_LEN");
        }
        self.path[..bytes.len()].copy_from_slice(bytes);
        self.path[bytes.len()..].fill(0);
        self.path_len = bytes.len() as u32;
        self.bucket_id = bucket_id;
        self.size.store(size, Ordering::Release);
        Ok(())
    }

    pub fn path(&self) -> &str {
        std::str::from_utf8(&self.path[..self.path_len as usize]).unwrap_or("")
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn bucket_id(&self) -> u32 {
        self.bucket_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_and_read_back() {
        let mut e = EntryRecord::empty();
        e.init("images/a.bin", 2048, 3).unwrap();
        assert_eq!(e.path(), "images/a.bin");
        assert_eq!(e.size(), 2048);
        assert_eq!(e.bucket_id(), 3);
    }

    #[test]
    fn overlong_path_rejected() {
        let mut e = EntryRecord::empty();
        let long = "x".repeat(MAX_PATH_LEN);
        assert!(e.init(&long, 1, 0).is_err());
    }

    #[test]
    fn bucket_id_for_is_deterministic_and_in_range() {
        for idx in 0..100usize {
            let id = bucket_id_for(idx, 8);
            assert!(id < 8);
            assert_eq!(id, bucket_id_for(idx, 8));
        }
    }

    #[test]
    fn bucket_id_for_spreads_across_buckets() {
        let mut seen = std::collections::HashSet::new();
        for idx in 0..64usize {
            seen.insert(bucket_id_for(idx, 8));
        }
        assert!(seen.len() > 1, "all slots hashed into a single bucket");
    }
}
