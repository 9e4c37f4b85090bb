// SPDX-License-Identifier: MIT
//
// Cache configuration (spec §3, §6).

/// Default average item size used to size the entry table when
/// `avg_item_size == 0` is passed to [`CacheConfig`] (spec §6: "`avg_item_size
/// = 0` means use the default of 100 KiB").
pub const DEFAULT_AVG_ITEM_SIZE: u64 = 100 * 1024;

/// Block size direct I/O reads are rounded up to (spec §4.5, §6).
pub const DIRECT_IO_BLOCK_SIZE: usize = 4096;

/// Maximum bound on a cache key, including the nul terminator (spec §3).
pub const MAX_PATH_LEN: usize = 128;

/// Admission / replacement policy. Only [`Policy::MinIo`] is implemented;
/// [`Policy::Fifo`] exists for source-code parity with the original (spec
/// §1, §4.2) and is rejected by [`CacheConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Policy {
    /// Admit on first miss if it fits; never evict (spec §4.2).
    MinIo = 0,
    /// Not implemented.
    Fifo = 1,
}

/// Cache configuration, supplied once at [`crate::Cache::init`].
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Total data capacity `C`, in bytes.
    pub capacity: u64,
    /// Maximum single-item size `M`, in bytes. `0` means unlimited.
    pub max_item_size: u64,
    /// Expected average item size `A`, in bytes, used only to size the entry
    /// table. `0` means [`DEFAULT_AVG_ITEM_SIZE`].
    pub avg_item_size: u64,
    /// Replacement/admission policy.
    pub policy: Policy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            max_item_size: 0,
            avg_item_size: 0,
            policy: Policy::MinIo,
        }
    }
}

impl CacheConfig {
    /// Effective average item size used for entry-table sizing.
    fn effective_avg_item_size(&self) -> u64 {
        if self.avg_item_size == 0 {
            DEFAULT_AVG_ITEM_SIZE
        } else {
            self.avg_item_size
        }
    }

    /// `N_max = (2*C) / A`, per spec §3. Must be >= 1.
    pub fn n_max(&self) -> u64 {
        let n = (2 * self.capacity) / self.effective_avg_item_size();
        n.max(1)
    }

    /// `L = max(8, N_max/16)` entry-bucket spinlocks, per spec §3.
    pub fn lock_count(&self) -> u64 {
        (self.n_max() / 16).max(8)
    }

    /// Reject configurations this crate cannot serve: a non-MinIO policy, or
    /// zero capacity (would make every admission a capacity miss before the
    /// cache has done anything useful, almost certainly a caller mistake).
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.policy != Policy::MinIo {
            return Err(crate::error::CacheError::Invalid(
                "only the MinIO admission policy is implemented",
            ));
        }
        if self.capacity == 0 {
            return Err(crate::error::CacheError::Invalid(
                "capacity must be nonzero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_avg_item_size_yields_documented_n_max() {
        let cfg = CacheConfig {
            capacity: 8 * 1024 * 1024,
            max_item_size: 0,
            avg_item_size: 0,
            policy: Policy::MinIo,
        };
        assert_eq!(cfg.n_max(), (2 * 8 * 1024 * 1024) / DEFAULT_AVG_ITEM_SIZE);
    }

    #[test]
    fn n_max_is_never_zero() {
        let cfg = CacheConfig {
            capacity: 1,
            max_item_size: 0,
            avg_item_size: u64::MAX,
            policy: Policy::MinIo,
        };
        assert_eq!(cfg.n_max(), 1);
    }

    #[test]
    fn lock_count_has_a_floor_of_eight() {
        let cfg = CacheConfig {
            capacity: 1024,
            max_item_size: 0,
            avg_item_size: DEFAULT_AVG_ITEM_SIZE,
            policy: Policy::MinIo,
        };
        assert_eq!(cfg.lock_count(), 8);
    }

    #[test]
    fn fifo_policy_is_rejected() {
        let cfg = CacheConfig {
            capacity: 1024,
            max_item_size: 0,
            avg_item_size: 0,
            policy: Policy::Fifo,
        };
        assert!(cfg.validate().is_err());
    }
}
