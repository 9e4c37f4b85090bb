// SPDX-License-Identifier: MIT
//
// Error taxonomy for the cache's public operations (spec §7). Every core
// entry point returns `Result<T>`; nothing is recovered internally except
// the read-through engine's deliberate folding of "any admission failure"
// into a capacity-miss counter bump while still returning the file bytes.

use thiserror::Error;

/// Errors surfaced by the cache's public operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// `read`: the filesystem `open` failed on a miss path.
    #[error("file not found")]
    NotFound,

    /// Zero-size file, oversize-vs-`max`, or other malformed request.
    #[error("invalid request: {0}")]
    Invalid(&'static str),

    /// `load`: the cached entry is larger than the caller's buffer.
    #[error("cached entry ({entry_size} bytes) exceeds buffer ({max} bytes)")]
    TooLarge { entry_size: u64, max: u64 },

    /// `load`: no directory entry for this path.
    #[error("cache miss")]
    Miss,

    /// `store`/admission: item exceeds `max_item_size`.
    #[error("item ({size} bytes) exceeds max_item_size ({max_item_size} bytes)")]
    TooBig { size: u64, max_item_size: u64 },

    /// Entry-slot exhaustion or capacity-byte exhaustion.
    #[error("cache out of memory")]
    OutOfMemory,

    /// Shared-memory segment create/truncate/mmap failure during admission.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;
