// SPDX-License-Identifier: MIT
//
// POSIX-only: fork-shared memory and direct I/O have no Windows equivalent
// this crate emulates. See DESIGN.md for the rationale the teacher's
// Windows target was dropped.

#[cfg(unix)]
pub mod posix;

#[cfg(not(unix))]
compile_error!("mlshmcache requires a POSIX target (fork + shm_open + mmap)");
