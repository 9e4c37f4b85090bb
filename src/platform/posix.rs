// SPDX-License-Identifier: MIT
//
// POSIX syscall wrappers: anonymous fork-shared memory (for the cache root,
// entry table and directory — §4.1), named payload segments (§4.4), and
// direct-I/O file reads (§4.5). Kept together, as the teacher crate keeps
// its shm and mutex primitives together in one platform file per OS.

use std::ffi::CString;
use std::io;
use std::ptr;

use crate::config::DIRECT_IO_BLOCK_SIZE;

// ---------------------------------------------------------------------------
// Anonymous, shared, prefaulted, page-locked memory (§4.1)
// ---------------------------------------------------------------------------

/// Create an anonymous `MAP_SHARED` region of `len` bytes, prefaulted and
/// page-locked.
///
/// `MAP_SHARED` (rather than `MAP_PRIVATE`) is what makes the mapping
/// coherent across `fork`: writes in any descendant are visible to all
/// others through the same physical pages, with no copy-on-write split.
/// `mlock` pins the pages so the cache cannot be paged out under memory
/// pressure — per §4.1, "the cache must be faster than storage, or it is
/// useless". If locking fails the provisional mapping is released and the
/// error propagated, matching the documented "failure to lock converts into
/// null" behavior.
pub fn map_anonymous_shared_locked(len: usize) -> io::Result<*mut u8> {
    if len == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "len is 0"));
    }

    let mut flags = libc::MAP_SHARED | libc::MAP_ANONYMOUS;
    #[cfg(target_os = "linux")]
    {
        flags |= libc::MAP_POPULATE;
    }

    let mem = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            -1,
            0,
        )
    };
    if mem == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    #[cfg(not(target_os = "linux"))]
    prefault(mem as *mut u8, len);

    if unsafe { libc::mlock(mem, len) } != 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::munmap(mem, len) };
        return Err(err);
    }

    Ok(mem as *mut u8)
}

/// Touch every page once to force the kernel to materialize it, used on
/// platforms without `MAP_POPULATE`.
#[cfg(not(target_os = "linux"))]
fn prefault(mem: *mut u8, len: usize) {
    let page = page_size();
    let mut off = 0usize;
    while off < len {
        unsafe { ptr::write_volatile(mem.add(off), 0) };
        off += page;
    }
}

#[cfg(not(target_os = "linux"))]
fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz <= 0 {
        4096
    } else {
        sz as usize
    }
}

/// Unmap a region previously returned by [`map_anonymous_shared_locked`].
/// Never called implicitly — only from an explicit `destroy` (spec §3's
/// cache lifecycle: "Never implicitly reclaimed").
pub fn unmap_anonymous(mem: *mut u8, len: usize) {
    unsafe {
        libc::munlock(mem as *mut libc::c_void, len);
        libc::munmap(mem as *mut libc::c_void, len);
    }
}

// ---------------------------------------------------------------------------
// Named payload segments (§4.4)
// ---------------------------------------------------------------------------

/// Create a named shm segment of exactly `size` bytes and map it read/write.
/// Fails with `AlreadyExists` if the name is already in use — admission
/// guarantees each key is admitted at most once per flush epoch (spec §3),
/// so a collision here means a caller invariant was violated.
pub fn payload_create(name: &str, size: usize) -> io::Result<*mut u8> {
    let c_name = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let perms: libc::mode_t = 0o600;

    let fd = unsafe {
        libc::shm_open(
            c_name.as_ptr(),
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            perms as libc::c_uint,
        )
    };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(fd);
            libc::shm_unlink(c_name.as_ptr());
        }
        return Err(err);
    }

    let mem = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    unsafe { libc::close(fd) };
    if mem == libc::MAP_FAILED {
        let err = io::Error::last_os_error();
        unsafe { libc::shm_unlink(c_name.as_ptr()) };
        return Err(err);
    }

    Ok(mem as *mut u8)
}

/// Open an existing named shm segment and map it. `write` selects
/// `PROT_READ|PROT_WRITE` vs `PROT_READ` (spec §4.4 `load` step 4: "Open the
/// payload segment read-only").
pub fn payload_open(name: &str, size: usize, write: bool) -> io::Result<*mut u8> {
    let c_name = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let oflag = if write { libc::O_RDWR } else { libc::O_RDONLY };
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), oflag, 0) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }

    let prot = if write {
        libc::PROT_READ | libc::PROT_WRITE
    } else {
        libc::PROT_READ
    };
    let mem = unsafe { libc::mmap(ptr::null_mut(), size, prot, libc::MAP_SHARED, fd, 0) };
    unsafe { libc::close(fd) };
    if mem == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(mem as *mut u8)
}

/// Unmap a payload segment mapping (does not unlink the backing object).
pub fn payload_unmap(mem: *mut u8, size: usize) {
    unsafe { libc::munmap(mem as *mut libc::c_void, size) };
}

/// Remove the backing object for a named payload segment (spec §4.6, §4.7).
pub fn payload_unlink(name: &str) {
    if let Ok(c_name) = CString::new(name) {
        unsafe { libc::shm_unlink(c_name.as_ptr()) };
    }
}

// ---------------------------------------------------------------------------
// Direct-I/O file reads (§4.5)
// ---------------------------------------------------------------------------

/// A file opened (where possible) with direct I/O, for the read-through
/// miss path.
pub struct DirectFile {
    fd: i32,
}

impl DirectFile {
    /// Open `path` for direct I/O. Falls back to buffered I/O when the
    /// platform or filesystem doesn't support `O_DIRECT` (spec §9 open
    /// question: "the implementation is free to fall back to buffered I/O
    /// but must preserve the observable size returned to the caller").
    pub fn open(path: &str) -> io::Result<Self> {
        let c_path =
            CString::new(path).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        #[cfg(target_os = "linux")]
        let direct_flag = libc::O_DIRECT;
        #[cfg(not(target_os = "linux"))]
        let direct_flag = 0;

        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY | direct_flag) };
        if fd == -1 {
            #[cfg(target_os = "linux")]
            {
                // Some filesystems (tmpfs, overlayfs variants) reject
                // O_DIRECT outright; retry buffered rather than surface
                // NOT_FOUND for a file that does in fact exist.
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINVAL) {
                    let fd2 = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY) };
                    if fd2 != -1 {
                        return Ok(Self { fd: fd2 });
                    }
                }
                return Err(err);
            }
            #[cfg(not(target_os = "linux"))]
            {
                return Err(io::Error::last_os_error());
            }
        }

        #[cfg(target_os = "macos")]
        unsafe {
            // O_DIRECT doesn't exist on macOS; F_NOCACHE is the closest
            // equivalent. Best-effort — a failure here doesn't change
            // observable behavior, only caching.
            libc::fcntl(fd, libc::F_NOCACHE, 1);
        }

        Ok(Self { fd })
    }

    /// Determine the file's true size via seek-to-end (spec §4.5 step 4).
    pub fn size(&self) -> io::Result<u64> {
        let off = unsafe { libc::lseek(self.fd, 0, libc::SEEK_END) };
        if off < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::lseek(self.fd, 0, libc::SEEK_SET) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(off as u64)
    }

    /// Read into `buf`, issuing each `read(2)` request in `DIRECT_IO_BLOCK_SIZE`-
    /// aligned lengths as direct I/O requires (spec §4.5 step 5), but stopping
    /// as soon as `true_size` bytes have been collected. `buf` must already be
    /// sized (and, for true `O_DIRECT`, aligned) to at least the rounded
    /// length by the caller.
    ///
    /// Stopping exactly at `true_size` matters: on a filesystem that honors
    /// `O_DIRECT`, a read reaching EOF returns a short count and leaves the
    /// file offset unaligned. Continuing the loop up to `rounded` would issue
    /// a further read at that unaligned offset and fail with `EINVAL` for any
    /// file whose size isn't itself a multiple of the block size.
    pub fn read_rounded(&self, buf: &mut [u8], true_size: u64) -> io::Result<usize> {
        let true_size = true_size as usize;
        let rounded = round_up(true_size, DIRECT_IO_BLOCK_SIZE);
        if buf.len() < rounded {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer too small for rounded direct I/O read",
            ));
        }
        let mut total = 0usize;
        while total < true_size {
            let n = unsafe {
                libc::read(
                    self.fd,
                    buf[total..rounded].as_mut_ptr() as *mut libc::c_void,
                    rounded - total,
                )
            };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            if n == 0 {
                break; // unexpected EOF before true_size was reached
            }
            total += n as usize;
        }
        Ok(total.min(true_size))
    }
}

impl Drop for DirectFile {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

fn round_up(n: usize, block: usize) -> usize {
    (n + block - 1) / block * block
}

/// Allocate a buffer aligned to `align` bytes, sized to `len`. Used for the
/// caller-visible buffer in `read`/`load`, which must be block-aligned to
/// satisfy direct I/O (spec §6).
pub fn alloc_aligned(len: usize, align: usize) -> io::Result<*mut u8> {
    let mut ptr: *mut libc::c_void = ptr::null_mut();
    let eno = unsafe { libc::posix_memalign(&mut ptr, align, len.max(align)) };
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }
    Ok(ptr as *mut u8)
}

/// Free a buffer allocated by [`alloc_aligned`].
pub fn free_aligned(ptr: *mut u8) {
    unsafe { libc::free(ptr as *mut libc::c_void) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_to_block_size() {
        assert_eq!(round_up(0, 4096), 0);
        assert_eq!(round_up(1, 4096), 4096);
        assert_eq!(round_up(4096, 4096), 4096);
        assert_eq!(round_up(4097, 4096), 8192);
        assert_eq!(round_up(5000, 4096), 8192);
    }

    #[test]
    fn anonymous_region_roundtrips_a_write() {
        let len = 4096 * 4;
        let mem = map_anonymous_shared_locked(len).expect("map");
        unsafe {
            ptr::write(mem, 0xAB);
            assert_eq!(ptr::read(mem), 0xAB);
        }
        unmap_anonymous(mem, len);
    }

    #[test]
    fn aligned_alloc_is_aligned() {
        let ptr = alloc_aligned(4096, 4096).expect("alloc");
        assert_eq!(ptr as usize % 4096, 0);
        free_aligned(ptr);
    }
}
