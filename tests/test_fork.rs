// SPDX-License-Identifier: MIT
//
// Fork-coherence: the cache's whole reason for existing is that a file
// admitted by one process is visible, byte-for-byte, to every process that
// forked from it afterward (spec §2, §4.1).

use std::io::Write;

use mlshmcache::{CacheConfig, Policy};

#[test]
fn child_sees_parent_admitted_payload() {
    let path = std::env::temp_dir().join(format!("mlshmcache-fork-test-{}.bin", std::process::id()));
    let contents: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
    {
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&contents).unwrap();
        f.sync_all().unwrap();
    }

    let cache = mlshmcache::Cache::init(CacheConfig {
        capacity: 1 << 20,
        max_item_size: 0,
        avg_item_size: 1024,
        policy: Policy::MinIo,
    })
    .unwrap();

    let path_str = path.to_str().unwrap();
    let mut buf = vec![0u8; contents.len() + 4096];
    cache.read(path_str, &mut buf, 0).unwrap();
    assert!(cache.contains(path_str));

    // Pipe to report the child's verdict back to the parent: fork() does not
    // let us just inspect return values across the process boundary.
    let mut fds = [0i32; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let (read_fd, write_fd) = (fds[0], fds[1]);

    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");

    if pid == 0 {
        // Child: the cache handle was inherited across fork and still
        // points at the same shared mapping (spec §2's "fork-coherent").
        unsafe { libc::close(read_fd) };
        let mut child_buf = vec![0u8; contents.len() + 4096];
        let ok = match cache.load(path_str, &mut child_buf) {
            Ok(n) => n == contents.len() && child_buf[..n] == contents[..],
            Err(_) => false,
        };
        let byte: u8 = if ok { 1 } else { 0 };
        unsafe {
            libc::write(write_fd, &byte as *const u8 as *const libc::c_void, 1);
            libc::close(write_fd);
        }
        std::process::exit(0);
    }

    unsafe { libc::close(write_fd) };
    let mut status = 0i32;
    unsafe { libc::waitpid(pid, &mut status, 0) };

    let mut result_byte = [0u8; 1];
    let n = unsafe { libc::read(read_fd, result_byte.as_mut_ptr() as *mut libc::c_void, 1) };
    unsafe { libc::close(read_fd) };

    assert_eq!(n, 1, "child did not report a result");
    assert_eq!(result_byte[0], 1, "child did not see the parent's cached payload intact");

    unsafe { cache.destroy() };
    let _ = std::fs::remove_file(&path);
}
