// SPDX-License-Identifier: MIT
//
// Demonstrates the fork-coherence property the cache exists for: the parent
// admits a file, forks a handful of worker processes, and each worker reads
// the same path back through the cache and reports a hit.
//
// Usage: demo_loader <file> [num_workers]

use std::env;
use std::process;

use mlshmcache::{CacheConfig, Policy};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let path = match args.next() {
        Some(p) => p,
        None => {
            eprintln!("usage: demo_loader <file> [num_workers]");
            process::exit(2);
        }
    };
    let num_workers: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(4);

    let cache = mlshmcache::Cache::init(CacheConfig {
        capacity: 256 * 1024 * 1024,
        max_item_size: 0,
        avg_item_size: 0,
        policy: Policy::MinIo,
    })
    .expect("cache init");

    let mut buf = vec![0u8; 64 * 1024 * 1024];
    let buf_len = buf.len() as u64;
    let n = cache.read(&path, &mut buf, buf_len).expect("cold read");
    println!("parent: admitted {path} ({n} bytes)");

    for worker in 0..num_workers {
        let pid = unsafe { libc::fork() };
        if pid == 0 {
            let mut worker_buf = vec![0u8; n + 4096];
            match cache.load(&path, &mut worker_buf) {
                Ok(got) => println!("worker {worker}: hit, {got} bytes"),
                Err(e) => println!("worker {worker}: miss ({e})"),
            }
            process::exit(0);
        }
    }

    for _ in 0..num_workers {
        let mut status = 0i32;
        unsafe { libc::wait(&mut status) };
    }

    let stats = cache.stats();
    println!(
        "stats: accesses={} hits={} cold_misses={} capacity_misses={} fails={}",
        stats.accesses, stats.hits, stats.cold_misses, stats.capacity_misses, stats.fails
    );

    unsafe { cache.destroy() };
}
