//! Randomized allocate/free churn against both pools.
//!
//! Every live block carries a fill byte of its own; the payload is checked
//! immediately before its free, so any cross-block scribble (bad carve
//! arithmetic, class mixing, premature reuse) shows up as a corrupted fill.

use std::ptr::NonNull;

use pagepool::{FixedConfig, FixedPool, VariableConfig, VariablePool};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

struct LiveBlock {
    ptr: NonNull<u8>,
    len: usize,
    fill: u8,
}

impl LiveBlock {
    fn write(&self) {
        // SAFETY: the pool handed out at least `len` usable bytes.
        unsafe { std::ptr::write_bytes(self.ptr.as_ptr(), self.fill, self.len) };
    }

    fn check(&self) {
        // SAFETY: the block is still live.
        let payload = unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) };
        assert!(
            payload.iter().all(|&b| b == self.fill),
            "payload corrupted for a {}-byte block",
            self.len
        );
    }
}

#[test]
fn variable_pool_churn_preserves_payloads() {
    let mut rng = StdRng::seed_from_u64(0x5EED_0001);
    let mut pool = VariablePool::new(VariableConfig::default().with_stats(true)).unwrap();
    let mut live: Vec<LiveBlock> = Vec::new();
    let mut serial = 0u8;

    for _ in 0..4000 {
        if live.is_empty() || rng.random_bool(0.6) {
            // Mix of every size class plus oversized requests.
            let len = rng.random_range(1..=256);
            let ptr = pool.malloc(len).unwrap().unwrap();
            serial = serial.wrapping_add(1);
            let block = LiveBlock { ptr, len, fill: serial };
            block.write();
            live.push(block);
        } else {
            let victim = live.swap_remove(rng.random_range(0..live.len()));
            victim.check();
            pool.free(victim.ptr).unwrap();
        }
    }

    for block in live.drain(..) {
        block.check();
        pool.free(block.ptr).unwrap();
    }
    assert_eq!(pool.stats().allocation_balance(), 0);
    assert_eq!(pool.stats().live_blocks, 0);
    assert_eq!(pool.stats().oversized_blocks, 0);
}

#[test]
fn fixed_pool_churn_preserves_payloads() {
    let mut rng = StdRng::seed_from_u64(0x5EED_0002);
    let config = FixedConfig::new(48).with_page_size(4096).with_stats(true);
    let mut pool = FixedPool::new(config).unwrap();
    let unit = pool.unit_size();
    let mut live: Vec<LiveBlock> = Vec::new();
    let mut serial = 0u8;

    for _ in 0..4000 {
        if live.is_empty() || rng.random_bool(0.6) {
            let ptr = pool.malloc().unwrap();
            serial = serial.wrapping_add(1);
            let block = LiveBlock { ptr, len: unit, fill: serial };
            block.write();
            live.push(block);
        } else {
            let victim = live.swap_remove(rng.random_range(0..live.len()));
            victim.check();
            pool.free(victim.ptr).unwrap();
        }
    }

    for block in live.drain(..) {
        block.check();
        pool.free(block.ptr).unwrap();
    }
    assert_eq!(pool.stats().allocation_balance(), 0);
    assert_eq!(pool.free_slots(), pool.page_count() * pool.slots_per_page());
}

#[test]
fn interleaved_clears_keep_churn_stable() {
    let mut rng = StdRng::seed_from_u64(0x5EED_0003);
    let mut pool = VariablePool::new(VariableConfig::default()).unwrap();

    for _ in 0..8 {
        let mut live: Vec<LiveBlock> = Vec::new();
        let mut serial = 0u8;
        for _ in 0..300 {
            if live.is_empty() || rng.random_bool(0.7) {
                let len = rng.random_range(1..=192);
                let ptr = pool.malloc(len).unwrap().unwrap();
                serial = serial.wrapping_add(1);
                let block = LiveBlock { ptr, len, fill: serial };
                block.write();
                live.push(block);
            } else {
                let victim = live.swap_remove(rng.random_range(0..live.len()));
                victim.check();
                pool.free(victim.ptr).unwrap();
            }
        }
        for block in &live {
            block.check();
        }
        drop(live); // invalidated by the clear below
        pool.clear();
        assert_eq!(pool.mem_used(), 0);
    }
}
