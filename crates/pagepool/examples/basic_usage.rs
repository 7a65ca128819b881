//! Basic usage of both pool allocators
//!
//! This example walks through the fundamental allocate/free/clear cycle.

use pagepool::{FixedPool, MemoryUsage, VariableConfig, VariablePool};

fn main() {
    println!("=== pagepool Basic Usage ===\n");

    variable_pool_example();
    fixed_pool_example();
}

fn variable_pool_example() {
    println!("## Variable-Size Pool");
    println!("Use case: many short-lived buffers of assorted small sizes\n");

    let config = VariableConfig::default().with_stats(true);
    let mut pool = VariablePool::new(config).expect("Failed to create pool");

    // Small requests come from size-classed free lists.
    let small = pool.malloc(24).expect("Allocation failed").expect("24 > 0");
    println!("  Allocated 24 bytes at {:p}", small.as_ptr());

    // SAFETY: the block spans at least 24 usable bytes.
    unsafe { small.as_ptr().write_bytes(0x42, 24) };

    // Requests above the largest class go straight to the system allocator.
    let big = pool.malloc(4096).expect("Allocation failed").expect("4096 > 0");
    println!("  Allocated 4096 bytes (oversized) at {:p}", big.as_ptr());

    pool.free(small).expect("Free failed");
    pool.free(big).expect("Free failed");

    // Freed blocks are reused LIFO within their class.
    let again = pool.malloc(20).expect("Allocation failed").expect("20 > 0");
    println!("  Reused the 24-byte class slot: {:p}", again.as_ptr());
    pool.free(again).expect("Free failed");

    println!("  Page bytes reserved: {}", pool.mem_used());
    println!("{}", pool.stats());

    pool.clear();
    println!("  After clear: {} bytes reserved\n", pool.mem_used());
}

fn fixed_pool_example() {
    println!("## Fixed-Size Pool");
    println!("Use case: one struct size allocated and freed at high rate\n");

    let mut pool = FixedPool::with_unit_size(96).expect("Failed to create pool");
    println!(
        "  {} slots of {} bytes per page",
        pool.slots_per_page(),
        pool.unit_size()
    );

    let a = pool.malloc().expect("Allocation failed");
    let b = pool.malloc().expect("Allocation failed");
    println!("  Allocated units at {:p} and {:p}", a.as_ptr(), b.as_ptr());

    pool.free(a).expect("Free failed");
    let c = pool.malloc().expect("Allocation failed");
    println!("  Freed slot came back first: {}", a == c);

    pool.free(b).expect("Free failed");
    pool.free(c).expect("Free failed");

    println!(
        "  Free capacity on existing pages: {:?} bytes",
        pool.available_memory()
    );
    pool.clear();
    println!("  After clear: {} bytes reserved", pool.mem_used());
}
