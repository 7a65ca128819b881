//! Request-scoped scratch allocation
//!
//! Simulates a server handling requests that each need a handful of small
//! scratch buffers. After a warm-up request the pool stops touching the
//! system allocator entirely: every buffer comes off a free list and goes
//! back on free.

use pagepool::{PoolResult, VariableConfig, VariablePool};

const REQUESTS: usize = 10_000;

struct Request {
    header: usize,
    body: usize,
}

fn handle(pool: &mut VariablePool, req: &Request) -> PoolResult<()> {
    let mut scratch = Vec::new();

    // Parse buffers sized by the request, all within the pooled classes.
    for len in [req.header, req.body, 16, 48] {
        if let Some(ptr) = pool.malloc(len)? {
            // SAFETY: the block spans at least `len` usable bytes.
            unsafe { ptr.as_ptr().write_bytes(0xAB, len) };
            scratch.push(ptr);
        }
    }

    // Request done; scratch goes back to the free lists.
    for ptr in scratch {
        pool.free(ptr)?;
    }
    Ok(())
}

fn main() -> PoolResult<()> {
    println!("=== pagepool Request Scratch ===\n");

    let config = VariableConfig::production().with_stats(true);
    let mut pool = VariablePool::new(config)?;

    for i in 0..REQUESTS {
        let req = Request {
            header: 32 + (i % 4) * 8,
            body: 64 + (i % 8) * 8,
        };
        handle(&mut pool, &req)?;
    }

    println!("Handled {REQUESTS} requests");
    println!(
        "Pages provisioned: {} ({} bytes resident)",
        pool.page_count(),
        pool.mem_used()
    );
    println!("{}", pool.stats());

    pool.clear();
    println!("Cleared; {} bytes resident", pool.mem_used());
    Ok(())
}
