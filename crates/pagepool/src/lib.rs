//! Small-object pool allocators built on bump-carved pages
//!
//! This crate provides two allocator front ends sharing one page layer:
//!
//! - [`VariablePool`] serves requests up to [`MAX_UNIT_SIZE`] bytes from
//!   size-classed free lists refilled in batches out of bump pages; larger
//!   requests fall through to the system allocator with a tracking header
//! - [`FixedPool`] serves exactly one unit size per instance from pages
//!   pre-partitioned into equal slots
//!
//! Both pools grow by whole pages and release them only on `clear` (or
//! drop), validate freed pointers instead of trusting them, and report
//! their page footprint via `mem_used`. Neither is thread-safe; wrap a
//! pool in your own lock to share it.
//!
//! # Features
//!
//! - `logging` (default): structured tracing of page provisioning,
//!   free-list refills, and rejected frees
//!
//! # Example
//!
//! ```
//! use pagepool::{PoolResult, VariableConfig, VariablePool};
//!
//! fn main() -> PoolResult<()> {
//!     let mut pool = VariablePool::new(VariableConfig::default())?;
//!
//!     if let Some(block) = pool.malloc(24)? {
//!         // SAFETY: the pool handed out at least 24 usable bytes.
//!         unsafe { block.as_ptr().write_bytes(0, 24) };
//!         pool.free(block)?;
//!     }
//!
//!     println!("page bytes reserved: {}", pool.mem_used());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

// Core modules
pub mod error;
pub mod fixed;
mod page;
pub mod stats;
pub mod traits;
pub mod utils;
pub mod variable;

// Re-export common types for convenience
pub use error::{PoolError, PoolResult};
pub use fixed::{FixedConfig, FixedPool};
pub use stats::PoolStats;
pub use traits::MemoryUsage;
pub use variable::{VariableConfig, VariablePool};

/// Allocation granularity in bytes; every pooled size rounds up to this.
pub const ALIGNMENT: usize = 8;

/// Number of size classes in the variable pool.
pub const UNIT_TYPE_COUNT: usize = 16;

/// Largest pooled request in bytes; anything bigger bypasses pooling.
pub const MAX_UNIT_SIZE: usize = ALIGNMENT * UNIT_TYPE_COUNT;

/// Floor for configured page sizes.
pub const MIN_PAGE_SIZE: usize = 4096;

/// Ceiling for configured page and unit sizes, the largest
/// [`ALIGNMENT`]-rounded size a single allocation can have. Both pools
/// reject configurations above it at creation.
pub const MAX_PAGE_SIZE: usize = isize::MAX as usize - (ALIGNMENT - 1);

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
