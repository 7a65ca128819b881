//! Size-classed pool allocator for small variable-size requests
//!
//! Requests up to [`MAX_UNIT_SIZE`] bytes are rounded up to a multiple of
//! [`ALIGNMENT`] and served from one of [`UNIT_TYPE_COUNT`] free stacks,
//! one per size class. Empty stacks are refilled in batches by carving
//! header+payload slots out of the current bump page; exhausted pages are
//! replaced by freshly provisioned ones and only released as a whole by
//! [`VariablePool::clear`]. Larger requests bypass pooling and go to the
//! system allocator, tracked in a registry so they can be validated on free
//! and reclaimed on clear.
//!
//! # Safety
//!
//! All blocks live inside page buffers this pool owns (or inside oversized
//! allocations it registered), and every block is preceded by an 8-byte
//! header written at carve time:
//! - `size` holds the class ceiling (pooled) or the rounded request
//!   (oversized), so `free` never needs a caller-supplied size
//! - `state` holds a magic tag flipped between live and free, which turns
//!   double frees into errors instead of corruption
//!
//! ## Invariants
//!
//! - The carve cursor never exceeds the current page capacity; every carved
//!   slot (header plus payload) lies entirely inside one page
//! - A class free stack only holds blocks whose header is tagged free and
//!   whose `size` equals that class's ceiling (classes never mix)
//! - The page list is append-only between clears; `PageIndex` mirrors it
//!   and answers only for carved bytes, which are zero-filled at carve time
//!   so a header read through any located pointer sees initialized memory
//! - Freeing validates before mutating: a pointer outside every carved span
//!   and every registered oversized block is rejected without being read

use std::alloc::{Layout, alloc, dealloc};
use std::mem;
use std::ptr::{self, NonNull};

use hashbrown::HashMap;

use crate::error::{PoolError, PoolResult};
use crate::page::{Page, PageIndex};
use crate::stats::PoolStats;
use crate::traits::MemoryUsage;
use crate::utils::{align_up, is_aligned};
use crate::{ALIGNMENT, MAX_PAGE_SIZE, MAX_UNIT_SIZE, MIN_PAGE_SIZE, UNIT_TYPE_COUNT};

/// Default number of slots carved per free-list refill.
pub const DEFAULT_REFILL_COUNT: usize = 64;

/// Bytes reserved in front of every block for its header.
const HEADER_SIZE: usize = ALIGNMENT;

/// State tag for a block currently handed out to a caller.
const LIVE_MAGIC: u32 = 0xA110_C8ED;

/// State tag for a block sitting on a class free stack.
const FREE_MAGIC: u32 = 0xF2EE_B10C;

/// Header written immediately before every block this pool hands out.
#[repr(C)]
struct BlockHeader {
    size: u32,
    state: u32,
}

const _: () = assert!(mem::size_of::<BlockHeader>() == HEADER_SIZE);

/// Pointer to the header sitting [`HEADER_SIZE`] bytes before `block`.
///
/// # Safety
///
/// `block` must point at the payload of a block carved or allocated by this
/// module, so the header bytes exist inside the same allocation.
#[inline]
unsafe fn header_ptr(block: NonNull<u8>) -> *mut BlockHeader {
    // SAFETY: per the contract, the header precedes the payload inside the
    // same allocation, so the subtraction stays in bounds.
    unsafe { block.as_ptr().sub(HEADER_SIZE).cast::<BlockHeader>() }
}

/// Class index serving a rounded size.
#[inline]
const fn class_of(rounded: usize) -> usize {
    debug_assert!(rounded > 0 && rounded <= MAX_UNIT_SIZE);
    (rounded - 1) / ALIGNMENT
}

/// Payload ceiling of a class.
#[inline]
const fn class_unit(class: usize) -> usize {
    (class + 1) * ALIGNMENT
}

/// Configuration for the variable-size pool
#[derive(Debug, Clone)]
pub struct VariableConfig {
    /// Bytes per bump page. Clamped up to [`MIN_PAGE_SIZE`] and to one full
    /// refill batch of the largest class, then rounded to [`ALIGNMENT`].
    /// At most [`MAX_PAGE_SIZE`].
    pub page_size: usize,

    /// Slots carved per free-list refill
    pub refill_count: usize,

    /// Enable statistics tracking
    pub track_stats: bool,

    /// Fill pattern written into freshly served memory
    pub alloc_pattern: Option<u8>,

    /// Fill pattern written into freed memory
    pub dealloc_pattern: Option<u8>,
}

impl Default for VariableConfig {
    fn default() -> Self {
        Self {
            page_size: 64 * 1024, // 64KB
            refill_count: DEFAULT_REFILL_COUNT,
            track_stats: cfg!(debug_assertions),
            alloc_pattern: if cfg!(debug_assertions) { Some(0xBB) } else { None },
            dealloc_pattern: if cfg!(debug_assertions) { Some(0xDD) } else { None },
        }
    }
}

impl VariableConfig {
    /// Production configuration - optimized for performance
    pub fn production() -> Self {
        Self {
            page_size: 64 * 1024,
            refill_count: DEFAULT_REFILL_COUNT,
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Debug configuration - optimized for catching misuse
    pub fn debug() -> Self {
        Self {
            page_size: 16 * 1024, // small pages surface growth bugs sooner
            refill_count: 16,
            track_stats: true,
            alloc_pattern: Some(0xBB),
            dealloc_pattern: Some(0xDD),
        }
    }

    /// Sets the page size
    #[must_use = "builder methods must be chained or built"]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the refill batch count
    #[must_use = "builder methods must be chained or built"]
    pub fn with_refill_count(mut self, count: usize) -> Self {
        self.refill_count = count;
        self
    }

    /// Enables/disables statistics tracking
    #[must_use = "builder methods must be chained or built"]
    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.track_stats = enabled;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> PoolResult<()> {
        if self.refill_count == 0 {
            return Err(PoolError::invalid_config("refill count must be at least 1"));
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(PoolError::invalid_config(
                "page size exceeds the maximum allocation size",
            ));
        }
        match self.refill_count.checked_mul(HEADER_SIZE + MAX_UNIT_SIZE) {
            Some(batch) if batch <= MAX_PAGE_SIZE => Ok(()),
            _ => Err(PoolError::invalid_config("refill batch overflows page sizing")),
        }
    }
}

/// Oversized allocation bookkeeping, keyed by payload address.
#[derive(Debug)]
struct Oversized {
    layout: Layout,
}

/// Pool allocator for small variable-size blocks
///
/// # Memory Layout
/// ```text
/// page: [hdr|slot][hdr|slot][hdr|slot] ... [raw tail]
///                                          ^ carve cursor
/// ```
///
/// Each class keeps a LIFO stack of free slots, so a freshly freed block is
/// the first one handed back out for its class.
#[derive(Debug)]
pub struct VariablePool {
    /// Effective page size after clamping
    page_size: usize,

    /// Bump pages, oldest first; the last one is the carve target
    pages: Vec<Page>,

    /// Address index mirroring `pages`
    index: PageIndex,

    /// Byte offset of the first uncarved byte in the last page
    cursor: usize,

    /// One free stack per size class
    free: [Vec<NonNull<u8>>; UNIT_TYPE_COUNT],

    /// Live oversized blocks served by the system allocator
    oversized: HashMap<usize, Oversized>,

    /// Configuration
    config: VariableConfig,

    /// Statistics (recorded only when `config.track_stats` is set)
    stats: PoolStats,
}

impl VariablePool {
    /// Creates a pool and provisions its first page.
    ///
    /// The configured page size is clamped so one refill batch of the
    /// largest class always fits a fresh page. Fails only on invalid
    /// configuration or if the initial page cannot be provisioned.
    pub fn new(config: VariableConfig) -> PoolResult<Self> {
        config.validate()?;

        // validate() caps both this product and the configured page size at
        // MAX_PAGE_SIZE, so the round-up cannot overflow.
        let batch_bytes = config.refill_count * (HEADER_SIZE + MAX_UNIT_SIZE);
        let page_size = align_up(config.page_size.max(MIN_PAGE_SIZE), ALIGNMENT).max(batch_bytes);

        let mut pool = Self {
            page_size,
            pages: Vec::new(),
            index: PageIndex::default(),
            cursor: 0,
            free: [const { Vec::new() }; UNIT_TYPE_COUNT],
            oversized: HashMap::new(),
            config,
            stats: PoolStats::new(),
        };
        pool.provision_page()?;
        Ok(pool)
    }

    /// Creates a pool with default config and the given page size
    pub fn with_page_size(page_size: usize) -> PoolResult<Self> {
        Self::new(VariableConfig::default().with_page_size(page_size))
    }

    /// Creates a pool with production config
    pub fn production(page_size: usize) -> PoolResult<Self> {
        Self::new(VariableConfig::production().with_page_size(page_size))
    }

    /// Creates a pool with debug config
    pub fn debug(page_size: usize) -> PoolResult<Self> {
        Self::new(VariableConfig::debug().with_page_size(page_size))
    }

    /// Allocates `size` bytes, aligned to [`ALIGNMENT`].
    ///
    /// A zero-size request is a no-op answered with `Ok(None)`. Requests
    /// above [`MAX_UNIT_SIZE`] are served directly by the system allocator
    /// and do not participate in size-classed reuse. A failed provisioning
    /// surfaces as [`PoolError::OutOfMemory`] and leaves the pool as it was.
    pub fn malloc(&mut self, size: usize) -> PoolResult<Option<NonNull<u8>>> {
        if size == 0 {
            return Ok(None);
        }
        if size > MAX_UNIT_SIZE {
            return self.malloc_oversized(size).map(Some);
        }

        let rounded = align_up(size, ALIGNMENT);
        let class = class_of(rounded);
        if self.free[class].is_empty() {
            self.refill_class(class)?;
        }
        let Some(block) = self.free[class].pop() else {
            // refill_class pushes at least one slot or errors out
            return Err(PoolError::out_of_memory(rounded));
        };

        let unit = class_unit(class);
        // SAFETY: the block came off a class free stack, so its header
        // precedes it inside a live page.
        unsafe {
            debug_assert_eq!((*header_ptr(block)).state, FREE_MAGIC);
            header_ptr(block).write(BlockHeader {
                size: unit as u32,
                state: LIVE_MAGIC,
            });
        }
        if let Some(pattern) = self.config.alloc_pattern {
            // SAFETY: the slot payload spans `unit` bytes inside its page.
            unsafe { ptr::write_bytes(block.as_ptr(), pattern, unit) };
        }
        if self.config.track_stats {
            self.stats.record_alloc();
        }
        Ok(Some(block))
    }

    /// Returns a block to the pool.
    ///
    /// The block's origin (size class or oversized) is recovered from its
    /// header and the oversized registry; no size argument is needed. A
    /// pointer this pool never handed out is rejected with
    /// [`PoolError::InvalidPointer`], and a pointer freed twice with
    /// [`PoolError::DoubleFree`]. Pointers outside every page's carved span
    /// are rejected before any memory is read; within it the detection is
    /// best effort, since a fabricated interior pointer whose bytes happen
    /// to form a live header cannot be told apart from a real block.
    pub fn free(&mut self, ptr: NonNull<u8>) -> PoolResult<()> {
        let addr = ptr.as_ptr() as usize;

        if let Some(block) = self.oversized.remove(&addr) {
            return self.free_oversized(ptr, &block);
        }

        let Some((_, offset)) = self.index.locate(addr) else {
            #[cfg(feature = "logging")]
            tracing::warn!(ptr = addr, "rejected free of foreign pointer");
            return Err(PoolError::invalid_pointer(addr));
        };
        if offset < HEADER_SIZE || !is_aligned(offset, ALIGNMENT) {
            return Err(PoolError::invalid_pointer(addr));
        }

        // SAFETY: locate() answers only within the page's carved extent, so
        // offset >= HEADER_SIZE puts the whole header inside carved bytes,
        // which refill_class initialized.
        let header = unsafe { header_ptr(ptr).read() };
        match header.state {
            LIVE_MAGIC => {}
            FREE_MAGIC => {
                #[cfg(feature = "logging")]
                tracing::warn!(ptr = addr, "rejected double free");
                return Err(PoolError::double_free(addr));
            }
            _ => return Err(PoolError::invalid_pointer(addr)),
        }

        let size = header.size as usize;
        if size == 0
            || size > MAX_UNIT_SIZE
            || !is_aligned(size, ALIGNMENT)
            || offset + size > self.page_size
        {
            return Err(PoolError::invalid_pointer(addr));
        }

        if let Some(pattern) = self.config.dealloc_pattern {
            // SAFETY: the slot payload spans `size` bytes inside the page.
            unsafe { ptr::write_bytes(ptr.as_ptr(), pattern, size) };
        }
        // SAFETY: same header as above; only the state tag changes.
        unsafe {
            (*header_ptr(ptr)).state = FREE_MAGIC;
        }
        self.free[class_of(size)].push(ptr);
        if self.config.track_stats {
            self.stats.record_free();
        }
        Ok(())
    }

    /// Releases every page and every live oversized block, returning the
    /// pool to its empty state. Idempotent; the pool remains usable and the
    /// next allocation provisions lazily.
    pub fn clear(&mut self) {
        #[cfg(feature = "logging")]
        if !self.pages.is_empty() || !self.oversized.is_empty() {
            tracing::debug!(
                pages = self.pages.len(),
                oversized = self.oversized.len(),
                "clearing variable pool"
            );
        }
        self.release_oversized();
        self.pages.clear();
        self.index.clear();
        self.cursor = 0;
        for stack in &mut self.free {
            stack.clear();
        }
        if self.config.track_stats {
            self.stats.record_reset();
        }
    }

    /// Gross bytes currently reserved for pages, including per-page
    /// bookkeeping. This is a reservation figure (pages are never partially
    /// released), not bytes in use by live blocks; oversized blocks are not
    /// pages and are reported via [`PoolStats::oversized_bytes`] instead.
    pub fn mem_used(&self) -> usize {
        self.pages.len() * (self.page_size + mem::size_of::<Page>())
    }

    /// Number of pages currently held
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Total blocks currently sitting on class free stacks
    pub fn free_blocks(&self) -> usize {
        self.free.iter().map(Vec::len).sum()
    }

    /// Effective page size after clamping
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns reference to statistics
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Serves a request larger than every size class from the system
    /// allocator, with the usual header in front and a registry entry for
    /// validation on free.
    fn malloc_oversized(&mut self, size: usize) -> PoolResult<NonNull<u8>> {
        let rounded = size
            .checked_next_multiple_of(ALIGNMENT)
            .ok_or_else(|| PoolError::out_of_memory(size))?;
        // The header's size field is 4 bytes wide.
        let Ok(size32) = u32::try_from(rounded) else {
            return Err(PoolError::out_of_memory(size));
        };
        let total = rounded
            .checked_add(HEADER_SIZE)
            .ok_or_else(|| PoolError::out_of_memory(size))?;
        let layout = Layout::from_size_align(total, ALIGNMENT)
            .map_err(|_| PoolError::out_of_memory(size))?;

        // SAFETY: layout has non-zero size (total >= HEADER_SIZE + size).
        let raw = unsafe { alloc(layout) };
        let Some(raw) = NonNull::new(raw) else {
            if self.config.track_stats {
                self.stats.record_failure();
            }
            #[cfg(feature = "logging")]
            tracing::warn!(size = total, "oversized allocation failed");
            return Err(PoolError::out_of_memory(total));
        };

        // SAFETY: total = HEADER_SIZE + rounded, so the payload pointer and
        // the header both lie inside the allocation.
        let block = unsafe { NonNull::new_unchecked(raw.as_ptr().add(HEADER_SIZE)) };
        unsafe {
            header_ptr(block).write(BlockHeader {
                size: size32,
                state: LIVE_MAGIC,
            });
        }
        if let Some(pattern) = self.config.alloc_pattern {
            // SAFETY: the payload spans `rounded` bytes.
            unsafe { ptr::write_bytes(block.as_ptr(), pattern, rounded) };
        }

        self.oversized.insert(block.as_ptr() as usize, Oversized { layout });
        if self.config.track_stats {
            self.stats.record_alloc();
            self.stats.record_oversized_alloc(rounded);
        }
        #[cfg(feature = "logging")]
        tracing::trace!(size = rounded, "served oversized block from the system allocator");
        Ok(block)
    }

    fn free_oversized(&mut self, ptr: NonNull<u8>, block: &Oversized) -> PoolResult<()> {
        // The registry, not the in-memory header, is the source of truth
        // for the release size.
        let bytes = block.layout.size() - HEADER_SIZE;
        // SAFETY: a registry hit means malloc_oversized created this block
        // with block.layout and wrote its header HEADER_SIZE bytes before
        // the payload.
        unsafe {
            debug_assert_eq!((*header_ptr(ptr)).state, LIVE_MAGIC);
            debug_assert_eq!((*header_ptr(ptr)).size as usize, bytes);
        }
        if let Some(pattern) = self.config.dealloc_pattern {
            // SAFETY: the payload spans `bytes` bytes.
            unsafe { ptr::write_bytes(ptr.as_ptr(), pattern, bytes) };
        }
        // SAFETY: undoing malloc_oversized's allocation with its layout.
        unsafe { dealloc(ptr.as_ptr().sub(HEADER_SIZE), block.layout) };
        if self.config.track_stats {
            self.stats.record_free();
            self.stats.record_oversized_free(bytes);
        }
        Ok(())
    }

    /// Carves a full batch of `class` slots out of the current page. A page
    /// tail too small for a full batch is abandoned and a fresh page takes
    /// over; page sizing guarantees a fresh page always fits one batch.
    fn refill_class(&mut self, class: usize) -> PoolResult<()> {
        let unit = class_unit(class);
        let stride = HEADER_SIZE + unit;
        // validate() bounds refill_count * (HEADER_SIZE + MAX_UNIT_SIZE).
        let batch_bytes = stride * self.config.refill_count;

        if self.pages.is_empty() || self.page_size - self.cursor < batch_bytes {
            self.provision_page()?;
        }
        debug_assert!(self.page_size - self.cursor >= batch_bytes);

        let Some(page) = self.pages.last() else {
            return Err(PoolError::out_of_memory(batch_bytes));
        };
        let base = page.start();
        let base_addr = page.base_addr();
        // SAFETY: cursor + batch_bytes <= page_size (asserted above), so
        // the whole batch lies inside the page buffer.
        // Zeroing first keeps every carved byte initialized; free() reads
        // headers through unverified in-extent pointers and needs that.
        unsafe { ptr::write_bytes(base.add(self.cursor), 0, batch_bytes) };
        for _ in 0..self.config.refill_count {
            // SAFETY: cursor + stride <= page_size, so both header and
            // payload stay inside the page buffer.
            let block = unsafe { NonNull::new_unchecked(base.add(self.cursor + HEADER_SIZE)) };
            unsafe {
                header_ptr(block).write(BlockHeader {
                    size: unit as u32,
                    state: FREE_MAGIC,
                });
            }
            self.free[class].push(block);
            self.cursor += stride;
        }
        self.index.extend(base_addr, self.cursor);

        if self.config.track_stats {
            self.stats.record_refill();
        }
        #[cfg(feature = "logging")]
        tracing::trace!(
            class,
            unit,
            batch = self.config.refill_count,
            "refilled size-class free list"
        );
        Ok(())
    }

    /// Appends a fresh bump page and rewinds the carve cursor.
    fn provision_page(&mut self) -> PoolResult<()> {
        let page = match Page::new(self.page_size) {
            Ok(page) => page,
            Err(err) => {
                if self.config.track_stats {
                    self.stats.record_failure();
                }
                #[cfg(feature = "logging")]
                tracing::warn!(size = self.page_size, "page provisioning failed");
                return Err(err);
            }
        };
        #[cfg(feature = "logging")]
        tracing::trace!(
            number = self.pages.len(),
            size = self.page_size,
            "provisioned bump page"
        );
        // Nothing is carved yet; refills grow the answered extent.
        self.index.insert(&page, self.pages.len() as u32, 0);
        self.pages.push(page);
        self.cursor = 0;
        if self.config.track_stats {
            self.stats.record_page();
        }
        Ok(())
    }

    fn release_oversized(&mut self) {
        for (addr, block) in self.oversized.drain() {
            // SAFETY: every registry entry was allocated by malloc_oversized
            // with block.layout; addr points at its payload, HEADER_SIZE
            // bytes past the allocation start.
            unsafe {
                dealloc((addr as *mut u8).sub(HEADER_SIZE), block.layout);
            }
        }
    }
}

impl Drop for VariablePool {
    fn drop(&mut self) {
        // Pages release themselves; oversized blocks need the registry.
        self.release_oversized();
    }
}

impl MemoryUsage for VariablePool {
    fn used_memory(&self) -> usize {
        self.mem_used()
    }

    fn available_memory(&self) -> Option<usize> {
        // The pool grows on demand; there is no fixed capacity to report.
        None
    }
}
