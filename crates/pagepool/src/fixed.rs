//! Fixed-size pool allocator
//!
//! Serves exactly one unit size per pool instance. Every page is partitioned
//! into `page_size / unit` equal slots up front; each page keeps its own
//! free-slot stack plus an occupancy bitmap, so allocation is a pop, freeing
//! is a validated push, and neither ever walks slot memory. Requests scan
//! pages newest-first and provision a fresh page only when every page is
//! full. Pages are released in bulk by [`FixedPool::clear`], never one by
//! one.
//!
//! # Safety
//!
//! Slot addresses are derived only from `page.start() + slot * unit` with
//! `slot < slots_per_page`, so every pointer handed out lies inside a page
//! buffer this pool owns. Freeing revalidates the pointer against the page
//! index and the occupancy bitmap before any slot byte is written.
//!
//! ## Invariants
//!
//! - A slot index is on its page's free stack iff its occupancy bit is clear
//! - `slots_per_page * unit <= page_size`; a page tail smaller than one
//!   unit is never handed out
//! - The page list is append-only between clears; `PageIndex` mirrors it

use std::mem;
use std::ptr::{self, NonNull};

use crate::error::{PoolError, PoolResult};
use crate::page::{Page, PageIndex};
use crate::stats::PoolStats;
use crate::traits::MemoryUsage;
use crate::utils::align_up;
use crate::{ALIGNMENT, MAX_PAGE_SIZE, MIN_PAGE_SIZE};

/// Configuration for the fixed-size pool
#[derive(Debug, Clone)]
pub struct FixedConfig {
    /// Bytes per unit, before rounding up to [`ALIGNMENT`]. At most
    /// [`MAX_PAGE_SIZE`].
    pub unit_size: usize,

    /// Bytes per page. Clamped up to [`MIN_PAGE_SIZE`] and to one rounded
    /// unit, then rounded to [`ALIGNMENT`]. At most [`MAX_PAGE_SIZE`].
    pub page_size: usize,

    /// Enable statistics tracking
    pub track_stats: bool,

    /// Fill pattern written into freshly served memory
    pub alloc_pattern: Option<u8>,

    /// Fill pattern written into freed memory
    pub dealloc_pattern: Option<u8>,
}

impl FixedConfig {
    /// Default configuration for the given unit size
    pub fn new(unit_size: usize) -> Self {
        Self {
            unit_size,
            page_size: 64 * 1024, // 64KB
            track_stats: cfg!(debug_assertions),
            alloc_pattern: if cfg!(debug_assertions) { Some(0xBB) } else { None },
            dealloc_pattern: if cfg!(debug_assertions) { Some(0xDD) } else { None },
        }
    }

    /// Production configuration - optimized for performance
    pub fn production(unit_size: usize) -> Self {
        Self {
            unit_size,
            page_size: 64 * 1024,
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Debug configuration - optimized for catching misuse
    pub fn debug(unit_size: usize) -> Self {
        Self {
            unit_size,
            page_size: 16 * 1024, // small pages surface growth bugs sooner
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

    /// Enables/disables statistics tracking
    #[must_use = "builder methods must be chained or built"]
    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.track_stats = enabled;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> PoolResult<()> {
        if self.unit_size == 0 {
            return Err(PoolError::invalid_config("unit size must be at least 1"));
        }
        if self.unit_size > MAX_PAGE_SIZE {
            return Err(PoolError::invalid_config(
                "unit size exceeds the maximum allocation size",
            ));
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(PoolError::invalid_config(
                "page size exceeds the maximum allocation size",
            ));
        }
        Ok(())
    }
}

/// One page plus its slot bookkeeping.
#[derive(Debug)]
struct PageSlots {
    page: Page,

    /// Free slot indices, LIFO
    free: Vec<u32>,

    /// One bit per slot, set while the slot is handed out
    occupied: Vec<u64>,
}

impl PageSlots {
    fn new(page_size: usize, slots: usize) -> PoolResult<Self> {
        let page = Page::new(page_size)?;
        // Reversed so slot 0 is the first one popped.
        let free: Vec<u32> = (0..slots as u32).rev().collect();
        let occupied = vec![0u64; slots.div_ceil(64)];
        Ok(Self { page, free, occupied })
    }

    #[inline]
    fn is_occupied(&self, slot: u32) -> bool {
        self.occupied[(slot / 64) as usize] & (1 << (slot % 64)) != 0
    }

    #[inline]
    fn set_occupied(&mut self, slot: u32) {
        self.occupied[(slot / 64) as usize] |= 1 << (slot % 64);
    }

    #[inline]
    fn clear_occupied(&mut self, slot: u32) {
        self.occupied[(slot / 64) as usize] &= !(1 << (slot % 64));
    }
}

/// Pool allocator for blocks of a single size
///
/// # Memory Layout
/// ```text
/// page: [slot 0][slot 1][slot 2] ... [slot n-1][tail < unit]
/// ```
///
/// Slot `i` lives at byte offset `i * unit` inside its page. Freed slots go
/// back onto their own page's stack, so reuse is LIFO per page.
#[derive(Debug)]
pub struct FixedPool {
    /// Unit size after rounding up to [`ALIGNMENT`]
    unit: usize,

    /// Effective page size after clamping
    page_size: usize,

    /// Slots carved out of every page
    slots_per_page: usize,

    /// Pages with their slot bookkeeping, oldest first
    pages: Vec<PageSlots>,

    /// Address index mirroring `pages`
    index: PageIndex,

    /// Configuration
    config: FixedConfig,

    /// Statistics (recorded only when `config.track_stats` is set)
    stats: PoolStats,
}

impl FixedPool {
    /// Creates a pool and provisions its first page.
    ///
    /// The unit size is rounded up to [`ALIGNMENT`]; the page size is
    /// clamped so every page holds at least one slot. Fails on an invalid
    /// configuration or if the initial page cannot be provisioned.
    pub fn new(config: FixedConfig) -> PoolResult<Self> {
        config.validate()?;

        // validate() caps both sizes at MAX_PAGE_SIZE, so the round-ups
        // cannot overflow.
        let unit = align_up(config.unit_size, ALIGNMENT);
        let page_size = align_up(config.page_size.max(MIN_PAGE_SIZE), ALIGNMENT).max(unit);
        let slots_per_page = page_size / unit;
        // Slot indices are u32 on the free stacks and in the bitmap.
        if slots_per_page > u32::MAX as usize {
            return Err(PoolError::invalid_config(
                "page holds more slots than the pool can index",
            ));
        }

        let mut pool = Self {
            unit,
            page_size,
            slots_per_page,
            pages: Vec::new(),
            index: PageIndex::default(),
            config,
            stats: PoolStats::new(),
        };
        pool.provision_page()?;
        Ok(pool)
    }

    /// Creates a pool with default config for the given unit size
    pub fn with_unit_size(unit_size: usize) -> PoolResult<Self> {
        Self::new(FixedConfig::new(unit_size))
    }

    /// Creates a pool with production config
    pub fn production(unit_size: usize) -> PoolResult<Self> {
        Self::new(FixedConfig::production(unit_size))
    }

    /// Creates a pool with debug config
    pub fn debug(unit_size: usize) -> PoolResult<Self> {
        Self::new(FixedConfig::debug(unit_size))
    }

    /// Allocates one unit.
    ///
    /// Pages are scanned newest-first for a free slot; a fresh page is
    /// provisioned only when every page is full. Fails only if that
    /// provisioning fails, leaving the pool as it was.
    pub fn malloc(&mut self) -> PoolResult<NonNull<u8>> {
        for page_no in (0..self.pages.len()).rev() {
            if let Some(ptr) = self.pop_slot(page_no) {
                if self.config.track_stats {
                    self.stats.record_alloc();
                }
                return Ok(ptr);
            }
        }

        self.provision_page()?;
        let Some(ptr) = self.pop_slot(self.pages.len() - 1) else {
            // A fresh page always holds at least one slot.
            return Err(PoolError::out_of_memory(self.unit));
        };
        if self.config.track_stats {
            self.stats.record_alloc();
        }
        Ok(ptr)
    }

    /// Returns a unit to its page's free stack.
    ///
    /// A pointer outside every page, or not on a slot boundary, is rejected
    /// with [`PoolError::InvalidPointer`]; a slot freed twice with
    /// [`PoolError::DoubleFree`].
    pub fn free(&mut self, ptr: NonNull<u8>) -> PoolResult<()> {
        let addr = ptr.as_ptr() as usize;
        let Some((page_no, offset)) = self.index.locate(addr) else {
            #[cfg(feature = "logging")]
            tracing::warn!(ptr = addr, "rejected free of foreign pointer");
            return Err(PoolError::invalid_pointer(addr));
        };

        let slot = offset / self.unit;
        // A pointer into the page tail or the middle of a slot never came
        // from malloc.
        if slot >= self.slots_per_page || offset % self.unit != 0 {
            return Err(PoolError::invalid_pointer(addr));
        }
        let slot = slot as u32;

        let slots = &mut self.pages[page_no as usize];
        if !slots.is_occupied(slot) {
            #[cfg(feature = "logging")]
            tracing::warn!(ptr = addr, slot, "rejected double free");
            return Err(PoolError::double_free(addr));
        }
        slots.clear_occupied(slot);
        if let Some(pattern) = self.config.dealloc_pattern {
            // SAFETY: slot < slots_per_page, so the slot spans `unit` bytes
            // inside the page buffer.
            unsafe { ptr::write_bytes(ptr.as_ptr(), pattern, self.unit) };
        }
        slots.free.push(slot);
        if self.config.track_stats {
            self.stats.record_free();
        }
        Ok(())
    }

    /// Releases every page, returning the pool to its empty state. The unit
    /// size is retained; the next allocation provisions lazily.
    pub fn clear(&mut self) {
        #[cfg(feature = "logging")]
        if !self.pages.is_empty() {
            tracing::debug!(pages = self.pages.len(), "clearing fixed pool");
        }
        self.pages.clear();
        self.index.clear();
        if self.config.track_stats {
            self.stats.record_reset();
        }
    }

    /// Gross bytes currently reserved for pages, including per-page
    /// bookkeeping. This is a reservation figure, not bytes in use by live
    /// units.
    pub fn mem_used(&self) -> usize {
        self.pages.len() * (self.page_size + mem::size_of::<PageSlots>())
    }

    /// Unit size after rounding
    pub fn unit_size(&self) -> usize {
        self.unit
    }

    /// Effective page size after clamping
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Slots carved out of every page
    pub fn slots_per_page(&self) -> usize {
        self.slots_per_page
    }

    /// Number of pages currently held
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Total free slots across all pages
    pub fn free_slots(&self) -> usize {
        self.pages.iter().map(|slots| slots.free.len()).sum()
    }

    /// Returns reference to statistics
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    fn pop_slot(&mut self, page_no: usize) -> Option<NonNull<u8>> {
        let slots = &mut self.pages[page_no];
        let slot = slots.free.pop()?;
        slots.set_occupied(slot);

        let offset = slot as usize * self.unit;
        debug_assert!(offset + self.unit <= self.page_size);
        // SAFETY: slot < slots_per_page, so offset + unit <= page_size and
        // the slot lies inside the page buffer.
        let ptr = unsafe { NonNull::new_unchecked(slots.page.start().add(offset)) };
        if let Some(pattern) = self.config.alloc_pattern {
            // SAFETY: the slot spans `unit` bytes inside the page buffer.
            unsafe { ptr::write_bytes(ptr.as_ptr(), pattern, self.unit) };
        }
        Some(ptr)
    }

    /// Appends a fresh fully-free page.
    fn provision_page(&mut self) -> PoolResult<()> {
        let slots = match PageSlots::new(self.page_size, self.slots_per_page) {
            Ok(slots) => slots,
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
            slots = self.slots_per_page,
            "provisioned slot page"
        );
        // Slot pages are fully partitioned up front, so the whole page is
        // answerable immediately.
        self.index.insert(&slots.page, self.pages.len() as u32, self.page_size);
        self.pages.push(slots);
        if self.config.track_stats {
            self.stats.record_page();
        }
        Ok(())
    }
}

impl MemoryUsage for FixedPool {
    fn used_memory(&self) -> usize {
        self.mem_used()
    }

    fn available_memory(&self) -> Option<usize> {
        // Free slots on existing pages; the pool can grow past this.
        Some(self.free_slots() * self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_unit_size_is_rejected() {
        assert_eq!(
            FixedPool::with_unit_size(0).unwrap_err(),
            PoolError::invalid_config("unit size must be at least 1")
        );
    }

    #[test]
    fn absurd_unit_size_is_rejected() {
        assert_eq!(
            FixedPool::with_unit_size(usize::MAX).unwrap_err(),
            PoolError::invalid_config("unit size exceeds the maximum allocation size")
        );
    }

    #[test]
    fn absurd_page_size_is_rejected() {
        let config = FixedConfig::new(8).with_page_size(usize::MAX);
        assert_eq!(
            FixedPool::new(config).unwrap_err(),
            PoolError::invalid_config("page size exceeds the maximum allocation size")
        );
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn unindexable_slot_counts_are_rejected() {
        // 2^36-byte pages of 8-byte units would need 2^33 slot indices.
        let config = FixedConfig::new(8).with_page_size(1 << 36);
        assert_eq!(
            FixedPool::new(config).unwrap_err(),
            PoolError::invalid_config("page holds more slots than the pool can index")
        );
    }

    #[test]
    fn unit_size_is_rounded_up() {
        let pool = FixedPool::with_unit_size(10).unwrap();
        assert_eq!(pool.unit_size(), 16);
        assert_eq!(pool.slots_per_page(), pool.page_size / pool.unit);
    }

    #[test]
    fn huge_units_get_one_slot_per_page() {
        let pool = FixedPool::with_unit_size(1024 * 1024).unwrap();
        assert_eq!(pool.slots_per_page(), 1);
        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn slots_come_out_in_address_order() {
        let mut pool = FixedPool::with_unit_size(64).unwrap();
        let a = pool.malloc().unwrap();
        let b = pool.malloc().unwrap();
        let c = pool.malloc().unwrap();

        assert_eq!(a.as_ptr() as usize + 64, b.as_ptr() as usize);
        assert_eq!(b.as_ptr() as usize + 64, c.as_ptr() as usize);
        for ptr in [c, b, a] {
            pool.free(ptr).unwrap();
        }
    }

    #[test]
    fn freed_slot_is_reused_first() {
        let mut pool = FixedPool::with_unit_size(48).unwrap();
        let first = pool.malloc().unwrap();
        let _second = pool.malloc().unwrap();

        pool.free(first).unwrap();
        assert_eq!(pool.malloc().unwrap(), first);
    }

    #[test]
    fn misaligned_pointer_is_rejected() {
        let mut pool = FixedPool::with_unit_size(64).unwrap();
        let ptr = pool.malloc().unwrap();

        // SAFETY: one byte past a slot start is still inside the page.
        let inside = unsafe { NonNull::new_unchecked(ptr.as_ptr().add(1)) };
        let addr = inside.as_ptr() as usize;
        assert_eq!(pool.free(inside).unwrap_err(), PoolError::invalid_pointer(addr));
        pool.free(ptr).unwrap();
    }

    #[test]
    fn double_free_is_rejected() {
        let mut pool = FixedPool::with_unit_size(32).unwrap();
        let ptr = pool.malloc().unwrap();
        pool.free(ptr).unwrap();

        let addr = ptr.as_ptr() as usize;
        assert_eq!(pool.free(ptr).unwrap_err(), PoolError::double_free(addr));
    }

    #[test]
    fn clear_then_malloc_reprovisions() {
        let mut pool = FixedPool::with_unit_size(128).unwrap();
        let _ = pool.malloc().unwrap();
        pool.clear();
        assert_eq!(pool.mem_used(), 0);
        assert_eq!(pool.page_count(), 0);

        let ptr = pool.malloc().unwrap();
        assert_eq!(pool.page_count(), 1);
        pool.free(ptr).unwrap();
    }
}
