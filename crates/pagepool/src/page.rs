//! Raw page buffers and the address index that maps freed pointers back to
//! their owning page.
//!
//! # Safety
//!
//! This module owns all direct traffic with the global allocator:
//! - Pages are allocated via std::alloc::alloc with an explicit Layout
//! - Pages are deallocated exactly once, in Drop
//! - Provisioning is fallible; a null return surfaces as an error, never
//!   an abort
//!
//! ## Invariants
//!
//! - A page buffer is aligned to `ALIGNMENT` and never reallocated or moved
//! - `PageIndex` entries are kept sorted by base address and mirror the
//!   owning pool's page list exactly (one entry per live page)
//! - An entry's answered extent never exceeds its page capacity and only
//!   grows between clears
//! - `PageIndex::locate` performs no memory access through the queried
//!   address, so foreign pointers are rejected without undefined behavior

use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use crate::ALIGNMENT;
use crate::error::{PoolError, PoolResult};

/// A fixed-capacity raw byte buffer owned by a pool.
///
/// Pages are append-only from the pool's point of view: once provisioned
/// they stay at their address until the pool clears or drops, which makes
/// every pointer handed out from a page stable for the page's lifetime.
#[derive(Debug)]
pub(crate) struct Page {
    ptr: NonNull<u8>,
    capacity: usize,
}

impl Page {
    /// Allocates a page of `size` bytes aligned to [`ALIGNMENT`].
    pub(crate) fn new(size: usize) -> PoolResult<Self> {
        debug_assert!(size > 0);

        let layout = Layout::from_size_align(size, ALIGNMENT)
            .map_err(|_| PoolError::out_of_memory(size))?;

        // SAFETY: Allocating page memory via the global allocator.
        // - layout has non-zero size (asserted above)
        // - ALIGNMENT is a power of two
        // - alloc returns null on failure (handled below)
        let ptr = unsafe { alloc(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| PoolError::out_of_memory(size))?;

        Ok(Self {
            ptr,
            capacity: size,
        })
    }

    /// First byte of the page buffer.
    #[inline]
    pub(crate) fn start(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Buffer capacity in bytes.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Base address of the buffer, for index bookkeeping.
    #[inline]
    pub(crate) fn base_addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        // SAFETY: Deallocating page memory.
        // - ptr was allocated via alloc() in new() with the same layout
        // - capacity and ALIGNMENT match the original allocation
        // - This is called exactly once (Drop guarantee)
        unsafe {
            dealloc(
                self.ptr.as_ptr(),
                Layout::from_size_align_unchecked(self.capacity, ALIGNMENT),
            );
        }
    }
}

/// Address-sorted interval index over a pool's pages.
///
/// Resolves which page owns a raw address by binary search over the page
/// base addresses. Freeing therefore costs O(log pages) instead of a walk
/// over the page list, and an address outside every answered extent is
/// rejected with `None` before anything is read through it.
#[derive(Debug, Default)]
pub(crate) struct PageIndex {
    /// Entries sorted by `base`. Page intervals never overlap, so the
    /// predecessor of an address is the only candidate owner.
    entries: Vec<IndexEntry>,
}

#[derive(Debug)]
struct IndexEntry {
    base: usize,
    /// Bytes past `base` this entry answers for, at most the page capacity.
    len: usize,
    page: u32,
}

impl PageIndex {
    /// Registers a freshly provisioned page under the pool's page number.
    ///
    /// `len` is the extent [`Self::locate`] answers for. Pools that slot an
    /// entire page up front register the full capacity; pools that carve
    /// incrementally register zero and grow it via [`Self::extend`].
    pub(crate) fn insert(&mut self, page: &Page, number: u32, len: usize) {
        let base = page.base_addr();
        debug_assert!(len <= page.capacity());
        let at = self.entries.partition_point(|e| e.base < base);
        debug_assert!(
            at == self.entries.len() || self.entries[at].base >= base + page.capacity(),
            "page intervals must not overlap"
        );
        self.entries.insert(at, IndexEntry { base, len, page: number });
    }

    /// Grows the answered extent of the page based at `base`.
    pub(crate) fn extend(&mut self, base: usize, len: usize) {
        let at = self.entries.partition_point(|e| e.base < base);
        debug_assert!(
            self.entries.get(at).is_some_and(|e| e.base == base),
            "extend targets a registered page"
        );
        debug_assert!(
            self.entries.get(at + 1).is_none_or(|next| base + len <= next.base),
            "page intervals must not overlap"
        );
        if let Some(entry) = self.entries.get_mut(at) {
            if entry.base == base {
                debug_assert!(len >= entry.len, "extents never shrink");
                entry.len = len;
            }
        }
    }

    /// Maps an address to `(page number, byte offset into that page)`.
    ///
    /// Returns `None` for any address that falls outside every registered
    /// extent.
    #[inline]
    pub(crate) fn locate(&self, addr: usize) -> Option<(u32, usize)> {
        let at = self.entries.partition_point(|e| e.base <= addr);
        let entry = &self.entries[at.checked_sub(1)?];
        let offset = addr - entry.base;
        (offset < entry.len).then_some((entry.page, offset))
    }

    /// Drops every entry, mirroring the pool releasing its pages.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::is_aligned;

    #[test]
    fn page_buffer_is_aligned() {
        let page = Page::new(4096).unwrap();
        assert!(is_aligned(page.base_addr(), ALIGNMENT));
        assert_eq!(page.capacity(), 4096);
    }

    #[test]
    fn page_memory_is_writable() {
        let page = Page::new(256).unwrap();
        // SAFETY: the buffer spans 256 bytes and is exclusively ours.
        unsafe {
            std::ptr::write_bytes(page.start(), 0xAB, 256);
            assert_eq!(*page.start(), 0xAB);
            assert_eq!(*page.start().add(255), 0xAB);
        }
    }

    #[test]
    fn locate_resolves_every_page() {
        let pages: Vec<Page> = (0..4).map(|_| Page::new(512).unwrap()).collect();
        let mut index = PageIndex::default();
        for (number, page) in pages.iter().enumerate() {
            index.insert(page, number as u32, page.capacity());
        }
        assert_eq!(index.len(), 4);

        for (number, page) in pages.iter().enumerate() {
            // First byte, an interior byte, and the last byte all resolve.
            assert_eq!(index.locate(page.base_addr()), Some((number as u32, 0)));
            assert_eq!(index.locate(page.base_addr() + 100), Some((number as u32, 100)));
            assert_eq!(
                index.locate(page.base_addr() + 511),
                Some((number as u32, 511))
            );
            // One past the end never resolves to this page (it may be the
            // base of an adjacent one).
            let past = index.locate(page.base_addr() + 512);
            assert!(past.is_none() || past.map(|(n, _)| n as usize) != Some(number));
        }
    }

    #[test]
    fn locate_rejects_foreign_addresses() {
        let page = Page::new(1024).unwrap();
        let mut index = PageIndex::default();
        index.insert(&page, 0, page.capacity());

        let local = 0usize;
        assert_eq!(index.locate(&local as *const usize as usize), None);
        assert_eq!(index.locate(page.base_addr().wrapping_sub(1)), None);
        assert_eq!(index.locate(0), None);
    }

    #[test]
    fn extend_grows_the_answered_extent() {
        let page = Page::new(1024).unwrap();
        let mut index = PageIndex::default();
        index.insert(&page, 0, 0);

        // Nothing answered until the extent grows.
        assert_eq!(index.locate(page.base_addr()), None);
        assert_eq!(index.locate(page.base_addr() + 64), None);

        index.extend(page.base_addr(), 128);
        assert_eq!(index.locate(page.base_addr() + 64), Some((0, 64)));
        assert_eq!(index.locate(page.base_addr() + 127), Some((0, 127)));
        assert_eq!(index.locate(page.base_addr() + 128), None);

        index.extend(page.base_addr(), 256);
        assert_eq!(index.locate(page.base_addr() + 128), Some((0, 128)));
        assert_eq!(index.locate(page.base_addr() + 256), None);
    }

    #[test]
    fn clear_forgets_all_pages() {
        let page = Page::new(1024).unwrap();
        let mut index = PageIndex::default();
        index.insert(&page, 0, page.capacity());
        index.clear();
        assert_eq!(index.locate(page.base_addr()), None);
        assert_eq!(index.len(), 0);
    }
}
