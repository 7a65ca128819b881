//! Pool statistics tracking
//!
//! Counters are plain fields: both pools operate through `&mut self`, so
//! there is no concurrent observer to guard against. The owning pool only
//! records into them when its config has `track_stats` set.

/// Statistics for a pool allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of successful allocations
    pub allocations: u64,
    /// Total number of successful frees
    pub frees: u64,
    /// Number of failed allocations (page or oversized provisioning refused)
    pub failed_allocations: u64,
    /// Number of free-list refills carved out of pages
    pub refills: u64,
    /// Number of pages provisioned since the last reset
    pub pages_provisioned: u64,
    /// Blocks currently handed out to callers
    pub live_blocks: u64,
    /// Peak of `live_blocks`
    pub peak_live_blocks: u64,
    /// Oversized allocations currently live
    pub oversized_blocks: u64,
    /// Payload bytes currently held by live oversized allocations
    pub oversized_bytes: usize,
    /// Number of times the pool was cleared
    pub resets: u64,
}

impl PoolStats {
    /// Creates a new empty stats object
    pub const fn new() -> Self {
        Self {
            allocations: 0,
            frees: 0,
            failed_allocations: 0,
            refills: 0,
            pages_provisioned: 0,
            live_blocks: 0,
            peak_live_blocks: 0,
            oversized_blocks: 0,
            oversized_bytes: 0,
            resets: 0,
        }
    }

    /// Fraction of allocation attempts that succeeded (0.0 to 1.0)
    pub fn allocation_efficiency(&self) -> f64 {
        let attempts = self.allocations + self.failed_allocations;
        if attempts > 0 {
            self.allocations as f64 / attempts as f64
        } else {
            1.0
        }
    }

    /// Balance of allocations vs frees; positive means blocks are still out
    pub fn allocation_balance(&self) -> i64 {
        self.allocations as i64 - self.frees as i64
    }

    pub(crate) fn record_alloc(&mut self) {
        self.allocations += 1;
        self.live_blocks += 1;
        if self.live_blocks > self.peak_live_blocks {
            self.peak_live_blocks = self.live_blocks;
        }
    }

    pub(crate) fn record_free(&mut self) {
        self.frees += 1;
        self.live_blocks = self.live_blocks.saturating_sub(1);
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed_allocations += 1;
    }

    pub(crate) fn record_refill(&mut self) {
        self.refills += 1;
    }

    pub(crate) fn record_page(&mut self) {
        self.pages_provisioned += 1;
    }

    pub(crate) fn record_oversized_alloc(&mut self, bytes: usize) {
        self.oversized_blocks += 1;
        self.oversized_bytes += bytes;
    }

    pub(crate) fn record_oversized_free(&mut self, bytes: usize) {
        self.oversized_blocks = self.oversized_blocks.saturating_sub(1);
        self.oversized_bytes = self.oversized_bytes.saturating_sub(bytes);
    }

    /// Zeroes every counter and bumps the reset count
    pub(crate) fn record_reset(&mut self) {
        let resets = self.resets;
        *self = Self::new();
        self.resets = resets + 1;
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Pool statistics:")?;
        writeln!(f, "  Allocations: {}", self.allocations)?;
        writeln!(f, "  Frees: {}", self.frees)?;
        writeln!(f, "  Failed allocations: {}", self.failed_allocations)?;
        writeln!(f, "  Live blocks: {} (peak {})", self.live_blocks, self.peak_live_blocks)?;
        writeln!(f, "  Refills: {}", self.refills)?;
        writeln!(f, "  Pages provisioned: {}", self.pages_provisioned)?;
        writeln!(
            f,
            "  Oversized: {} blocks, {} bytes",
            self.oversized_blocks, self.oversized_bytes
        )?;
        writeln!(f, "  Resets: {}", self.resets)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_and_peak_tracking() {
        let mut stats = PoolStats::new();
        stats.record_alloc();
        stats.record_alloc();
        stats.record_alloc();
        stats.record_free();

        assert_eq!(stats.allocations, 3);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.live_blocks, 2);
        assert_eq!(stats.peak_live_blocks, 3);
        assert_eq!(stats.allocation_balance(), 2);
    }

    #[test]
    fn reset_keeps_reset_count() {
        let mut stats = PoolStats::new();
        stats.record_alloc();
        stats.record_page();
        stats.record_reset();

        assert_eq!(stats.allocations, 0);
        assert_eq!(stats.pages_provisioned, 0);
        assert_eq!(stats.resets, 1);

        stats.record_reset();
        assert_eq!(stats.resets, 2);
    }

    #[test]
    fn oversized_accounting() {
        let mut stats = PoolStats::new();
        stats.record_oversized_alloc(4096);
        stats.record_oversized_alloc(1024);
        stats.record_oversized_free(4096);

        assert_eq!(stats.oversized_blocks, 1);
        assert_eq!(stats.oversized_bytes, 1024);
    }

    #[test]
    fn efficiency_with_failures() {
        let mut stats = PoolStats::new();
        for _ in 0..8 {
            stats.record_alloc();
        }
        stats.record_failure();
        stats.record_failure();

        assert_eq!(stats.allocation_efficiency(), 0.8);
    }

    #[test]
    fn display_format() {
        let mut stats = PoolStats::new();
        stats.record_alloc();
        stats.record_oversized_alloc(512);

        let text = format!("{stats}");
        assert!(text.contains("Allocations: 1"));
        assert!(text.contains("512 bytes"));
    }
}
