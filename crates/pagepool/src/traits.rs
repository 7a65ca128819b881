//! Capacity-reporting traits implemented by both pools.

/// Memory usage tracking trait
///
/// Implemented by pools that can report how much memory they currently hold.
/// Both pools in this crate grow on demand and never release pages before a
/// clear, so `used_memory` reports the gross page reservation;
/// `available_memory` reports remaining capacity on existing pages where
/// that is meaningful and `None` where growth makes it unbounded.
pub trait MemoryUsage {
    /// Get currently used memory in bytes
    fn used_memory(&self) -> usize;

    /// Get available memory in bytes (if known)
    fn available_memory(&self) -> Option<usize>;

    /// Get total memory capacity in bytes (if known)
    fn total_memory(&self) -> Option<usize> {
        match (self.used_memory(), self.available_memory()) {
            (used, Some(available)) => Some(used + available),
            _ => None,
        }
    }

    /// Returns memory usage as a percentage (0.0 to 100.0)
    ///
    /// Returns `None` if total memory is unknown or zero. Useful for
    /// implementing memory pressure warnings.
    fn memory_usage_percent(&self) -> Option<f32> {
        self.total_memory().and_then(|total| {
            if total == 0 {
                Some(0.0)
            } else {
                Some((self.used_memory() as f32 / total as f32) * 100.0)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bounded;

    impl MemoryUsage for Bounded {
        fn used_memory(&self) -> usize {
            256
        }

        fn available_memory(&self) -> Option<usize> {
            Some(768)
        }
    }

    struct Unbounded;

    impl MemoryUsage for Unbounded {
        fn used_memory(&self) -> usize {
            4096
        }

        fn available_memory(&self) -> Option<usize> {
            None
        }
    }

    #[test]
    fn derived_totals() {
        assert_eq!(Bounded.total_memory(), Some(1024));
        assert_eq!(Bounded.memory_usage_percent(), Some(25.0));
    }

    #[test]
    fn unbounded_reports_unknown() {
        assert_eq!(Unbounded.total_memory(), None);
        assert_eq!(Unbounded.memory_usage_percent(), None);
    }
}
