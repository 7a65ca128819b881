//! Error types for pool operations.

use thiserror::Error;

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors reported by the pool allocators.
///
/// Every failure leaves the pool in its previous valid state; in particular
/// a [`PoolError::OutOfMemory`] from a failed page provisioning is
/// recoverable and the pool keeps serving from whatever it already holds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool configuration failed validation.
    #[error("invalid pool configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with the configuration.
        reason: &'static str,
    },

    /// The system allocator refused a page or oversized-block request.
    #[error("out of memory: failed to provision {size} bytes")]
    OutOfMemory {
        /// Size of the failed request in bytes.
        size: usize,
    },

    /// The pointer does not address a block handed out by this pool.
    #[error("pointer {ptr:#x} does not belong to this pool")]
    InvalidPointer {
        /// The offending address.
        ptr: usize,
    },

    /// The block behind the pointer was already freed.
    #[error("pointer {ptr:#x} was already freed")]
    DoubleFree {
        /// The offending address.
        ptr: usize,
    },
}

impl PoolError {
    /// Create an invalid-configuration error
    pub fn invalid_config(reason: &'static str) -> Self {
        Self::InvalidConfig { reason }
    }

    /// Create an out-of-memory error
    pub fn out_of_memory(size: usize) -> Self {
        Self::OutOfMemory { size }
    }

    /// Create an invalid-pointer error
    pub fn invalid_pointer(ptr: usize) -> Self {
        Self::InvalidPointer { ptr }
    }

    /// Create a double-free error
    pub fn double_free(ptr: usize) -> Self {
        Self::DoubleFree { ptr }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_display() {
        let err = PoolError::invalid_config("unit size must be non-zero");
        assert_eq!(
            err.to_string(),
            "invalid pool configuration: unit size must be non-zero"
        );
    }

    #[test]
    fn out_of_memory_display() {
        let err = PoolError::out_of_memory(65536);
        assert_eq!(err.to_string(), "out of memory: failed to provision 65536 bytes");
    }

    #[test]
    fn pointer_errors_display_hex() {
        let err = PoolError::invalid_pointer(0xdead_beef);
        assert!(err.to_string().contains("0xdeadbeef"));

        let err = PoolError::double_free(0x1000);
        assert!(err.to_string().contains("0x1000"));
        assert!(err.to_string().contains("already freed"));
    }
}
