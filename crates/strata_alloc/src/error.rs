//! # Allocator Error Types
//!
//! Errors raised while configuring the allocator or creating blocks.
//!
//! The hot entry points (`allocate` / `deallocate`) never return these to
//! client code: a failed allocation is a null pointer and a failed
//! deallocation is `false`.

use thiserror::Error;

/// Errors that can occur while building or configuring an allocator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    /// Alignment is zero or not a power of two.
    #[error("invalid alignment {0}: must be a non-zero power of two")]
    InvalidAlignment(usize),

    /// Block size of zero for an affinity.
    #[error("invalid block size {size} for affinity {affinity}")]
    InvalidBlockSize {
        /// The affinity being configured.
        affinity: u32,
        /// The rejected size.
        size: usize,
    },

    /// Affinity above [`crate::Affinity::MAX`].
    #[error("affinity {0} is above the highest chain slot")]
    AffinityOutOfRange(u32),

    /// Size/alignment pair cannot be expressed as a memory layout.
    #[error("layout overflow: {size} bytes at alignment {alignment}")]
    LayoutOverflow {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        alignment: usize,
    },

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read.
    #[error("failed to read configuration {path}: {reason}")]
    ConfigRead {
        /// Path that was read.
        path: String,
        /// Underlying IO error text.
        reason: String,
    },
}

/// Result type for allocator configuration operations.
pub type AllocResult<T> = Result<T, AllocatorError>;
