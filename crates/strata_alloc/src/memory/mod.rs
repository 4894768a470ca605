//! # Pool Memory
//!
//! The three layers under the allocator facade:
//!
//! ```text
//!   MemoryBlocks (one per affinity)
//!     └── MemoryBlock (one raw buffer, keyed by base address)
//!           └── SlotTable (free/used spans inside the buffer)
//! ```

mod block;
mod chain;
mod slots;

pub use block::{block_alignment, MemoryBlock, MAX_SCALAR_ALIGNMENT, MIN_BLOCK_ALIGNMENT};
pub use chain::{BlockStats, ChainStats, MemoryBlocks};
pub use slots::SlotTable;

/// Outcome of returning a pointer to a block or chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deallocation {
    /// The span was returned to its slot table.
    Released,
    /// The pointer lies inside an owned buffer but `(pointer, size)` is not a
    /// live reservation. Nothing was modified.
    Rejected,
    /// No owned buffer contains the pointer.
    Foreign,
}

impl Deallocation {
    /// Whether the span was returned.
    #[inline]
    #[must_use]
    pub const fn is_released(self) -> bool {
        matches!(self, Self::Released)
    }
}
