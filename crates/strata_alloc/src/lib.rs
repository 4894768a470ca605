//! # STRATA Allocator
//!
//! Affinity-partitioned pool allocator for the many small, short- and
//! long-lived objects of a scene graph runtime.
//!
//! ## Architecture Rules
//!
//! 1. **No per-allocation headers** - the owner of a pointer is found by
//!    address: an ordered lookup over block base addresses plus a range check
//! 2. **One mutex** - every chain, block and slot table is mutated under the
//!    allocator's single lock
//! 3. **Blocks never move** - a block's buffer keeps its address until the
//!    block is pruned
//! 4. **Allocate fails loudly, deallocate fails quietly** - a failed
//!    allocation is a null pointer, a failed deallocation is `false` and a
//!    one-time leak
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_alloc::{Affinity, Allocator};
//!
//! let allocator = Allocator::instance();
//! let ptr = allocator.allocate(128, Affinity::NODES).expect("out of memory");
//! // ... construct a node in the 128 bytes ...
//! unsafe { allocator.deallocate(ptr, 128) };
//!
//! // Explicit compaction step, e.g. after unloading a scene
//! let released = allocator.delete_empty_memory_blocks();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod affinity;
pub mod allocator;
pub mod config;
pub mod error;
pub mod memory;

pub use affinity::Affinity;
pub use allocator::{allocate, deallocate, Allocator};
pub use config::{AffinityConfig, AllocatorConfig, FallbackStrategy, MemoryTracking};
pub use error::{AllocResult, AllocatorError};
pub use memory::{BlockStats, ChainStats, Deallocation, MemoryBlock, MemoryBlocks, SlotTable};
