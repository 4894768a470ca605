//! # Memory Block Chain
//!
//! All blocks serving one affinity.
//!
//! Blocks are keyed by base address so the owner of a pointer is found with
//! one ordered lookup plus a range check. A separate creation-order list
//! drives the allocation scan, newest first, since the newest block is the
//! one most likely to still have room.

use std::collections::BTreeMap;
use std::ptr::NonNull;

use crate::config::MemoryTracking;
use crate::error::{AllocResult, AllocatorError};
use crate::memory::block::MemoryBlock;
use crate::memory::Deallocation;

/// Snapshot of one block's usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockStats {
    /// Base address of the buffer.
    pub base_address: usize,
    /// Capacity in bytes.
    pub capacity: usize,
    /// Bytes currently reserved.
    pub reserved: usize,
    /// Bytes not reserved.
    pub available: usize,
    /// Largest free span.
    pub largest_free_span: usize,
}

/// Snapshot of one chain's usage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainStats {
    /// Display name.
    pub name: String,
    /// Default capacity of new blocks.
    pub block_size: usize,
    /// Alignment of allocations.
    pub alignment: usize,
    /// Per-block usage in address order.
    pub blocks: Vec<BlockStats>,
}

impl ChainStats {
    /// Sum of reserved bytes over all blocks.
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.blocks.iter().map(|b| b.reserved).sum()
    }

    /// Sum of block capacities.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.blocks.iter().map(|b| b.capacity).sum()
    }
}

/// Ordered collection of blocks for one affinity.
#[derive(Debug)]
pub struct MemoryBlocks {
    name: String,
    /// Default capacity of new blocks.
    block_size: usize,
    /// Alignment of every allocation.
    alignment: usize,
    /// Blocks keyed by base address.
    blocks: BTreeMap<usize, MemoryBlock>,
    /// Base addresses in creation order, oldest first.
    creation_order: Vec<usize>,
    /// Key of the block tried first. Not an owner; cleared when pruned.
    latest: Option<usize>,
    tracking: MemoryTracking,
}

impl MemoryBlocks {
    /// Creates an empty chain. No memory is reserved until the first allocation.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        block_size: usize,
        alignment: usize,
        tracking: MemoryTracking,
    ) -> Self {
        let name = name.into();
        if tracking.reports() {
            tracing::info!("MemoryBlocks::new({}, {}, {})", name, block_size, alignment);
        }
        Self {
            name,
            block_size,
            alignment,
            blocks: BTreeMap::new(),
            creation_order: Vec::new(),
            latest: None,
            tracking,
        }
    }

    /// Allocates `size` bytes, growing the chain if no block has room.
    ///
    /// Order: the latest block, then the other blocks newest to oldest, then
    /// a new block of `max(size, block_size)` bytes.
    pub fn allocate(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        let alignment = self.alignment;
        if let Some(block) = self.latest.and_then(|key| self.blocks.get_mut(&key)) {
            if let Some(ptr) = block.allocate(size, alignment) {
                return Ok(ptr);
            }
        }

        for &key in self.creation_order.iter().rev() {
            if Some(key) == self.latest {
                continue;
            }
            let Some(block) = self.blocks.get_mut(&key) else {
                continue;
            };
            if let Some(ptr) = block.allocate(size, alignment) {
                self.latest = Some(key);
                return Ok(ptr);
            }
        }

        let capacity = size.max(self.block_size);
        let mut block = MemoryBlock::new(capacity, self.alignment, self.tracking)?;
        let ptr = block.allocate(size, alignment).ok_or(AllocatorError::LayoutOverflow {
            size,
            alignment,
        })?;

        let key = block.base_address();
        self.blocks.insert(key, block);
        self.creation_order.push(key);
        self.latest = Some(key);

        if self.tracking.reports() {
            tracing::info!(
                "MemoryBlocks::allocate({}) {} allocated in new MemoryBlock of {} bytes",
                size,
                self.name,
                capacity
            );
        }

        Ok(ptr)
    }

    /// Returns an allocation to the block that owns it.
    ///
    /// The candidate owner is the block with the greatest base address not
    /// above `ptr`; it then checks the pointer against its own range.
    pub fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> Deallocation {
        let address = ptr.as_ptr() as usize;
        let outcome = self
            .blocks
            .range_mut(..=address)
            .next_back()
            .map_or(Deallocation::Foreign, |(_, block)| block.deallocate(ptr, size));

        if outcome == Deallocation::Foreign && self.tracking.reports() {
            tracing::info!(
                "MemoryBlocks::deallocate() {} couldn't locate pointer to deallocate {:p}",
                self.name,
                ptr.as_ptr()
            );
        }
        outcome
    }

    /// Drops every block with no live reservations.
    ///
    /// Returns the total capacity released.
    pub fn delete_empty_memory_blocks(&mut self) -> usize {
        if self.tracking.reports() {
            tracing::info!("MemoryBlocks::delete_empty_memory_blocks() {}", self.name);
        }

        let empty: Vec<usize> = self
            .blocks
            .iter()
            .filter(|(_, block)| block.slots().is_empty())
            .map(|(&key, _)| key)
            .collect();

        let mut freed = 0;
        for key in &empty {
            if let Some(block) = self.blocks.remove(key) {
                if self.tracking.reports() {
                    tracing::info!(
                        "    {} removing MemoryBlock {:#x} ({} bytes)",
                        self.name,
                        key,
                        block.capacity()
                    );
                }
                freed += block.capacity();
            }
            if self.latest == Some(*key) {
                self.latest = None;
            }
        }
        self.creation_order.retain(|key| !empty.contains(key));

        freed
    }

    /// Whether any block's buffer contains `ptr`.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.blocks
            .range(..=ptr.as_ptr() as usize)
            .next_back()
            .is_some_and(|(_, block)| block.contains(ptr))
    }

    /// Sum of unreserved bytes.
    #[must_use]
    pub fn total_available_size(&self) -> usize {
        self.blocks.values().map(|b| b.slots().total_available_size()).sum()
    }

    /// Sum of reserved bytes.
    #[must_use]
    pub fn total_reserved_size(&self) -> usize {
        self.blocks.values().map(|b| b.slots().total_reserved_size()).sum()
    }

    /// Sum of block capacities.
    #[must_use]
    pub fn total_memory_size(&self) -> usize {
        self.blocks.values().map(MemoryBlock::capacity).sum()
    }

    /// Display name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the chain.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Default capacity of new blocks.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Changes the capacity of blocks created from now on.
    pub fn set_block_size(&mut self, block_size: usize) {
        self.block_size = block_size;
    }

    /// Alignment of allocations.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Changes the alignment of every later allocation.
    ///
    /// Existing blocks whose buffer is aligned below `alignment` are skipped
    /// until they are pruned.
    pub fn set_alignment(&mut self, alignment: usize) {
        self.alignment = alignment;
    }

    /// Number of live blocks.
    #[inline]
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Blocks in address order.
    pub fn blocks(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.blocks.values()
    }

    /// Base address of the block tried first on allocation.
    #[inline]
    #[must_use]
    pub const fn latest_block_address(&self) -> Option<usize> {
        self.latest
    }

    /// Propagates tracking flags to the chain and every block.
    pub fn set_tracking(&mut self, tracking: MemoryTracking) {
        self.tracking = tracking;
        for block in self.blocks.values_mut() {
            block.set_tracking(tracking);
        }
    }

    /// Usage snapshot.
    #[must_use]
    pub fn stats(&self) -> ChainStats {
        ChainStats {
            name: self.name.clone(),
            block_size: self.block_size,
            alignment: self.alignment,
            blocks: self
                .blocks
                .values()
                .map(|block| BlockStats {
                    base_address: block.base_address(),
                    capacity: block.capacity(),
                    reserved: block.slots().total_reserved_size(),
                    available: block.slots().total_available_size(),
                    largest_free_span: block.slots().maximum_available_space(),
                })
                .collect(),
        }
    }
}
