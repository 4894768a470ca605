//! # Memory Block
//!
//! One raw buffer plus the slot table that carves it up.
//!
//! ## Safety Note
//!
//! The buffer is obtained from `std::alloc` and released in `Drop`; this is
//! the only place in the crate that owns pool memory.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::mem;
use std::ptr::NonNull;

use crate::config::MemoryTracking;
use crate::error::{AllocResult, AllocatorError};
use crate::memory::slots::SlotTable;
use crate::memory::Deallocation;

/// Lower bound for every block's base alignment.
pub const MIN_BLOCK_ALIGNMENT: usize = 16;

/// Largest alignment of any scalar type on this platform.
pub const MAX_SCALAR_ALIGNMENT: usize = max(
    mem::align_of::<u128>(),
    max(mem::align_of::<f64>(), mem::align_of::<usize>()),
);

const fn max(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

/// Base alignment used for a block serving allocations at `alignment`.
#[inline]
#[must_use]
pub const fn block_alignment(alignment: usize) -> usize {
    max(max(alignment, MAX_SCALAR_ALIGNMENT), MIN_BLOCK_ALIGNMENT)
}

/// Exclusively owned raw allocation.
///
/// The address never changes for the lifetime of the value.
struct BlockBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl BlockBuffer {
    /// Allocates `size` bytes at `alignment`.
    ///
    /// Platform exhaustion goes through [`alloc::handle_alloc_error`].
    fn new(size: usize, alignment: usize) -> AllocResult<Self> {
        let layout = Layout::from_size_align(size.max(1), alignment).map_err(|_| {
            AllocatorError::LayoutOverflow {
                size,
                alignment,
            }
        })?;

        // SAFETY: layout has a non-zero size
        let raw = unsafe { alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };

        Ok(Self { ptr, layout })
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for BlockBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc::alloc with exactly this layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// SAFETY: the buffer is plain bytes owned by this value alone; all access
// is serialized by the owning allocator's mutex.
unsafe impl Send for BlockBuffer {}

/// One fixed-capacity buffer managed by a [`SlotTable`].
pub struct MemoryBlock {
    buffer: BlockBuffer,
    slots: SlotTable,
}

impl MemoryBlock {
    /// Allocates a buffer of `capacity` bytes.
    ///
    /// The buffer's base alignment is `max(alignment, MAX_SCALAR_ALIGNMENT, 16)`,
    /// so offsets aligned to anything up to that are also aligned addresses.
    pub fn new(capacity: usize, alignment: usize, tracking: MemoryTracking) -> AllocResult<Self> {
        crate::config::check_alignment(alignment)?;
        let buffer = BlockBuffer::new(capacity, block_alignment(alignment))?;

        if tracking.reports() {
            tracing::info!("MemoryBlock({}) allocated memory at {:p}", capacity, buffer.base());
        }

        Ok(Self {
            buffer,
            slots: SlotTable::new(capacity, tracking),
        })
    }

    /// Reserves `size` bytes at an address aligned to `alignment`; `None`
    /// means "try another block".
    ///
    /// A block cannot serve alignments above [`MemoryBlock::buffer_alignment`],
    /// since an aligned offset would no longer be an aligned address.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if alignment > self.buffer_alignment() {
            return None;
        }
        let offset = self.slots.reserve(size, alignment)?;
        NonNull::new(self.buffer.base().wrapping_add(offset))
    }

    /// Releases an allocation previously returned by [`MemoryBlock::allocate`].
    pub fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> Deallocation {
        let Some(offset) = self.offset_of(ptr) else {
            return Deallocation::Foreign;
        };

        if self.slots.release(offset, size) {
            Deallocation::Released
        } else {
            tracing::warn!(
                "MemoryBlock::deallocate({:p}, {}) problem - couldn't release",
                ptr.as_ptr(),
                size
            );
            Deallocation::Rejected
        }
    }

    /// Offset of `ptr` inside this block, or `None` if it lies outside.
    #[must_use]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = (ptr.as_ptr() as usize).checked_sub(self.base_address())?;
        (offset < self.slots.total_memory_size()).then_some(offset)
    }

    /// Whether `ptr` lies inside this block's buffer.
    #[inline]
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.offset_of(ptr).is_some()
    }

    /// Address of the first byte of the buffer.
    #[inline]
    #[must_use]
    pub fn base_address(&self) -> usize {
        self.buffer.base() as usize
    }

    /// Capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.slots.total_memory_size()
    }

    /// Alignment of the buffer itself; the largest alignment the block serves.
    #[inline]
    #[must_use]
    pub const fn buffer_alignment(&self) -> usize {
        self.buffer.layout.align()
    }

    /// The block's slot table.
    #[inline]
    #[must_use]
    pub const fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Replaces the slot table's tracking flags.
    #[inline]
    pub fn set_tracking(&mut self, tracking: MemoryTracking) {
        self.slots.set_tracking(tracking);
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        if self.slots.tracking().reports() {
            tracing::info!(
                "MemoryBlock::drop({}) freed memory at {:p}",
                self.capacity(),
                self.buffer.base()
            );
        }
    }
}

impl std::fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("base", &self.buffer.base())
            .field("capacity", &self.capacity())
            .field("buffer_alignment", &self.buffer_alignment())
            .field("reserved", &self.slots.total_reserved_size())
            .finish()
    }
}
