//! # Allocator Facade
//!
//! One [`MemoryBlocks`] chain per affinity behind a single mutex, with an
//! optional nested allocator and a platform fallback.
//!
//! ## Architecture
//!
//! ```text
//!   allocate(size, affinity)              deallocate(ptr, size)
//!            │                                     │
//!            ▼                                     ▼
//!   ┌─────────────────────────── Mutex ───────────────────────────┐
//!   │ chains[affinity]  (provisioned on demand)   every chain     │
//!   │   latest → newest..oldest → new block       until one owns  │
//!   └─────────────────────────────────────────────────────────────┘
//!            │ layout failure                      │ foreign pointer
//!            ▼                                     ▼
//!    platform fallback                    nested allocator
//!                                                  │
//!                                                  ▼
//!                                          platform fallback
//! ```
//!
//! ## Safety Note
//!
//! The platform fallback hands raw pointers to `std::alloc` / `libc`, which
//! is why `deallocate` is an `unsafe fn`.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::io;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::affinity::Affinity;
use crate::config::{
    check_alignment, AffinityConfig, AllocatorConfig, FallbackStrategy, MemoryTracking,
};
use crate::error::{AllocResult, AllocatorError};
use crate::memory::{ChainStats, Deallocation, MemoryBlocks};

/// Process-wide allocator slot. Empty until first use.
static INSTANCE: RwLock<Option<Arc<Allocator>>> = parking_lot::const_rwlock(None);

/// Everything the mutex protects.
struct PoolState {
    /// Chain slots indexed by affinity.
    chains: Vec<Option<MemoryBlocks>>,
    tracking: MemoryTracking,
    fallback: FallbackStrategy,
}

impl PoolState {
    fn chains(&self) -> impl Iterator<Item = &MemoryBlocks> {
        self.chains.iter().flatten()
    }

    fn chains_mut(&mut self) -> impl Iterator<Item = &mut MemoryBlocks> {
        self.chains.iter_mut().flatten()
    }

    /// Returns the chain for `affinity`, creating it with `make` if its slot
    /// is past the end of the array or empty.
    fn chain_or_insert_with(
        &mut self,
        affinity: Affinity,
        make: impl FnOnce(MemoryTracking) -> MemoryBlocks,
    ) -> &mut MemoryBlocks {
        let index = affinity.index();
        if index >= self.chains.len() {
            self.chains.resize_with(index + 1, || None);
        }
        let tracking = self.tracking;
        self.chains[index].get_or_insert_with(|| make(tracking))
    }
}

/// Affinity-partitioned pool allocator.
///
/// # Thread Safety
///
/// Every operation takes the same mutex, including the statistics
/// accessors, so each call observes a consistent snapshot. Allocations on
/// different affinities serialize against each other.
///
/// # Example
///
/// ```rust,ignore
/// let allocator = Allocator::default();
/// let ptr = allocator.allocate(64, Affinity::NODES).expect("pool exhausted");
/// // ... use the 64 bytes ...
/// unsafe { allocator.deallocate(ptr, 64) };
/// ```
pub struct Allocator {
    state: Mutex<PoolState>,
    /// Consulted for pointers no chain owns.
    nested: Option<Box<Allocator>>,
    default_alignment: usize,
    default_block_size: usize,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::from_valid_config(AllocatorConfig::default(), None)
    }
}

impl Allocator {
    /// Creates an allocator, provisioning the configured chains.
    pub fn new(config: AllocatorConfig) -> AllocResult<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config, None))
    }

    /// Creates an allocator that falls back to `nested` for pointers its own
    /// chains do not own.
    ///
    /// A foreign pointer goes to `nested` before this allocator's own
    /// [`FallbackStrategy`], and `nested` applies its own strategy to it. The
    /// nested allocator should therefore use [`FallbackStrategy::None`] or the
    /// same strategy as this one; otherwise a platform pointer may reach the
    /// wrong platform free.
    pub fn with_nested(config: AllocatorConfig, nested: Allocator) -> AllocResult<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config, Some(Box::new(nested))))
    }

    fn from_valid_config(config: AllocatorConfig, nested: Option<Box<Allocator>>) -> Self {
        let mut state = PoolState {
            chains: Vec::new(),
            tracking: config.memory_tracking,
            fallback: config.fallback,
        };
        for entry in &config.affinities {
            let alignment = entry.alignment.unwrap_or(config.default_alignment);
            let chain = MemoryBlocks::new(
                entry.resolved_name(),
                entry.block_size,
                alignment,
                config.memory_tracking,
            );
            let index = entry.affinity.index();
            if index >= state.chains.len() {
                state.chains.resize_with(index + 1, || None);
            }
            state.chains[index] = Some(chain);
        }

        Self {
            state: Mutex::new(state),
            nested,
            default_alignment: config.default_alignment,
            default_block_size: config.default_block_size,
        }
    }

    /// The process-wide allocator, created with defaults on first access.
    pub fn instance() -> Arc<Allocator> {
        if let Some(allocator) = INSTANCE.read().as_ref() {
            return Arc::clone(allocator);
        }
        let mut slot = INSTANCE.write();
        Arc::clone(slot.get_or_insert_with(|| Arc::new(Allocator::default())))
    }

    /// Installs `allocator` as the process-wide default.
    ///
    /// Returns the previous instance, if one had been created. Memory
    /// obtained from it must still be returned to it.
    pub fn replace_instance(allocator: Arc<Allocator>) -> Option<Arc<Allocator>> {
        INSTANCE.write().replace(allocator)
    }

    /// Allocates `size` bytes from the chain serving `affinity`.
    ///
    /// Affinities past the provisioned range get a new chain with the default
    /// block size and alignment. Affinities above [`Affinity::MAX`] have no
    /// chain slot and go straight to the platform fallback.
    ///
    /// The pools only fail for requests that cannot form a block layout (a
    /// size near `isize::MAX`). The platform cannot serve those either, so in
    /// practice the platform fallback only produces memory for affinities
    /// without a chain slot. Returns `None` when nothing can produce memory.
    pub fn allocate(&self, size: usize, affinity: Affinity) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        let reports = state.tracking.reports();

        if !affinity.has_chain_slot() {
            let fallback = state.fallback;
            drop(state);
            tracing::warn!(
                "Allocator::allocate({}, {}) affinity has no chain slot; falling back to {:?}",
                size,
                affinity,
                fallback
            );
            return self.platform_allocate(size, fallback);
        }

        let (default_block_size, default_alignment) =
            (self.default_block_size, self.default_alignment);
        let chain = state.chain_or_insert_with(affinity, |tracking| {
            if reports {
                tracing::info!(
                    "Allocator::allocate({}, {}) out of bounds, provisioning new MemoryBlocks",
                    size,
                    affinity
                );
            }
            MemoryBlocks::new(
                affinity.provisioned_chain_name(),
                default_block_size,
                default_alignment,
                tracking,
            )
        });

        match chain.allocate(size) {
            Ok(ptr) => {
                if reports {
                    tracing::info!(
                        "Allocated from MemoryBlock {:p}, size = {}, affinity = {}",
                        ptr.as_ptr(),
                        size,
                        affinity
                    );
                }
                Some(ptr)
            }
            Err(e) => {
                let fallback = state.fallback;
                drop(state);
                tracing::warn!(
                    "Allocator::allocate({}, {}) pool failure: {}; falling back to {:?}",
                    size,
                    affinity,
                    e,
                    fallback
                );
                self.platform_allocate(size, fallback)
            }
        }
    }

    /// Returns `size` bytes at `ptr`.
    ///
    /// Every chain is tried (the caller does not have to remember the
    /// affinity), then the nested allocator, then the platform fallback.
    /// Returns `false` if the pointer lies in a pool buffer (this allocator's
    /// or a nested one's) but does not match a live allocation, or if nothing
    /// owns it and the fallback is [`FallbackStrategy::None`]; the memory is
    /// then left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator (or its nested
    /// allocator, or the platform fallback) with the same `size`, and must
    /// not be used afterwards. With a platform fallback configured, a foreign
    /// pointer is passed straight to the platform's free.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) -> bool {
        // SAFETY: forwarded caller contract
        unsafe { self.release(ptr, size) }.is_released()
    }

    /// Own chains, then the nested allocator, then the platform fallback.
    ///
    /// `Rejected` from any pool stops the walk, so a pointer inside a pool
    /// buffer never reaches a platform free.
    ///
    /// # Safety
    ///
    /// Same contract as [`Allocator::deallocate`].
    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) -> Deallocation {
        let (fallback, reports) = {
            let mut state = self.state.lock();
            let reports = state.tracking.reports();
            for chain in state.chains_mut() {
                match chain.deallocate(ptr, size) {
                    Deallocation::Released => {
                        if reports {
                            tracing::info!("Deallocated from MemoryBlock {:p}", ptr.as_ptr());
                        }
                        return Deallocation::Released;
                    }
                    Deallocation::Rejected => return Deallocation::Rejected,
                    Deallocation::Foreign => {}
                }
            }
            (state.fallback, reports)
        };

        if let Some(nested) = &self.nested {
            // SAFETY: forwarded caller contract
            match unsafe { nested.release(ptr, size) } {
                Deallocation::Foreign => {}
                outcome => return outcome,
            }
        }

        // SAFETY: forwarded caller contract
        if unsafe { self.platform_deallocate(ptr, size, fallback) } {
            return Deallocation::Released;
        }
        if reports {
            tracing::warn!(
                "Allocator::deallocate({:p}, {}) pointer not owned by any pool",
                ptr.as_ptr(),
                size
            );
        }
        Deallocation::Foreign
    }

    /// Drops every empty block in every chain; returns the bytes released.
    pub fn delete_empty_memory_blocks(&self) -> usize {
        let mut state = self.state.lock();
        state
            .chains_mut()
            .map(MemoryBlocks::delete_empty_memory_blocks)
            .sum()
    }

    /// Unreserved bytes across all blocks.
    pub fn total_available_size(&self) -> usize {
        self.state
            .lock()
            .chains()
            .map(MemoryBlocks::total_available_size)
            .sum()
    }

    /// Reserved bytes across all blocks.
    pub fn total_reserved_size(&self) -> usize {
        self.state
            .lock()
            .chains()
            .map(MemoryBlocks::total_reserved_size)
            .sum()
    }

    /// Capacity of all blocks.
    pub fn total_memory_size(&self) -> usize {
        self.state
            .lock()
            .chains()
            .map(MemoryBlocks::total_memory_size)
            .sum()
    }

    /// Writes a human-readable usage summary.
    pub fn report<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        let state = self.state.lock();

        let available: usize = state.chains().map(MemoryBlocks::total_available_size).sum();
        let reserved: usize = state.chains().map(MemoryBlocks::total_reserved_size).sum();
        let memory: usize = state.chains().map(MemoryBlocks::total_memory_size).sum();

        writeln!(out, "Allocator::report() {}", state.chains.len())?;
        writeln!(
            out,
            "totalAvailableSize = {available}, totalReservedSize = {reserved}, totalMemorySize = {memory}"
        )?;

        for chain in state.chains() {
            let used = chain.total_reserved_size();
            write!(out, "{} used = {}", chain.name(), used)?;
            if reserved > 0 {
                #[allow(clippy::cast_precision_loss)]
                let percent = used as f64 / reserved as f64 * 100.0;
                write!(out, ", {percent:.2}% of total used.")?;
            }
            writeln!(out)?;
        }

        for chain in state.chains() {
            write!(out, "{} {} blocks", chain.name(), chain.block_count())?;
            for block in chain.blocks() {
                write!(
                    out,
                    " [used = {}, avail = {}]",
                    block.slots().total_reserved_size(),
                    block.slots().maximum_available_space()
                )?;
            }
            writeln!(out)?;
        }

        Ok(())
    }

    /// Sets tracking flags on every existing chain and block and on any
    /// created later.
    pub fn set_memory_tracking(&self, tracking: MemoryTracking) {
        let mut state = self.state.lock();
        state.tracking = tracking;
        for chain in state.chains_mut() {
            chain.set_tracking(tracking);
        }
    }

    /// Current tracking flags.
    pub fn memory_tracking(&self) -> MemoryTracking {
        self.state.lock().tracking
    }

    /// Changes the platform fallback strategy.
    ///
    /// Pointers obtained under one strategy must be returned under the same one.
    pub fn set_fallback_strategy(&self, fallback: FallbackStrategy) {
        self.state.lock().fallback = fallback;
    }

    /// Current platform fallback strategy.
    pub fn fallback_strategy(&self) -> FallbackStrategy {
        self.state.lock().fallback
    }

    /// Applies `config` to the chain for its affinity, provisioning it if needed.
    ///
    /// A new block size applies to blocks created afterwards. A new alignment
    /// applies to every later allocation; existing blocks whose buffer is
    /// aligned below it are no longer used for new requests.
    pub fn configure_affinity(&self, config: &AffinityConfig) -> AllocResult<()> {
        if !config.affinity.has_chain_slot() {
            return Err(AllocatorError::AffinityOutOfRange(config.affinity.0));
        }
        if config.block_size == 0 {
            return Err(AllocatorError::InvalidBlockSize {
                affinity: config.affinity.0,
                size: 0,
            });
        }
        let alignment = config.alignment.unwrap_or(self.default_alignment);
        check_alignment(alignment)?;

        let mut state = self.state.lock();
        let name = config.resolved_name();
        let chain = state.chain_or_insert_with(config.affinity, |tracking| {
            MemoryBlocks::new(name.clone(), config.block_size, alignment, tracking)
        });
        chain.set_name(name);
        chain.set_block_size(config.block_size);
        chain.set_alignment(alignment);
        Ok(())
    }

    /// Changes the default block size of one chain, provisioning it if needed.
    pub fn set_block_size(&self, affinity: Affinity, block_size: usize) -> AllocResult<()> {
        if !affinity.has_chain_slot() {
            return Err(AllocatorError::AffinityOutOfRange(affinity.0));
        }
        if block_size == 0 {
            return Err(AllocatorError::InvalidBlockSize {
                affinity: affinity.0,
                size: 0,
            });
        }
        let default_alignment = self.default_alignment;
        let mut state = self.state.lock();
        state
            .chain_or_insert_with(affinity, |tracking| {
                MemoryBlocks::new(
                    affinity.provisioned_chain_name(),
                    block_size,
                    default_alignment,
                    tracking,
                )
            })
            .set_block_size(block_size);
        Ok(())
    }

    /// Usage snapshot of the chain for `affinity`, if one is provisioned.
    pub fn chain_stats(&self, affinity: Affinity) -> Option<ChainStats> {
        let state = self.state.lock();
        state
            .chains
            .get(affinity.index())
            .and_then(Option::as_ref)
            .map(MemoryBlocks::stats)
    }

    /// Number of chain slots (provisioned or not) below the highest affinity seen.
    pub fn affinity_count(&self) -> usize {
        self.state.lock().chains.len()
    }

    /// Alignment used for chains provisioned on demand.
    #[inline]
    #[must_use]
    pub const fn default_alignment(&self) -> usize {
        self.default_alignment
    }

    /// Block size used for chains provisioned on demand.
    #[inline]
    #[must_use]
    pub const fn default_block_size(&self) -> usize {
        self.default_block_size
    }

    /// The nested allocator, if any.
    #[inline]
    #[must_use]
    pub fn nested(&self) -> Option<&Allocator> {
        self.nested.as_deref()
    }

    /// Layout shared by platform allocate and deallocate.
    fn platform_layout(&self, size: usize) -> Option<Layout> {
        Layout::from_size_align(size.max(1), self.default_alignment).ok()
    }

    fn platform_allocate(&self, size: usize, fallback: FallbackStrategy) -> Option<NonNull<u8>> {
        match fallback {
            FallbackStrategy::None => None,
            FallbackStrategy::SystemHeap => {
                let layout = self.platform_layout(size)?;
                // SAFETY: layout has a non-zero size
                NonNull::new(unsafe { alloc::alloc(layout) })
            }
            // SAFETY: malloc accepts any size and returns null on failure
            FallbackStrategy::MallocFree => NonNull::new(unsafe { libc::malloc(size.max(1)) }.cast()),
        }
    }

    /// # Safety
    ///
    /// `ptr` must have come from `platform_allocate(size, fallback)`.
    unsafe fn platform_deallocate(
        &self,
        ptr: NonNull<u8>,
        size: usize,
        fallback: FallbackStrategy,
    ) -> bool {
        match fallback {
            FallbackStrategy::None => false,
            FallbackStrategy::SystemHeap => {
                let Some(layout) = self.platform_layout(size) else {
                    return false;
                };
                // SAFETY: caller guarantees ptr came from alloc::alloc with this layout
                unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
                true
            }
            FallbackStrategy::MallocFree => {
                // SAFETY: caller guarantees ptr came from libc::malloc
                unsafe { libc::free(ptr.as_ptr().cast()) };
                true
            }
        }
    }
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("default_alignment", &self.default_alignment)
            .field("default_block_size", &self.default_block_size)
            .field("affinity_count", &self.state.try_lock().map(|s| s.chains.len()))
            .field("has_nested", &self.nested.is_some())
            .finish()
    }
}

/// Allocates from the process-wide allocator.
pub fn allocate(size: usize, affinity: Affinity) -> Option<NonNull<u8>> {
    Allocator::instance().allocate(size, affinity)
}

/// Returns memory to the process-wide allocator.
///
/// # Safety
///
/// Same contract as [`Allocator::deallocate`] on [`Allocator::instance`].
pub unsafe fn deallocate(ptr: NonNull<u8>, size: usize) -> bool {
    // SAFETY: forwarded caller contract
    unsafe { Allocator::instance().deallocate(ptr, size) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MEGABYTE;

    fn small_config() -> AllocatorConfig {
        AllocatorConfig {
            default_block_size: 4096,
            affinities: vec![
                AffinityConfig::new(Affinity::OBJECTS, 4096),
                AffinityConfig::new(Affinity::DATA, 8192),
            ],
            memory_tracking: MemoryTracking::CHECK_ACTIONS,
            ..AllocatorConfig::default()
        }
    }

    #[test]
    fn test_default_provisioning() {
        let allocator = Allocator::default();
        assert_eq!(allocator.affinity_count(), 4);
        let physics = allocator.chain_stats(Affinity::PHYSICS).unwrap();
        assert_eq!(physics.alignment, 16);
        assert_eq!(physics.name, "MemoryBlocks_PHYSICS");
        let data = allocator.chain_stats(Affinity::DATA).unwrap();
        assert_eq!(data.block_size, 16 * MEGABYTE);
        // Chains start without blocks.
        assert_eq!(allocator.total_memory_size(), 0);
    }

    #[test]
    fn test_allocate_deallocate_roundtrip() {
        let allocator = Allocator::new(small_config()).unwrap();
        let before = allocator.total_reserved_size();
        let ptr = allocator.allocate(100, Affinity::OBJECTS).unwrap();
        assert_eq!(allocator.total_reserved_size(), before + 100);
        assert!(unsafe { allocator.deallocate(ptr, 100) });
        assert_eq!(allocator.total_reserved_size(), before);
    }

    #[test]
    fn test_provisioning_boundary() {
        let allocator = Allocator::new(small_config()).unwrap();
        assert_eq!(allocator.affinity_count(), 2);

        // Index == len is past the end and must provision exactly one slot.
        let ptr = allocator.allocate(8, Affinity::new(2)).unwrap();
        assert_eq!(allocator.affinity_count(), 3);
        let stats = allocator.chain_stats(Affinity::new(2)).unwrap();
        assert_eq!(stats.name, "MemoryBlocks_2");
        assert_eq!(stats.block_size, 4096);
        assert_eq!(stats.alignment, 8);
        assert!(unsafe { allocator.deallocate(ptr, 8) });
    }

    #[test]
    fn test_sparse_affinity_leaves_gap_unprovisioned() {
        let allocator = Allocator::new(small_config()).unwrap();
        let ptr = allocator.allocate(8, Affinity::new(6)).unwrap();
        assert_eq!(allocator.affinity_count(), 7);
        assert!(allocator.chain_stats(Affinity::new(4)).is_none());
        assert!(allocator.chain_stats(Affinity::new(6)).is_some());
        assert!(unsafe { allocator.deallocate(ptr, 8) });
    }

    #[test]
    fn test_mismatched_size_does_not_fall_through() {
        let mut config = small_config();
        config.fallback = FallbackStrategy::SystemHeap;
        let allocator = Allocator::new(config).unwrap();
        let ptr = allocator.allocate(32, Affinity::OBJECTS).unwrap();
        // Inside a pool buffer: must be rejected, never handed to the platform.
        assert!(!unsafe { allocator.deallocate(ptr, 16) });
        assert_eq!(allocator.total_reserved_size(), 32);
        assert!(unsafe { allocator.deallocate(ptr, 32) });
    }

    #[test]
    fn test_configure_affinity_updates_existing_chain() {
        let allocator = Allocator::new(small_config()).unwrap();
        allocator
            .configure_affinity(
                &AffinityConfig::new(Affinity::OBJECTS, 2048)
                    .with_alignment(64)
                    .with_name("objects"),
            )
            .unwrap();
        let stats = allocator.chain_stats(Affinity::OBJECTS).unwrap();
        assert_eq!(stats.name, "objects");
        assert_eq!(stats.block_size, 2048);
        assert_eq!(stats.alignment, 64);

        let ptr = allocator.allocate(10, Affinity::OBJECTS).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 64, 0);
        assert!(unsafe { allocator.deallocate(ptr, 10) });
    }

    #[test]
    fn test_configure_affinity_rejects_bad_values() {
        let allocator = Allocator::default();
        assert_eq!(
            allocator.configure_affinity(&AffinityConfig::new(Affinity::new(9), 64).with_alignment(6)),
            Err(AllocatorError::InvalidAlignment(6))
        );
        assert!(allocator.set_block_size(Affinity::new(9), 0).is_err());
        assert_eq!(allocator.affinity_count(), 4);
    }

    #[test]
    fn test_realigned_chain_keeps_alignment_guarantee() {
        let allocator = Allocator::new(small_config()).unwrap();
        let first = allocator.allocate(8, Affinity::OBJECTS).unwrap();

        allocator
            .configure_affinity(&AffinityConfig::new(Affinity::OBJECTS, 4096).with_alignment(64))
            .unwrap();
        let second = allocator.allocate(8, Affinity::OBJECTS).unwrap();
        assert_eq!(second.as_ptr() as usize % 64, 0);
        assert_eq!(allocator.chain_stats(Affinity::OBJECTS).unwrap().blocks.len(), 2);

        unsafe {
            assert!(allocator.deallocate(first, 8));
            assert!(allocator.deallocate(second, 8));
        }
    }

    #[test]
    fn test_affinity_without_chain_slot() {
        let allocator = Allocator::new(small_config()).unwrap();
        let beyond = Affinity::new(u32::MAX);

        assert!(allocator.allocate(16, beyond).is_none());
        assert_eq!(allocator.affinity_count(), 2);
        assert_eq!(
            allocator.set_block_size(beyond, 64),
            Err(AllocatorError::AffinityOutOfRange(u32::MAX))
        );
        assert_eq!(
            allocator.configure_affinity(&AffinityConfig::new(beyond, 64)),
            Err(AllocatorError::AffinityOutOfRange(u32::MAX))
        );

        allocator.set_fallback_strategy(FallbackStrategy::SystemHeap);
        let ptr = allocator.allocate(16, beyond).unwrap();
        assert_eq!(allocator.total_memory_size(), 0);
        assert!(unsafe { allocator.deallocate(ptr, 16) });
    }

    #[test]
    fn test_set_block_size_provisions() {
        let allocator = Allocator::new(small_config()).unwrap();
        allocator.set_block_size(Affinity::new(5), 1000).unwrap();
        assert_eq!(allocator.affinity_count(), 6);
        assert_eq!(allocator.chain_stats(Affinity::new(5)).unwrap().name, "MemoryBlocks_5");
        let ptr = allocator.allocate(10, Affinity::new(5)).unwrap();
        assert_eq!(allocator.total_memory_size(), 1000);
        assert!(unsafe { allocator.deallocate(ptr, 10) });
    }

    #[test]
    fn test_set_memory_tracking_propagates() {
        let allocator = Allocator::new(small_config()).unwrap();
        let ptr = allocator.allocate(10, Affinity::OBJECTS).unwrap();
        allocator.set_memory_tracking(MemoryTracking::REPORT_ACTIONS);
        assert_eq!(allocator.memory_tracking(), MemoryTracking::REPORT_ACTIONS);

        let state = allocator.state.lock();
        for chain in state.chains() {
            for block in chain.blocks() {
                assert_eq!(block.slots().tracking(), MemoryTracking::REPORT_ACTIONS);
            }
        }
        drop(state);

        // Future chains inherit the flags as well.
        let other = allocator.allocate(10, Affinity::new(3)).unwrap();
        {
            let state = allocator.state.lock();
            let chain = state.chains[3].as_ref().unwrap();
            assert!(chain.blocks().all(|b| b.slots().tracking().reports()));
        }
        assert!(unsafe { allocator.deallocate(ptr, 10) });
        assert!(unsafe { allocator.deallocate(other, 10) });
    }

    #[test]
    fn test_report_contents() {
        let allocator = Allocator::new(small_config()).unwrap();
        let a = allocator.allocate(300, Affinity::OBJECTS).unwrap();
        let b = allocator.allocate(100, Affinity::DATA).unwrap();

        let mut out = Vec::new();
        allocator.report(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Allocator::report() 2\n"));
        assert!(text.contains("totalReservedSize = 400"));
        assert!(text.contains("totalMemorySize = 12288"));
        assert!(text.contains("MemoryBlocks_OBJECTS used = 300, 75.00% of total used."));
        assert!(text.contains("MemoryBlocks_DATA used = 100, 25.00% of total used."));
        assert!(text.contains("MemoryBlocks_OBJECTS 1 blocks [used = 300, avail = 3796]"));
        assert!(text.contains("MemoryBlocks_DATA 1 blocks [used = 100, avail = 8092]"));

        unsafe {
            assert!(allocator.deallocate(a, 300));
            assert!(allocator.deallocate(b, 100));
        }
    }

    #[test]
    fn test_platform_fallback_allocate_on_layout_failure() {
        let mut config = small_config();
        config.fallback = FallbackStrategy::SystemHeap;
        let allocator = Allocator::new(config).unwrap();
        // Cannot be expressed as a block layout, nor as a platform layout.
        assert!(allocator.allocate(usize::MAX - 4, Affinity::OBJECTS).is_none());
    }

    #[test]
    fn test_system_heap_fallback_frees_foreign_pointer() {
        let mut config = small_config();
        config.fallback = FallbackStrategy::SystemHeap;
        let allocator = Allocator::new(config).unwrap();

        let layout = Layout::from_size_align(48, allocator.default_alignment()).unwrap();
        let raw = NonNull::new(unsafe { alloc::alloc(layout) }).unwrap();
        assert!(unsafe { allocator.deallocate(raw, 48) });
        assert_eq!(allocator.total_reserved_size(), 0);
    }

    #[test]
    fn test_malloc_free_fallback() {
        let mut config = small_config();
        config.fallback = FallbackStrategy::MallocFree;
        let allocator = Allocator::new(config).unwrap();
        assert_eq!(allocator.fallback_strategy(), FallbackStrategy::MallocFree);

        let raw = allocator.platform_allocate(24, FallbackStrategy::MallocFree).unwrap();
        assert!(unsafe { allocator.deallocate(raw, 24) });
    }
}
