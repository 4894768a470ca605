//! # Slot Table
//!
//! Free/used span bookkeeping for one contiguous buffer of `capacity` bytes.
//!
//! ## Policy
//!
//! Best fit: `reserve` picks the smallest free span that can hold the request
//! at the requested alignment, ties broken by lowest offset. Alignment padding
//! in front of the reservation stays free, as does the tail of the span.
//!
//! ```text
//!   free span                [offset ............................ offset+len)
//!   after reserve            [pad)[aligned .. aligned+size)[tail ..........)
//!                             free        reserved                free
//! ```
//!
//! `release` only accepts an exact `(offset, size)` pair that is currently
//! reserved and coalesces the span with its free neighbours.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::MemoryTracking;

/// Free/used span tracker for one buffer.
#[derive(Debug, Clone)]
pub struct SlotTable {
    /// Size of the managed range.
    capacity: usize,
    /// Free spans: offset -> length. Sorted, non-overlapping, never adjacent.
    free: BTreeMap<usize, usize>,
    /// Same spans keyed by (length, offset) for best-fit search.
    free_by_size: BTreeSet<(usize, usize)>,
    /// Live reservations: offset -> size.
    reserved: BTreeMap<usize, usize>,
    /// Sum of reserved sizes.
    reserved_bytes: usize,
    /// Diagnostic flags.
    tracking: MemoryTracking,
}

impl SlotTable {
    /// Creates a table with the whole range `[0, capacity)` free.
    #[must_use]
    pub fn new(capacity: usize, tracking: MemoryTracking) -> Self {
        let mut table = Self {
            capacity,
            free: BTreeMap::new(),
            free_by_size: BTreeSet::new(),
            reserved: BTreeMap::new(),
            reserved_bytes: 0,
            tracking,
        };
        if capacity > 0 {
            table.insert_free(0, capacity);
        }
        table
    }

    /// Reserves `size` bytes at an offset that is a multiple of `alignment`.
    ///
    /// Zero-sized requests reserve one byte so each offset stays unique.
    /// Returns `None` when no free span fits, or for a non-power-of-two
    /// alignment.
    pub fn reserve(&mut self, size: usize, alignment: usize) -> Option<usize> {
        let size = size.max(1);
        if !alignment.is_power_of_two() {
            return None;
        }

        let (span_offset, span_len, aligned) = self
            .free_by_size
            .range((size, 0)..)
            .find_map(|&(len, offset)| {
                let aligned = align_up(offset, alignment)?;
                let end = aligned.checked_add(size)?;
                (end <= offset + len).then_some((offset, len, aligned))
            })?;

        self.remove_free(span_offset, span_len);
        if aligned > span_offset {
            self.insert_free(span_offset, aligned - span_offset);
        }
        let end = aligned + size;
        let span_end = span_offset + span_len;
        if span_end > end {
            self.insert_free(end, span_end - end);
        }

        self.reserved.insert(aligned, size);
        self.reserved_bytes += size;

        if self.tracking.reports() {
            tracing::info!("SlotTable::reserve({}, {}) -> offset {}", size, alignment, aligned);
        }
        if self.tracking.checks() {
            self.check();
        }

        Some(aligned)
    }

    /// Returns a reservation to the free set.
    ///
    /// `false` means `(offset, size)` is not a live reservation; nothing is
    /// modified in that case.
    pub fn release(&mut self, offset: usize, size: usize) -> bool {
        let size = size.max(1);
        if self.reserved.get(&offset) != Some(&size) {
            if self.tracking.reports() {
                tracing::info!("SlotTable::release({}, {}) no matching reservation", offset, size);
            }
            return false;
        }

        self.reserved.remove(&offset);
        self.reserved_bytes -= size;

        let mut start = offset;
        let mut end = offset + size;

        let previous = self
            .free
            .range(..offset)
            .next_back()
            .map(|(&prev_offset, &prev_len)| (prev_offset, prev_len));
        if let Some((prev_offset, prev_len)) = previous {
            if prev_offset + prev_len == start {
                self.remove_free(prev_offset, prev_len);
                start = prev_offset;
            }
        }

        if let Some(next_len) = self.free.get(&end).copied() {
            self.remove_free(end, next_len);
            end += next_len;
        }

        self.insert_free(start, end - start);

        if self.tracking.reports() {
            tracing::info!("SlotTable::release({}, {}) merged into [{}, {})", offset, size, start, end);
        }
        if self.tracking.checks() {
            self.check();
        }

        true
    }

    /// Bytes not currently reserved, including alignment padding.
    #[inline]
    #[must_use]
    pub fn total_available_size(&self) -> usize {
        self.capacity - self.reserved_bytes
    }

    /// Bytes currently reserved.
    #[inline]
    #[must_use]
    pub const fn total_reserved_size(&self) -> usize {
        self.reserved_bytes
    }

    /// Size of the managed range.
    #[inline]
    #[must_use]
    pub const fn total_memory_size(&self) -> usize {
        self.capacity
    }

    /// Length of the largest free span.
    #[must_use]
    pub fn maximum_available_space(&self) -> usize {
        self.free_by_size
            .iter()
            .next_back()
            .map_or(0, |&(len, _)| len)
    }

    /// True iff nothing is reserved.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reserved.is_empty()
    }

    /// Number of live reservations.
    #[inline]
    #[must_use]
    pub fn reservation_count(&self) -> usize {
        self.reserved.len()
    }

    /// Number of free spans.
    #[inline]
    #[must_use]
    pub fn free_span_count(&self) -> usize {
        self.free.len()
    }

    /// Current tracking flags.
    #[inline]
    #[must_use]
    pub const fn tracking(&self) -> MemoryTracking {
        self.tracking
    }

    /// Replaces the tracking flags.
    #[inline]
    pub fn set_tracking(&mut self, tracking: MemoryTracking) {
        self.tracking = tracking;
    }

    /// Validates the span invariants, logging each violation.
    ///
    /// Returns `true` when the table is consistent.
    pub fn check(&self) -> bool {
        let mut consistent = true;

        if self.free.len() != self.free_by_size.len() {
            tracing::error!(
                "SlotTable::check() free index mismatch: {} spans, {} sized entries",
                self.free.len(),
                self.free_by_size.len()
            );
            consistent = false;
        }

        // Free and reserved spans must tile [0, capacity) exactly.
        let mut spans: Vec<(usize, usize, bool)> = self
            .free
            .iter()
            .map(|(&offset, &len)| (offset, len, true))
            .chain(self.reserved.iter().map(|(&offset, &len)| (offset, len, false)))
            .collect();
        spans.sort_unstable();

        let mut cursor = 0;
        let mut previous_free = false;
        for &(offset, len, is_free) in &spans {
            if offset != cursor {
                tracing::error!(
                    "SlotTable::check() span at {} expected at {} ({})",
                    offset,
                    cursor,
                    if offset < cursor { "overlap" } else { "gap" }
                );
                consistent = false;
            }
            if is_free && previous_free {
                tracing::error!("SlotTable::check() uncoalesced free span at {}", offset);
                consistent = false;
            }
            if is_free && !self.free_by_size.contains(&(len, offset)) {
                tracing::error!("SlotTable::check() free span at {} missing from size index", offset);
                consistent = false;
            }
            previous_free = is_free;
            cursor = offset + len;
        }
        if cursor != self.capacity {
            tracing::error!("SlotTable::check() spans end at {} not {}", cursor, self.capacity);
            consistent = false;
        }

        let reserved_sum: usize = self.reserved.values().sum();
        if reserved_sum != self.reserved_bytes {
            tracing::error!(
                "SlotTable::check() reserved total {} does not match spans {}",
                self.reserved_bytes,
                reserved_sum
            );
            consistent = false;
        }

        consistent
    }

    fn insert_free(&mut self, offset: usize, len: usize) {
        self.free.insert(offset, len);
        self.free_by_size.insert((len, offset));
    }

    fn remove_free(&mut self, offset: usize, len: usize) {
        self.free.remove(&offset);
        self.free_by_size.remove(&(len, offset));
    }
}

/// Rounds `value` up to a multiple of the power-of-two `alignment`.
#[inline]
fn align_up(value: usize, alignment: usize) -> Option<usize> {
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}
