//! # Allocation Affinity
//!
//! An affinity is a small integer tag that selects which block chain serves
//! an allocation. It is an index, not a type constraint: any value up to
//! [`Affinity::MAX`] is valid, and values past the provisioned range get a
//! chain on first use.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Pool selector for an allocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Affinity(pub u32);

impl Affinity {
    /// Long-lived engine objects.
    pub const OBJECTS: Self = Self(0);
    /// Bulk data arrays (vertex data, images).
    pub const DATA: Self = Self(1);
    /// Scene-graph nodes.
    pub const NODES: Self = Self(2);
    /// Physics state.
    pub const PHYSICS: Self = Self(3);
    /// First value past the built-in affinities; user tags start here.
    pub const LAST: Self = Self(4);
    /// Highest affinity that can own a chain. Chain slots are a dense array
    /// indexed by affinity, so tags above this are served by the platform
    /// fallback instead.
    pub const MAX: Self = Self(1023);

    /// Creates an affinity from a raw tag.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Index of this affinity's chain slot.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this affinity can own a chain.
    #[inline]
    #[must_use]
    pub const fn has_chain_slot(self) -> bool {
        self.0 <= Self::MAX.0
    }

    /// Default chain name for this affinity.
    #[must_use]
    pub fn chain_name(self) -> String {
        match self {
            Self::OBJECTS => "MemoryBlocks_OBJECTS".to_string(),
            Self::DATA => "MemoryBlocks_DATA".to_string(),
            Self::NODES => "MemoryBlocks_NODES".to_string(),
            Self::PHYSICS => "MemoryBlocks_PHYSICS".to_string(),
            Self(value) => format!("MemoryBlocks_{value}"),
        }
    }

    /// Name of a chain provisioned on first use; always numeric.
    #[must_use]
    pub fn provisioned_chain_name(self) -> String {
        format!("MemoryBlocks_{}", self.0)
    }
}

impl From<u32> for Affinity {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        assert_eq!(Affinity::OBJECTS.chain_name(), "MemoryBlocks_OBJECTS");
        assert_eq!(Affinity::PHYSICS.chain_name(), "MemoryBlocks_PHYSICS");
        assert_eq!(Affinity::new(9).chain_name(), "MemoryBlocks_9");
    }

    #[test]
    fn test_provisioned_names_are_numeric() {
        assert_eq!(Affinity::NODES.provisioned_chain_name(), "MemoryBlocks_2");
        assert_eq!(Affinity::new(9).provisioned_chain_name(), "MemoryBlocks_9");
    }

    #[test]
    fn test_chain_slot_bound() {
        assert!(Affinity::MAX.has_chain_slot());
        assert!(!Affinity::new(Affinity::MAX.0 + 1).has_chain_slot());
        assert!(!Affinity::new(u32::MAX).has_chain_slot());
    }

    #[test]
    fn test_index() {
        assert_eq!(Affinity::LAST.index(), 4);
        assert_eq!(Affinity::from(17).index(), 17);
    }
}
