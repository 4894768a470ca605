//! # Allocator Configuration
//!
//! Construction-time options, loadable from TOML:
//!
//! ```toml
//! default_alignment = 8
//! default_block_size = 1048576
//! memory_tracking = "REPORT_ACTIONS"
//! fallback = "system_heap"
//!
//! [[affinities]]
//! affinity = 1
//! name = "MemoryBlocks_DATA"
//! block_size = 16777216
//! ```
//!
//! Every field is optional; missing fields take the values of
//! [`AllocatorConfig::default`].

use std::path::Path;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::affinity::Affinity;
use crate::error::{AllocResult, AllocatorError};

/// One mebibyte.
pub const MEGABYTE: usize = 1024 * 1024;

/// Alignment used for chains provisioned without an explicit alignment.
pub const DEFAULT_ALIGNMENT: usize = 8;

/// Block size used for chains provisioned on demand.
pub const DEFAULT_BLOCK_SIZE: usize = MEGABYTE;

bitflags! {
    /// Diagnostic tracking modes.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MemoryTracking: u8 {
        /// Log every allocator action at info level.
        const REPORT_ACTIONS = 0b0000_0001;
        /// Validate slot-table invariants after every reserve/release.
        const CHECK_ACTIONS = 0b0000_0010;
    }
}

impl Default for MemoryTracking {
    fn default() -> Self {
        Self::empty()
    }
}

impl MemoryTracking {
    /// Whether actions should be logged.
    #[inline]
    #[must_use]
    pub const fn reports(self) -> bool {
        self.contains(Self::REPORT_ACTIONS)
    }

    /// Whether invariants should be checked after each action.
    #[inline]
    #[must_use]
    pub const fn checks(self) -> bool {
        self.contains(Self::CHECK_ACTIONS)
    }
}

/// What to do with requests the pools cannot serve.
///
/// The same strategy is used in both directions, so a pointer obtained from
/// the platform on allocate is returned the same way on deallocate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Pools only: foreign pointers are left alone and `deallocate` reports failure.
    #[default]
    None,
    /// `std::alloc` with the allocator's default alignment.
    SystemHeap,
    /// `libc::malloc` / `libc::free`.
    MallocFree,
}

/// Per-affinity chain settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinityConfig {
    /// Affinity the chain serves.
    pub affinity: Affinity,
    /// Display name; defaults to [`Affinity::chain_name`].
    #[serde(default)]
    pub name: Option<String>,
    /// Default capacity of new blocks in bytes.
    pub block_size: usize,
    /// Alignment of every allocation; defaults to the allocator default.
    #[serde(default)]
    pub alignment: Option<usize>,
}

impl AffinityConfig {
    /// Settings for `affinity` with the given block size and default name/alignment.
    #[must_use]
    pub const fn new(affinity: Affinity, block_size: usize) -> Self {
        Self {
            affinity,
            name: None,
            block_size,
            alignment: None,
        }
    }

    /// Sets an explicit alignment.
    #[must_use]
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = Some(alignment);
        self
    }

    /// Sets an explicit display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name to use for the chain.
    #[must_use]
    pub fn resolved_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.affinity.chain_name())
    }
}

/// Allocator construction options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Alignment for chains provisioned without an explicit alignment.
    pub default_alignment: usize,
    /// Block size for chains provisioned on demand.
    pub default_block_size: usize,
    /// Initial tracking flags.
    pub memory_tracking: MemoryTracking,
    /// Platform fallback strategy.
    pub fallback: FallbackStrategy,
    /// Chains provisioned at construction (no blocks are created until first use).
    pub affinities: Vec<AffinityConfig>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            default_alignment: DEFAULT_ALIGNMENT,
            default_block_size: DEFAULT_BLOCK_SIZE,
            memory_tracking: MemoryTracking::empty(),
            fallback: FallbackStrategy::None,
            affinities: vec![
                AffinityConfig::new(Affinity::OBJECTS, MEGABYTE),
                AffinityConfig::new(Affinity::DATA, 16 * MEGABYTE),
                AffinityConfig::new(Affinity::NODES, MEGABYTE),
                AffinityConfig::new(Affinity::PHYSICS, MEGABYTE).with_alignment(16),
            ],
        }
    }
}

impl AllocatorConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> AllocResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| AllocatorError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> AllocResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| AllocatorError::ConfigRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks alignments and block sizes.
    pub fn validate(&self) -> AllocResult<()> {
        check_alignment(self.default_alignment)?;
        if self.default_block_size == 0 {
            return Err(AllocatorError::InvalidBlockSize {
                affinity: u32::MAX,
                size: 0,
            });
        }

        for entry in &self.affinities {
            if !entry.affinity.has_chain_slot() {
                return Err(AllocatorError::AffinityOutOfRange(entry.affinity.0));
            }
            if entry.block_size == 0 {
                return Err(AllocatorError::InvalidBlockSize {
                    affinity: entry.affinity.0,
                    size: 0,
                });
            }
            if let Some(alignment) = entry.alignment {
                check_alignment(alignment)?;
            }
        }

        Ok(())
    }
}

/// Rejects zero and non-power-of-two alignments.
pub(crate) fn check_alignment(alignment: usize) -> AllocResult<()> {
    if alignment.is_power_of_two() {
        Ok(())
    } else {
        Err(AllocatorError::InvalidAlignment(alignment))
    }
}
