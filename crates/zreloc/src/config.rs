//! Configuration Module - Address Layout & Heap Geometry
//!
//! Manages all configuration parameters for zreloc. The configuration is read
//! once when the heap is created; the address layout derived from it is
//! immutable for the lifetime of the process.

use crate::barrier::address_space::AddressLayout;
use crate::relocate::entry::{FROM_INDEX_BITS, TO_OFFSET_BITS};

/// Main configuration for the relocation core
///
/// # Examples
///
/// ```rust
/// use zreloc::RelocConfig;
///
/// // Small heap with 4KB granules, handy for tests
/// let config = RelocConfig {
///     heap_size: 1024 * 1024,
///     granule_shift: 12,
///     medium_page_granules: 4,
///     medium_object_alignment_shift: 5,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RelocConfig {
    /// Size of the heap arena in bytes
    ///
    /// Must be a multiple of the granule size and addressable with
    /// `offset_bits`.
    /// Default: 64MB
    pub heap_size: usize,

    /// log2 of the granule size
    ///
    /// A granule is the unit the forwarding table is indexed by and the
    /// size of a small page.
    /// Default: 21 (2MB)
    pub granule_shift: u32,

    /// Number of low address bits holding the heap offset
    ///
    /// Metadata bits (Marked0, Marked1, Remapped, Finalizable) sit directly
    /// above. At most 45, the width of a forwarding entry's to-offset field.
    /// Default: 42 (4TB)
    pub offset_bits: u32,

    /// Medium page size in granules (power of two)
    ///
    /// Default: 16 (32MB with 2MB granules)
    pub medium_page_granules: usize,

    /// log2 of the object alignment in small pages
    ///
    /// Default: 3 (8 bytes)
    pub small_object_alignment_shift: u32,

    /// log2 of the object alignment in medium pages
    ///
    /// Default: 12 (4KB)
    pub medium_object_alignment_shift: u32,

    /// Number of worker threads used by the relocation driver
    ///
    /// If None, uses min(4, num_cpus).
    /// Default: Auto-detect
    pub relocation_workers: Option<usize>,

    /// Maximum backoff rounds while waiting for a page to be released
    ///
    /// Default: 100_000
    pub retire_spin_limit: usize,

    /// Enable verbose console logging of relocation events
    ///
    /// Default: false
    pub verbose: bool,

    /// Enable barrier and copy statistics
    ///
    /// Default: true
    pub stats_enabled: bool,
}

impl Default for RelocConfig {
    fn default() -> Self {
        RelocConfig {
            heap_size: 64 * MB,
            granule_shift: 21,
            offset_bits: 42,
            medium_page_granules: 16,
            small_object_alignment_shift: 3,
            medium_object_alignment_shift: 12,
            relocation_workers: None,
            retire_spin_limit: 100_000,
            verbose: false,
            stats_enabled: true,
        }
    }
}

impl RelocConfig {
    /// Validate configuration
    ///
    /// Checks that the geometry is internally consistent and that every page
    /// class can be described by a forwarding entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_GRANULE_SHIFT..=MAX_GRANULE_SHIFT).contains(&self.granule_shift) {
            return Err(ConfigError::InvalidGranule(format!(
                "granule_shift must be between {} and {}",
                MIN_GRANULE_SHIFT, MAX_GRANULE_SHIFT
            )));
        }

        if self.offset_bits <= self.granule_shift || self.offset_bits > TO_OFFSET_BITS {
            return Err(ConfigError::InvalidOffsetBits(format!(
                "offset_bits must be in ({}, {}]",
                self.granule_shift, TO_OFFSET_BITS
            )));
        }

        let granule = self.granule_size();
        if self.heap_size == 0 || self.heap_size % granule != 0 {
            return Err(ConfigError::InvalidHeapSize(format!(
                "heap_size must be a non-zero multiple of the granule size ({} bytes)",
                granule
            )));
        }

        if (self.heap_size as u64) > (1u64 << self.offset_bits) {
            return Err(ConfigError::InvalidHeapSize(
                "heap_size exceeds the offset address range".to_string(),
            ));
        }

        if self.medium_page_granules < 2 || !self.medium_page_granules.is_power_of_two() {
            return Err(ConfigError::InvalidPageGeometry(
                "medium_page_granules must be a power of two >= 2".to_string(),
            ));
        }

        if self.medium_page_size() > self.heap_size {
            return Err(ConfigError::InvalidPageGeometry(
                "medium page does not fit in the heap".to_string(),
            ));
        }

        self.validate_alignment(
            "small_object_alignment_shift",
            self.small_object_alignment_shift,
            self.small_page_size(),
        )?;
        self.validate_alignment(
            "medium_object_alignment_shift",
            self.medium_object_alignment_shift,
            self.medium_page_size(),
        )?;

        if let Some(workers) = self.relocation_workers {
            if workers == 0 {
                return Err(ConfigError::InvalidWorkers(
                    "relocation_workers must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn validate_alignment(
        &self,
        name: &str,
        shift: u32,
        page_size: usize,
    ) -> Result<(), ConfigError> {
        if shift < WORD_SHIFT || (1usize << shift) >= page_size {
            return Err(ConfigError::InvalidAlignment(format!(
                "{} must be at least {} and below the page size",
                name, WORD_SHIFT
            )));
        }

        if (page_size >> shift) > (1usize << FROM_INDEX_BITS) {
            return Err(ConfigError::InvalidAlignment(format!(
                "{}: page holds more than 2^{} object indices",
                name, FROM_INDEX_BITS
            )));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with:
    /// - ZRELOC_HEAP_SIZE
    /// - ZRELOC_GRANULE_SHIFT
    /// - ZRELOC_OFFSET_BITS
    /// - ZRELOC_WORKERS
    /// - ZRELOC_VERBOSE
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ZRELOC_HEAP_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.heap_size = size;
            }
        }

        if let Ok(val) = std::env::var("ZRELOC_GRANULE_SHIFT") {
            if let Ok(shift) = val.parse::<u32>() {
                config.granule_shift = shift;
            }
        }

        if let Ok(val) = std::env::var("ZRELOC_OFFSET_BITS") {
            if let Ok(bits) = val.parse::<u32>() {
                config.offset_bits = bits;
            }
        }

        if let Ok(val) = std::env::var("ZRELOC_WORKERS") {
            if let Ok(workers) = val.parse::<usize>() {
                config.relocation_workers = Some(workers);
            }
        }

        if let Ok(val) = std::env::var("ZRELOC_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Granule size in bytes (also the small page size)
    pub fn granule_size(&self) -> usize {
        1usize << self.granule_shift
    }

    /// Small page size in bytes
    pub fn small_page_size(&self) -> usize {
        self.granule_size()
    }

    /// Medium page size in bytes
    pub fn medium_page_size(&self) -> usize {
        self.granule_size() * self.medium_page_granules
    }

    /// Largest object placed in a small page
    pub fn small_object_limit(&self) -> usize {
        self.small_page_size() / 8
    }

    /// Largest object placed in a medium page
    pub fn medium_object_limit(&self) -> usize {
        self.medium_page_size() / 8
    }

    /// Number of relocation workers after auto-detection
    pub fn workers(&self) -> usize {
        self.relocation_workers
            .unwrap_or_else(|| num_cpus::get().clamp(1, 4))
    }

    /// Address layout (offset mask and metadata bits) for this configuration
    pub fn address_layout(&self) -> AddressLayout {
        AddressLayout::new(self.offset_bits)
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid heap size: {0}")]
    InvalidHeapSize(String),

    #[error("Invalid granule: {0}")]
    InvalidGranule(String),

    #[error("Invalid offset bits: {0}")]
    InvalidOffsetBits(String),

    #[error("Invalid page geometry: {0}")]
    InvalidPageGeometry(String),

    #[error("Invalid object alignment: {0}")]
    InvalidAlignment(String),

    #[error("Invalid relocation workers: {0}")]
    InvalidWorkers(String),
}

// ============================================================================
// CONSTANTS
// ============================================================================

const MB: usize = 1024 * 1024;

const WORD_SHIFT: u32 = 3;
const MIN_GRANULE_SHIFT: u32 = 12;
const MAX_GRANULE_SHIFT: u32 = 30;
