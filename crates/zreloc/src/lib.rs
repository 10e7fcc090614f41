//! # zreloc - Concurrent Relocation Core
//!
//! zreloc implements the relocation half of a ZGC-style collector: colored
//! addresses, per-page forwarding records, a granule-indexed forwarding table
//! and the load barrier that redirects stale references to moved objects
//! while application threads keep running.
//!
//! ## Overview
//!
//! - **Colored Addresses**: Collector metadata (Marked0, Marked1, Remapped,
//!   Finalizable) stored in the bits above the heap offset
//! - **Forwarding Records**: Lock-free open-addressed table per relocating
//!   page, co-located with its header in one allocation
//! - **Load Barrier**: Single mask test on the fast path; forwarding lookup and
//!   self-healing on the slow path
//! - **Explicit Phase Views**: The masks of the current phase are an immutable
//!   [`AddressView`] passed to every call, never process globals
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use zreloc::heap::{PageSizeClass, SizeHeaderModel};
//! use zreloc::{RelocConfig, Runtime};
//!
//! fn main() -> Result<(), zreloc::RelocError> {
//!     let rt = Runtime::new(RelocConfig {
//!         heap_size: 1024 * 1024,
//!         granule_shift: 12,
//!         medium_page_granules: 4,
//!         medium_object_alignment_shift: 5,
//!         ..Default::default()
//!     })?;
//!
//!     let page = rt.heap().alloc_page(PageSizeClass::Small, 4096)?;
//!     let obj = SizeHeaderModel.allocate(rt.heap(), &page, 16).unwrap();
//!
//!     rt.start_mark()?;
//!     page.mark_object_live(obj, 16);
//!     let marked = rt.reference(obj);
//!     rt.end_mark()?;
//!
//!     rt.start_relocation(&[Arc::clone(&page)])?;
//!     rt.relocate()?;
//!
//!     // The stale reference resolves to the copy
//!     let moved = rt.load(marked);
//!     assert_ne!(moved.offset(rt.heap().layout()), obj);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! load(ref) ──> Barrier ── weak-good / null ──> good_or_null(ref)
//!                  │
//!                  └── stale ──> ForwardingTable.get(offset)
//!                                     │
//!                                     ▼
//!                              ForwardingRecord.find(index)
//!                                     │
//!                     ┌───────────────┴────────────────┐
//!                 forwarded                      not forwarded
//!                     │                                │
//!              good(to_offset)              good(ref) / copy + insert
//! ```
//!
//! ### Cycle
//!
//! 1. **Mark Start**: Marked bit alternates and becomes the good color
//! 2. **Mark End**: Host has recorded liveness on every page
//! 3. **Relocate Start**: Records installed, then Remapped becomes good
//! 4. **Concurrent Relocate**: Workers and barriers copy live objects
//! 5. **Next Mark**: Stale references remapped through the records
//! 6. **Retire**: Records removed, source pages freed
//!
//! ## Modules
//!
//! - [`barrier`]: Address layout, phase views, colored addresses, load barrier
//! - [`config`]: Heap geometry and address layout configuration
//! - [`error`]: Error types for all zreloc operations
//! - [`heap`]: Word arena, pages, object model
//! - [`logging`]: Structured relocation events
//! - [`phase`]: Phase controller publishing address views
//! - [`relocate`]: Forwarding records, table, relocator and driver
//! - [`runtime`]: All of the above wired for one heap
//! - [`snapshot`]: Serializable diagnostics
//! - [`util`]: Alignment, atomics, attached arrays, hashing

// Core
pub mod config;
pub mod error;

// Memory
pub mod heap;

// Relocation components
pub mod barrier;
pub mod phase;
pub mod relocate;

// Wiring and diagnostics
pub mod logging;
pub mod runtime;
pub mod snapshot;

// Utilities
pub mod util;

pub use barrier::{AddressLayout, AddressView, Barrier, Color, ColoredAddress, GlobalPhase};
pub use config::{ConfigError, RelocConfig};
pub use error::{RelocError, Result};
pub use phase::PhaseController;
pub use relocate::{
    ForwardingCursor, ForwardingEntry, ForwardingRecord, ForwardingTable, RelocationDriver,
    Relocator,
};
pub use runtime::Runtime;

/// zreloc version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create a runtime with configuration from `ZRELOC_*` environment variables
///
/// # Examples
///
/// ```rust
/// let runtime = zreloc::init()?;
/// assert!(runtime.table().is_empty());
/// # Ok::<(), zreloc::RelocError>(())
/// ```
pub fn init() -> Result<Runtime> {
    Runtime::new(RelocConfig::from_env())
}

/// Create a runtime with a custom configuration
pub fn init_with_config(config: RelocConfig) -> Result<Runtime> {
    Runtime::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_config() {
        let config = RelocConfig {
            heap_size: 1024 * 1024,
            granule_shift: 12,
            medium_page_granules: 4,
            medium_object_alignment_shift: 5,
            ..Default::default()
        };
        assert!(init_with_config(config).is_ok());
    }

    #[test]
    fn test_default_config_validates() {
        assert!(RelocConfig::default().validate().is_ok());
    }

    #[test]
    fn test_version_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
