//! Runtime - Wired Relocation Core
//!
//! Bundles the heap, forwarding table, relocator, barrier, phase controller
//! and relocation driver of one heap, and exposes the cycle in phase order:
//!
//! ```text
//! start_mark -> end_mark -> start_relocation(pages) -> relocate
//!            -> start_mark -> end_mark -> retire -> ...
//! ```
//!
//! The host still decides liveness (through [`Page::mark_object_live`]) and
//! which pages to relocate.

use crate::barrier::{AddressView, Barrier, ColoredAddress, GlobalPhase};
use crate::config::RelocConfig;
use crate::error::{RelocError, Result};
use crate::heap::{Heap, ObjectModel, Page, SizeHeaderModel};
use crate::logging::{RelocLogger, RelocLoggerConfig};
use crate::phase::PhaseController;
use crate::relocate::{
    ForwardingTable, RelocationDriver, RelocationProgress, RelocationSummary, Relocator,
};
use crate::snapshot::TableSnapshot;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Runtime - one heap and its relocation machinery
pub struct Runtime {
    heap: Arc<Heap>,
    table: Arc<ForwardingTable>,
    barrier: Barrier,
    phases: PhaseController,
    driver: RelocationDriver,
    logger: Arc<RelocLogger>,
}

impl Runtime {
    /// Create a runtime whose objects carry their size in the first word
    pub fn new(config: RelocConfig) -> Result<Self> {
        Self::with_model(config, Arc::new(SizeHeaderModel))
    }

    /// Create a runtime with a host object model
    pub fn with_model(config: RelocConfig, model: Arc<dyn ObjectModel>) -> Result<Self> {
        let logger = Arc::new(RelocLogger::new(RelocLoggerConfig::from_config(&config)));
        let heap = Arc::new(Heap::new(config)?);
        let layout = *heap.layout();

        let table = Arc::new(ForwardingTable::new(heap.config().granule_shift));
        let relocator = Arc::new(Relocator::new(Arc::clone(&heap), model));
        let barrier = Barrier::new(Arc::clone(&table), Arc::clone(&relocator));
        let driver = RelocationDriver::new(Arc::clone(&heap), Arc::clone(&table), relocator)
            .with_logger(Arc::clone(&logger));
        let phases = PhaseController::new(layout).with_logger(Arc::clone(&logger));

        Ok(Self {
            heap,
            table,
            barrier,
            phases,
            driver,
            logger,
        })
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    pub fn table(&self) -> &Arc<ForwardingTable> {
        &self.table
    }

    pub fn barrier(&self) -> &Barrier {
        &self.barrier
    }

    pub fn phases(&self) -> &PhaseController {
        &self.phases
    }

    pub fn driver(&self) -> &RelocationDriver {
        &self.driver
    }

    pub fn logger(&self) -> &Arc<RelocLogger> {
        &self.logger
    }

    /// Current address view
    pub fn view(&self) -> AddressView {
        self.phases.view()
    }

    // ========================================================================
    // Cycle
    // ========================================================================

    /// Begin marking
    pub fn start_mark(&self) -> Result<AddressView> {
        self.phases.flip_to_marked()
    }

    /// Finish marking
    pub fn end_mark(&self) -> Result<AddressView> {
        self.phases.mark_completed()
    }

    /// Install forwarding for `pages` and enter the Relocate phase
    ///
    /// # Errors
    /// - `InvalidState` unless marking has completed
    /// - Errors of [`RelocationDriver::prepare`]
    pub fn start_relocation(&self, pages: &[Arc<Page>]) -> Result<AddressView> {
        let phase = self.phases.phase();
        if phase != GlobalPhase::MarkCompleted {
            return Err(RelocError::InvalidState {
                expected: GlobalPhase::MarkCompleted.to_string(),
                actual: phase.to_string(),
            });
        }

        self.driver.prepare(pages)?;
        self.phases.flip_to_remapped()
    }

    /// Relocate the whole relocation set with the driver's workers
    pub fn relocate(&self) -> Result<RelocationProgress> {
        self.driver.relocate_all(&self.view())
    }

    /// Free the previous cycle's source pages
    pub fn retire(&self) -> Result<RelocationSummary> {
        self.driver.retire(&self.view())
    }

    // ========================================================================
    // Barrier shortcuts
    // ========================================================================

    /// Run the load barrier with the current view
    pub fn load(&self, addr: ColoredAddress) -> ColoredAddress {
        self.barrier.load(addr, &self.view())
    }

    /// Load and heal a reference field with the current view
    pub fn load_slot(&self, slot: &AtomicU64) -> ColoredAddress {
        self.barrier.load_slot(slot, &self.view())
    }

    /// Load and heal a reference field, relocating its object if needed
    pub fn load_slot_or_relocate(&self, slot: &AtomicU64) -> Result<ColoredAddress> {
        self.barrier.load_slot_or_relocate(slot, &self.view())
    }

    /// Good reference to a freshly allocated object
    pub fn reference(&self, offset: u64) -> ColoredAddress {
        ColoredAddress::good_from_offset(offset, &self.view())
    }

    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot::capture(&self.table)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("heap", &self.heap)
            .field("phase", &self.phases.phase())
            .field("relocation_set", &self.driver.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::PageSizeClass;

    fn runtime() -> Runtime {
        Runtime::new(RelocConfig {
            heap_size: 128 * 1024,
            granule_shift: 12,
            medium_page_granules: 4,
            medium_object_alignment_shift: 5,
            relocation_workers: Some(2),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_starts_in_relocate_with_empty_table() {
        let rt = runtime();
        assert_eq!(rt.view().phase(), GlobalPhase::Relocate);
        assert!(rt.table().is_empty());
    }

    #[test]
    fn test_start_relocation_requires_mark_completed() {
        let rt = runtime();
        let result = rt.start_relocation(&[]);
        assert!(matches!(result, Err(RelocError::InvalidState { .. })));
    }

    #[test]
    fn test_cycle_moves_referenced_object() {
        let rt = runtime();
        let heap = rt.heap();
        let page = heap.alloc_page(PageSizeClass::Small, 4096).unwrap();
        let obj = SizeHeaderModel.allocate(heap, &page, 32).unwrap();
        heap.write_word(obj + 8, 1234);
        let field = AtomicU64::new(rt.reference(obj).raw());

        rt.start_mark().unwrap();
        page.mark_object_live(obj, 32);
        // Marking leaves the field with the marked color
        field.store(rt.reference(obj).raw(), std::sync::atomic::Ordering::Release);
        rt.end_mark().unwrap();

        rt.start_relocation(&[Arc::clone(&page)]).unwrap();
        rt.relocate().unwrap();

        let moved = rt.load_slot(&field);
        assert_ne!(moved.offset(heap.layout()), obj);
        assert_eq!(heap.read_word(moved.offset(heap.layout()) + 8), 1234);

        rt.start_mark().unwrap();
        rt.end_mark().unwrap();
        let summary = rt.retire().unwrap();
        assert_eq!(summary.pages_retired, 1);
        assert!(rt.snapshot().records.is_empty());
    }
}
