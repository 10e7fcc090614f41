//! Relocate Module - Forwarding & Object Relocation
//!
//! Concurrent relocation moves the live objects of selected pages to fresh
//! target pages while mutators keep running. Every selected page gets a
//! forwarding record mapping old object indices to new offsets; the
//! forwarding table finds the record for any offset.
//!
//! Relocation Strategy:
//! 1. Driver installs a record per selected page
//! 2. Workers (and mutators, through the barrier) copy live objects and
//!    insert forwarding entries; the first insert for an object wins
//! 3. Barriers resolve stale references through the records
//! 4. After the next mark has remapped stale references, records are retired
//!    and the source pages freed
//!
//! Resolution:
//! - [`Relocator::forward`] - new address if forwarded
//! - [`Relocator::relocate`] - new address, or the same object recolored
//! - [`Relocator::relocate_object`] - copy if not yet forwarded

pub mod copy;
pub mod driver;
pub mod entry;
pub mod forwarding;
pub mod table;
pub mod target;

pub use copy::{CopyStats, CopyStatsSnapshot};
pub use driver::{RelocationDriver, RelocationProgress, RelocationSummary};
pub use entry::ForwardingEntry;
pub use forwarding::{ForwardingCursor, ForwardingRecord, RetainGuard};
pub use table::ForwardingTable;
pub use target::TargetAllocator;

use crate::barrier::address_space::AddressView;
use crate::barrier::colored_ptr::ColoredAddress;
use crate::error::{RelocError, Result};
use crate::heap::{Heap, ObjectModel};
use std::sync::Arc;

/// Relocator - resolves and performs object relocation
pub struct Relocator {
    heap: Arc<Heap>,
    model: Arc<dyn ObjectModel>,
    targets: TargetAllocator,
    stats: CopyStats,
}

impl Relocator {
    pub fn new(heap: Arc<Heap>, model: Arc<dyn ObjectModel>) -> Self {
        Self {
            targets: TargetAllocator::new(Arc::clone(&heap)),
            heap,
            model,
            stats: CopyStats::new(),
        }
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    pub fn targets(&self) -> &TargetAllocator {
        &self.targets
    }

    pub fn stats(&self) -> &CopyStats {
        &self.stats
    }

    /// New address of the object at `from_addr`, if it has been forwarded
    pub fn forward(
        &self,
        record: &ForwardingRecord,
        from_addr: ColoredAddress,
        view: &AddressView,
    ) -> Option<ColoredAddress> {
        let from_index = record.index_of(from_addr.offset(view.layout()));
        record
            .find(from_index)
            .to_offset()
            .map(|to| ColoredAddress::good_from_offset(to, view))
    }

    /// Good address of the object, wherever it currently lives
    ///
    /// Does not copy: an object that has not been forwarded yet is reported
    /// at its current offset.
    pub fn relocate(
        &self,
        record: &ForwardingRecord,
        addr: ColoredAddress,
        view: &AddressView,
    ) -> ColoredAddress {
        self.forward(record, addr, view)
            .unwrap_or_else(|| addr.good(view))
    }

    /// Relocate the object at `addr`, copying it if nobody has yet
    ///
    /// # Errors
    /// - `RelocationFailed` if the source page was already released but the
    ///   object has no forwarding entry
    /// - `OutOfMemory` if no target page can be allocated
    pub fn relocate_object(
        &self,
        record: &ForwardingRecord,
        addr: ColoredAddress,
        view: &AddressView,
    ) -> Result<ColoredAddress> {
        let offset = addr.offset(view.layout());
        let from_index = record.index_of(offset);

        let mut cursor = record.find(from_index);
        if let Some(to) = cursor.to_offset() {
            return Ok(ColoredAddress::good_from_offset(to, view));
        }

        let Some(_guard) = record.retain_guard() else {
            // Released pages have every live object forwarded
            return record
                .forwarded_offset(from_index)
                .map(|to| ColoredAddress::good_from_offset(to, view))
                .ok_or_else(|| {
                    RelocError::RelocationFailed(format!(
                        "object {:#x} on released page {:#x} was never forwarded",
                        offset,
                        record.start()
                    ))
                });
        };

        let size = self.model.object_size(&self.heap, offset);
        let (page, to) = self.targets.alloc(record.size_class(), size)?;
        self.heap.copy_object(offset, to, size);

        let winner = record.insert(from_index, to, &mut cursor);
        if winner == to {
            self.stats.record_copy(size);
        } else {
            let undone = self.targets.undo(&page, to, size);
            self.stats.record_race_lost(undone);
            log::trace!(
                "lost relocation race for {:#x}: {:#x} beat {:#x}",
                offset,
                winner,
                to
            );
        }

        Ok(ColoredAddress::good_from_offset(winner, view))
    }
}

impl std::fmt::Debug for Relocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relocator")
            .field("heap", &self.heap)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
