//! Load Barrier Implementation
//!
//! Every reference loaded from the heap goes through [`Barrier::load`] with
//! the current [`AddressView`]:
//!
//! ```text
//! load(addr)
//!   ├─ weak-good or null ──────────────> good_or_null(addr)      (fast)
//!   └─ otherwise: addr must be a heap reference
//!        ├─ phase == Relocate ─────────> relocate(addr)          (Slow-Relocate)
//!        └─ Mark / MarkCompleted ──────> forward(addr) or good   (Slow-Remap)
//! ```
//!
//! A reference whose page has no forwarding record never moved, so it is
//! recolored in place. The slot variants write the resolved address back
//! into the field (self-healing), so the next load takes the fast path.

use crate::assert_context;
use crate::barrier::address_space::AddressView;
use crate::barrier::colored_ptr::ColoredAddress;
use crate::barrier::stats::{BarrierCounters, BarrierStats};
use crate::error::Result;
use crate::relocate::{ForwardingTable, Relocator};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Barrier - load barrier over a forwarding table
pub struct Barrier {
    table: Arc<ForwardingTable>,
    relocator: Arc<Relocator>,
    counters: BarrierCounters,
    stats_enabled: bool,
}

impl Barrier {
    pub fn new(table: Arc<ForwardingTable>, relocator: Arc<Relocator>) -> Self {
        let stats_enabled = relocator.heap().config().stats_enabled;
        Self {
            table,
            relocator,
            counters: BarrierCounters::new(),
            stats_enabled,
        }
    }

    pub fn stats(&self) -> BarrierStats {
        self.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    #[inline]
    fn count<F: FnOnce(&BarrierCounters)>(&self, f: F) {
        if self.stats_enabled {
            f(&self.counters);
        }
    }

    #[inline]
    fn fast_path(&self, addr: ColoredAddress, view: &AddressView) -> Option<ColoredAddress> {
        if addr.is_weak_good_or_null(view) {
            self.count(|c| c.record_fast(addr.is_null()));
            Some(addr.good_or_null(view))
        } else {
            None
        }
    }

    fn check_in_heap(addr: ColoredAddress, view: &AddressView) {
        assert_context!(
            addr.is_in_heap(view.layout()),
            "barrier saw a non-heap reference {:#x} in phase {}",
            addr.raw(),
            view.phase()
        );
    }

    /// Resolve a loaded reference to its good address
    ///
    /// Never copies; an object that is not yet forwarded is returned at its
    /// current offset with the good color.
    ///
    /// Panics if `addr` is neither weak-good, null nor a heap reference.
    pub fn load(&self, addr: ColoredAddress, view: &AddressView) -> ColoredAddress {
        if let Some(good) = self.fast_path(addr, view) {
            return good;
        }
        self.resolve(addr, view).0
    }

    /// Slow path of [`load`](Self::load)
    ///
    /// The flag is false while the object sits unforwarded on a relocating
    /// page; such a result must not be stored back into the heap.
    fn resolve(&self, addr: ColoredAddress, view: &AddressView) -> (ColoredAddress, bool) {
        Self::check_in_heap(addr, view);

        let record = self.table.get(addr.offset(view.layout()));
        if view.is_relocating() {
            self.count(BarrierCounters::record_relocate);
            match record {
                Some(record) => match self.relocator.forward(&record, addr, view) {
                    Some(forwarded) => (forwarded, true),
                    None => (self.relocator.relocate(&record, addr, view), false),
                },
                None => (addr.good(view), true),
            }
        } else {
            self.count(BarrierCounters::record_remap);
            (self.remap(record.as_deref(), addr, view), true)
        }
    }

    fn remap(
        &self,
        record: Option<&crate::relocate::ForwardingRecord>,
        addr: ColoredAddress,
        view: &AddressView,
    ) -> ColoredAddress {
        match record.and_then(|record| self.relocator.forward(record, addr, view)) {
            Some(forwarded) => forwarded,
            None => {
                if record.is_some() {
                    log::debug!(
                        "remap of {:#x}: page is forwarding but object is not",
                        addr.raw()
                    );
                }
                addr.good(view)
            }
        }
    }

    /// Resolve a loaded reference, relocating the object if needed
    ///
    /// During Relocate an object on a relocating page that nobody has copied
    /// yet is copied by the calling thread.
    ///
    /// # Errors
    /// Errors of [`Relocator::relocate_object`], e.g. `OutOfMemory`.
    pub fn load_or_relocate(
        &self,
        addr: ColoredAddress,
        view: &AddressView,
    ) -> Result<ColoredAddress> {
        if let Some(good) = self.fast_path(addr, view) {
            return Ok(good);
        }
        Self::check_in_heap(addr, view);

        let record = self.table.get(addr.offset(view.layout()));
        if !view.is_relocating() {
            self.count(BarrierCounters::record_remap);
            return Ok(self.remap(record.as_deref(), addr, view));
        }

        self.count(BarrierCounters::record_relocate);
        let Some(record) = record else {
            return Ok(addr.good(view));
        };

        match self.relocator.forward(&record, addr, view) {
            Some(forwarded) => Ok(forwarded),
            None => {
                let relocated = self.relocator.relocate_object(&record, addr, view)?;
                self.count(BarrierCounters::record_object_relocated);
                Ok(relocated)
            }
        }
    }

    fn heal(&self, slot: &AtomicU64, stale: ColoredAddress, good: ColoredAddress) {
        if stale == good {
            return;
        }
        // A lost race means another thread stored a newer value; keep it
        if ColoredAddress::heal(slot, stale, good) == good {
            self.count(BarrierCounters::record_healed);
        }
    }

    /// Load a reference field and heal it in place
    ///
    /// A field pointing at an object that still waits to be copied is left
    /// alone; healing it would hide the stale reference from later barriers.
    pub fn load_slot(&self, slot: &AtomicU64, view: &AddressView) -> ColoredAddress {
        let addr = ColoredAddress::load(slot);
        if let Some(good) = self.fast_path(addr, view) {
            return good;
        }

        let (good, settled) = self.resolve(addr, view);
        if settled {
            self.heal(slot, addr, good);
        }
        good
    }

    /// Load a reference field, relocating its object if needed, and heal it
    pub fn load_slot_or_relocate(
        &self,
        slot: &AtomicU64,
        view: &AddressView,
    ) -> Result<ColoredAddress> {
        let addr = ColoredAddress::load(slot);
        if let Some(good) = self.fast_path(addr, view) {
            return Ok(good);
        }

        let good = self.load_or_relocate(addr, view)?;
        self.heal(slot, addr, good);
        Ok(good)
    }
}

impl std::fmt::Debug for Barrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Barrier")
            .field("table", &self.table)
            .field("stats", &self.stats())
            .finish()
    }
}
