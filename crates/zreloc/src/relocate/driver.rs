//! Relocation Driver - Relocation Set Lifecycle
//!
//! Drives one relocation cycle over a host-selected set of pages:
//!
//! 1. `prepare` - create a forwarding record per page and install it in the
//!    table (during MarkCompleted, before the Relocate flip)
//! 2. `relocate_all` - worker threads copy every live object (Relocate)
//! 3. `finish` - drop the driver's reference on every source page
//! 4. `retire` - after the next mark has remapped stale references, wait for
//!    outstanding claims, uninstall the records and free the source pages
//!
//! Mutators may relocate objects concurrently through the barrier; whoever
//! inserts the forwarding entry first wins.

use crate::barrier::address_space::{AddressView, GlobalPhase};
use crate::barrier::colored_ptr::ColoredAddress;
use crate::error::{RelocError, Result};
use crate::heap::{Heap, Page, PageSizeClass};
use crate::logging::{RelocEvent, RelocLogger};
use crate::relocate::copy::CopyStatsSnapshot;
use crate::relocate::forwarding::ForwardingRecord;
use crate::relocate::table::ForwardingTable;
use crate::relocate::Relocator;
use crate::util::AtomicUtils;
use crossbeam_deque::{Injector, Steal};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A page in the relocation set and its forwarding record
struct RelocationPage {
    page: Arc<Page>,
    record: Arc<ForwardingRecord>,

    /// Driver reference already dropped
    released: AtomicBool,

    /// Every live object forwarded by a driver pass
    relocated: AtomicBool,
}

impl RelocationPage {
    fn release_once(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.record.release();
        }
    }

    fn is_relocated(&self) -> bool {
        self.relocated.load(Ordering::Acquire)
            && self.record.populated_entries().len() >= self.page.live_objects()
    }
}

/// Result of [`RelocationDriver::relocate_all`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelocationProgress {
    /// Pages processed
    pub pages: usize,
    /// Live objects resolved (copied here or by a mutator)
    pub objects: u64,
    pub duration_ms: f64,
}

/// Result of [`RelocationDriver::retire`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelocationSummary {
    pub pages_retired: usize,
    pub bytes_freed: usize,
    /// Forwarding entries across the retired records
    pub objects_forwarded: usize,
    /// Copy counters for the cycle
    pub copy: CopyStatsSnapshot,
}

/// RelocationDriver - owner of the relocation set
pub struct RelocationDriver {
    heap: Arc<Heap>,
    table: Arc<ForwardingTable>,
    relocator: Arc<Relocator>,
    workers: usize,
    retire_spin_limit: usize,
    set: Mutex<Vec<Arc<RelocationPage>>>,
    logger: Option<Arc<RelocLogger>>,
}

impl RelocationDriver {
    pub fn new(heap: Arc<Heap>, table: Arc<ForwardingTable>, relocator: Arc<Relocator>) -> Self {
        let config = heap.config();
        Self {
            workers: config.workers(),
            retire_spin_limit: config.retire_spin_limit,
            heap,
            table,
            relocator,
            set: Mutex::new(Vec::new()),
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<RelocLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn table(&self) -> &Arc<ForwardingTable> {
        &self.table
    }

    pub fn relocator(&self) -> &Arc<Relocator> {
        &self.relocator
    }

    /// Records of the current relocation set
    pub fn records(&self) -> Vec<Arc<ForwardingRecord>> {
        self.set
            .lock()
            .iter()
            .map(|entry| Arc::clone(&entry.record))
            .collect()
    }

    /// Number of pages in the relocation set
    pub fn len(&self) -> usize {
        self.set.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.lock().is_empty()
    }

    fn log(&self, event: RelocEvent) {
        if let Some(logger) = &self.logger {
            logger.log(event);
        }
    }

    // ========================================================================
    // Preparation
    // ========================================================================

    /// Add `pages` to the relocation set
    ///
    /// Creates a record sized from each page's live object count and installs
    /// it in the forwarding table. Nothing is installed if any page fails.
    ///
    /// # Errors
    /// - `InvalidArgument` for large pages
    /// - `ForwardingTableError` if a page is already being relocated
    pub fn prepare(&self, pages: &[Arc<Page>]) -> Result<usize> {
        if let Some(large) = pages
            .iter()
            .find(|page| page.size_class() == PageSizeClass::Large)
        {
            return Err(RelocError::InvalidArgument(format!(
                "large page {:#x} cannot be relocated",
                large.start()
            )));
        }

        // Objects must not be copied into a page that is itself evacuated
        self.relocator.targets().retire_current();

        let mut installed: Vec<Arc<RelocationPage>> = Vec::with_capacity(pages.len());
        let result = pages.iter().try_for_each(|page| -> Result<()> {
            let record = Arc::new(ForwardingRecord::new(
                page.start(),
                page.size(),
                page.size_class(),
                page.object_alignment_shift(),
                page.live_objects(),
            )?);
            self.table.insert(Arc::clone(&record))?;

            log::debug!(
                "forwarding installed for {} page {:#x}: {} live objects, {} slots",
                page.size_class(),
                page.start(),
                page.live_objects(),
                record.capacity()
            );
            self.log(RelocEvent::RecordInstalled {
                start: page.start(),
                size: page.size(),
                size_class: page.size_class(),
                capacity: record.capacity(),
            });

            installed.push(Arc::new(RelocationPage {
                page: Arc::clone(page),
                record,
                released: AtomicBool::new(false),
                relocated: AtomicBool::new(false),
            }));
            Ok(())
        });

        if let Err(e) = result {
            for entry in &installed {
                self.table.remove(&entry.record);
            }
            return Err(e);
        }

        let count = installed.len();
        self.set.lock().extend(installed);
        Ok(count)
    }

    // ========================================================================
    // Relocation
    // ========================================================================

    fn relocate_page(&self, entry: &RelocationPage, view: &AddressView) -> Result<u64> {
        let mut objects = 0;
        let mut result = Ok(());

        entry.page.for_each_live_object(|offset| {
            if result.is_err() {
                return;
            }
            let addr = ColoredAddress::good_from_offset(offset, view);
            match self.relocator.relocate_object(&entry.record, addr, view) {
                Ok(_) => objects += 1,
                Err(e) => result = Err(e),
            }
        });

        result?;
        entry.relocated.store(true, Ordering::Release);
        Ok(objects)
    }

    /// Relocate every live object of the relocation set
    ///
    /// Pages are distributed over the worker threads; a page's driver
    /// reference is dropped once all its live objects are forwarded.
    ///
    /// # Errors
    /// - `InvalidState` outside the Relocate phase
    /// - The first error a worker hit (typically `OutOfMemory`)
    pub fn relocate_all(&self, view: &AddressView) -> Result<RelocationProgress> {
        if !view.is_relocating() {
            return Err(RelocError::InvalidState {
                expected: GlobalPhase::Relocate.to_string(),
                actual: view.phase().to_string(),
            });
        }

        let start = Instant::now();
        let injector = Injector::new();
        let pending: Vec<Arc<RelocationPage>> = self
            .set
            .lock()
            .iter()
            .filter(|entry| !entry.relocated.load(Ordering::Acquire))
            .cloned()
            .collect();
        let pages = pending.len();
        for entry in pending {
            injector.push(entry);
        }

        let objects = AtomicU64::new(0);
        let failure: Mutex<Option<RelocError>> = Mutex::new(None);
        let workers = self.workers.min(pages).max(1);

        crossbeam::scope(|s| {
            for _ in 0..workers {
                s.spawn(|_| loop {
                    match injector.steal() {
                        Steal::Success(entry) => match self.relocate_page(&entry, view) {
                            Ok(count) => {
                                objects.fetch_add(count, Ordering::Relaxed);
                                entry.release_once();
                            }
                            Err(e) => {
                                failure.lock().get_or_insert(e);
                            }
                        },
                        Steal::Empty => break,
                        Steal::Retry => continue,
                    }
                });
            }
        })
        .map_err(|_| RelocError::RelocationFailed("relocation worker panicked".to_string()))?;

        if let Some(e) = failure.into_inner() {
            log::warn!("relocation failed: {}", e);
            self.log(RelocEvent::Failure {
                operation: "relocate".to_string(),
                reason: e.to_string(),
            });
            return Err(e);
        }

        let progress = RelocationProgress {
            pages,
            objects: objects.into_inner(),
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        let copy = self.relocator.stats().snapshot();
        log::debug!(
            "relocated {} objects from {} pages with {} workers",
            progress.objects,
            progress.pages,
            workers
        );
        self.log(RelocEvent::RelocationCompleted {
            pages: progress.pages,
            objects: progress.objects,
            bytes: copy.bytes_copied,
            duration_ms: progress.duration_ms,
        });
        Ok(progress)
    }

    /// Drop the driver's reference on every page still holding one
    pub fn finish(&self) {
        for entry in self.set.lock().iter() {
            entry.release_once();
        }
    }

    // ========================================================================
    // Retirement
    // ========================================================================

    /// Uninstall the relocation set and free its source pages
    ///
    /// Only valid once marking after the relocation has completed, so that no
    /// stale reference into the source pages remains, and once every page of
    /// the set has been fully relocated.
    ///
    /// # Errors
    /// - `InvalidState` outside MarkCompleted
    /// - `RelocationFailed` if a page still holds live objects without a
    ///   forwarding entry; nothing is retired and the set is left installed
    /// - `Timeout` if a page is still claimed after the spin limit; pages not
    ///   yet retired stay in the set
    pub fn retire(&self, view: &AddressView) -> Result<RelocationSummary> {
        if view.phase() != GlobalPhase::MarkCompleted {
            return Err(RelocError::InvalidState {
                expected: GlobalPhase::MarkCompleted.to_string(),
                actual: view.phase().to_string(),
            });
        }

        let unfinished = self
            .set
            .lock()
            .iter()
            .find(|entry| !entry.is_relocated())
            .map(|entry| {
                (
                    entry.page.start(),
                    entry.record.populated_entries().len(),
                    entry.page.live_objects(),
                )
            });
        if let Some((start, forwarded, live)) = unfinished {
            let err = RelocError::RelocationFailed(format!(
                "page {:#x} not relocated: {} of {} live objects forwarded",
                start, forwarded, live
            ));
            log::warn!("retire refused: {}", err);
            self.log(RelocEvent::Failure {
                operation: "retire".to_string(),
                reason: err.to_string(),
            });
            return Err(err);
        }

        self.finish();
        let entries = std::mem::take(&mut *self.set.lock());
        let mut summary = RelocationSummary::default();

        for (i, entry) in entries.iter().enumerate() {
            let record = &entry.record;
            if !AtomicUtils::spin_wait(|| !record.is_retained(), self.retire_spin_limit) {
                self.set.lock().extend(entries[i..].iter().cloned());
                let err = RelocError::Timeout(format!(
                    "page {:#x} still retained ({} claims)",
                    record.start(),
                    record.ref_count()
                ));
                self.log(RelocEvent::Failure {
                    operation: "retire".to_string(),
                    reason: err.to_string(),
                });
                return Err(err);
            }

            self.table.remove(record);
            self.heap.free_page(&entry.page)?;

            let forwarded = record.populated_entries().len();
            summary.pages_retired += 1;
            summary.bytes_freed += entry.page.size();
            summary.objects_forwarded += forwarded;

            log::debug!("retired page {:#x} ({} forwarded)", record.start(), forwarded);
            self.log(RelocEvent::RecordRetired {
                start: record.start(),
                forwarded,
            });
        }

        summary.copy = self.relocator.stats().snapshot();
        self.relocator.stats().reset();
        Ok(summary)
    }
}

impl std::fmt::Debug for RelocationDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelocationDriver")
            .field("pages", &self.len())
            .field("workers", &self.workers)
            .finish()
    }
}
