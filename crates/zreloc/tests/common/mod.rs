//! Test Utilities for the zreloc Integration Suite
//!
//! Fixtures build a small heap (4KB granules) so that pages, tables and
//! probe sequences stay small enough to reason about by hand.
//!
//! ============================================================================
//! Assertions are strict: an object is only considered relocated if its copy
//! holds exactly the payload written before the cycle.
//! ============================================================================

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zreloc::heap::{Page, PageSizeClass, SizeHeaderModel};
use zreloc::{AddressLayout, ColoredAddress, RelocConfig, Runtime};

/// Granule shift of test heaps (4KB)
pub const GRANULE_SHIFT: u32 = 12;

/// Small page size of test heaps
pub const SMALL_PAGE: usize = 1 << GRANULE_SHIFT;

/// Medium page size of test heaps (4 granules)
pub const MEDIUM_PAGE: usize = 4 * SMALL_PAGE;

/// Heap configuration shared by all integration tests
pub fn test_config(heap_size: usize) -> RelocConfig {
    RelocConfig {
        heap_size,
        granule_shift: GRANULE_SHIFT,
        medium_page_granules: 4,
        medium_object_alignment_shift: 5,
        relocation_workers: Some(4),
        retire_spin_limit: 10_000,
        verbose: false,
        ..Default::default()
    }
}

// ============================================================================
// FIXTURE
// ============================================================================

/// A live object allocated by the fixture
#[derive(Debug, Clone, Copy)]
pub struct TestObject {
    pub offset: u64,
    pub size: usize,
    /// Value stored in the second word
    pub payload: u64,
}

/// Runtime plus helpers to populate pages
pub struct RelocFixture {
    pub runtime: Runtime,
}

impl RelocFixture {
    /// Fixture with a 1MB heap
    ///
    /// **Bug this finds:** Initialization and geometry validation failures
    pub fn new() -> Self {
        Self::with_heap_size(1024 * 1024)
    }

    pub fn with_heap_size(heap_size: usize) -> Self {
        let runtime = Runtime::new(test_config(heap_size))
            .expect("runtime initialization should succeed with a valid config");
        Self { runtime }
    }

    pub fn layout(&self) -> AddressLayout {
        *self.runtime.heap().layout()
    }

    /// Allocate a page of `class`
    pub fn page(&self, class: PageSizeClass) -> Arc<Page> {
        let size = match class {
            PageSizeClass::Small => SMALL_PAGE,
            PageSizeClass::Medium => MEDIUM_PAGE,
            PageSizeClass::Large => 2 * SMALL_PAGE,
        };
        self.runtime
            .heap()
            .alloc_page(class, size)
            .unwrap_or_else(|e| panic!("{} page allocation failed: {:?}", class, e))
    }

    /// Allocate `count` objects of `size` bytes with distinct payloads
    ///
    /// **Bug this finds:** Bump allocation overlap, header corruption
    pub fn fill(&self, page: &Page, count: usize, size: usize) -> Vec<TestObject> {
        let heap = self.runtime.heap();
        (0..count)
            .map(|i| {
                let offset = SizeHeaderModel
                    .allocate(heap, page, size)
                    .unwrap_or_else(|| panic!("page {:#x} full after {} objects", page.start(), i));
                let payload = page.start() ^ ((i as u64 + 1) << 32);
                heap.write_word(offset + 8, payload);
                TestObject {
                    offset,
                    size,
                    payload,
                }
            })
            .collect()
    }

    /// Record `objects` as live on `page`
    pub fn mark_live(&self, page: &Page, objects: &[TestObject]) {
        for obj in objects {
            page.mark_object_live(obj.offset, obj.size);
        }
    }

    /// Reference field holding the good address of `obj` under the current view
    pub fn field(&self, obj: &TestObject) -> AtomicU64 {
        AtomicU64::new(self.runtime.reference(obj.offset).raw())
    }

    /// Run mark start / mark end
    ///
    /// Records `pages` liveness and recolors `fields` through the barrier the
    /// way marking would.
    pub fn run_mark(&self, pages: &[(&Page, &[TestObject])], fields: &[&AtomicU64]) {
        self.runtime.start_mark().expect("mark start");
        for (page, objects) in pages {
            self.mark_live(page, objects);
        }
        for field in fields {
            let good = self.runtime.load(ColoredAddress::load(field));
            field.store(good.raw(), Ordering::Release);
        }
        self.runtime.end_mark().expect("mark end");
    }
}

impl Default for RelocFixture {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// STRICT ASSERTIONS
// ============================================================================

/// Assert that `addr` points at an intact copy of `obj`
///
/// **Bug this finds:** Partial copies, copies published before the data
#[track_caller]
pub fn assert_object_intact(fixture: &RelocFixture, addr: ColoredAddress, obj: &TestObject) {
    let heap = fixture.runtime.heap();
    let offset = addr.offset(heap.layout());
    assert_eq!(
        heap.read_word(offset),
        obj.size as u64,
        "header of object {:#x} at {:#x} corrupted",
        obj.offset,
        offset
    );
    assert_eq!(
        heap.read_word(offset + 8),
        obj.payload,
        "payload of object {:#x} at {:#x} corrupted",
        obj.offset,
        offset
    );
}

/// Assert that all offsets are distinct
///
/// **Bug this finds:** Two objects relocated to the same target
#[track_caller]
pub fn assert_offsets_unique(offsets: &[u64], context: &str) {
    let mut sorted = offsets.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(
        sorted.len(),
        offsets.len(),
        "{}: {} duplicate offsets",
        context,
        offsets.len() - sorted.len()
    );
}
