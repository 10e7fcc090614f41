//! Heap Module - Arena, Pages and Object Storage
//!
//! The heap is a single arena of 64-bit words addressed by byte offsets.
//! Offsets are what colored addresses carry in their low bits; the arena
//! bounds-checks every access through slice indexing.
//!
//! The arena is carved into granule-aligned pages:
//! - Small pages: one granule
//! - Medium pages: `medium_page_granules` granules
//! - Large pages: as many granules as one object needs
//!
//! Page placement is a granule bump pointer with a free list per page size.
//! There is no placement policy beyond that.

pub mod object;
pub mod page;

pub use object::{ObjectModel, SizeHeaderModel};
pub use page::{Page, PageSizeClass};

use crate::barrier::address_space::AddressLayout;
use crate::config::RelocConfig;
use crate::error::{RelocError, Result};
use crate::util::Alignment;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{fence, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Granule bookkeeping guarded by the heap lock
#[derive(Debug, Default)]
struct GranuleAllocator {
    /// Next never-used granule
    next: usize,

    /// Freed page starts keyed by page length in granules
    free: IndexMap<usize, Vec<u64>>,

    /// Allocated page starts and their length in granules
    allocated: IndexMap<u64, usize>,
}

/// Heap - owned arena of atomic words
///
/// Heap Structure:
/// ```text
/// +-----------+-----------+---------------------+-----------+-----
/// | granule 0 | granule 1 | granule 2 .. 5      | granule 6 | ...
/// | Small     | Small     | Medium              | Large     |
/// +-----------+-----------+---------------------+-----------+-----
/// ```
pub struct Heap {
    config: RelocConfig,
    layout: AddressLayout,
    words: Box<[AtomicU64]>,
    allocator: Mutex<GranuleAllocator>,
    used: AtomicUsize,
}

impl Heap {
    /// Create a heap from a validated configuration
    ///
    /// # Errors
    /// `Configuration` if the configuration is invalid.
    pub fn new(config: RelocConfig) -> Result<Self> {
        config.validate()?;

        let words = (0..config.heap_size / Alignment::WORD)
            .map(|_| AtomicU64::new(0))
            .collect();

        log::debug!(
            "heap created: {} bytes, granule {} bytes, offset bits {}",
            config.heap_size,
            config.granule_size(),
            config.offset_bits
        );

        Ok(Self {
            layout: config.address_layout(),
            config,
            words,
            allocator: Mutex::new(GranuleAllocator::default()),
            used: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &RelocConfig {
        &self.config
    }

    pub fn layout(&self) -> &AddressLayout {
        &self.layout
    }

    /// Arena size in bytes
    pub fn capacity(&self) -> usize {
        self.config.heap_size
    }

    /// Bytes in allocated pages
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.used()
    }

    // ========================================================================
    // Word access
    // ========================================================================

    /// Atomic word at a word-aligned offset
    ///
    /// Panics if the offset lies outside the arena.
    #[inline]
    pub fn word(&self, offset: u64) -> &AtomicU64 {
        debug_assert!(
            Alignment::is_aligned(offset as usize, Alignment::WORD),
            "unaligned word offset {:#x}",
            offset
        );
        &self.words[(offset as usize) / Alignment::WORD]
    }

    #[inline]
    pub fn read_word(&self, offset: u64) -> u64 {
        self.word(offset).load(Ordering::Acquire)
    }

    #[inline]
    pub fn write_word(&self, offset: u64, value: u64) {
        self.word(offset).store(value, Ordering::Release)
    }

    /// Copy `size` bytes (rounded up to whole words) from `from` to `to`
    ///
    /// The copy is published by the release fence; readers see it after
    /// acquiring the forwarding entry that names `to`.
    pub fn copy_object(&self, from: u64, to: u64, size: usize) {
        let words = Alignment::align_up(size, Alignment::WORD) / Alignment::WORD;
        for i in 0..words as u64 {
            let value = self.word(from + i * 8).load(Ordering::Relaxed);
            self.word(to + i * 8).store(value, Ordering::Relaxed);
        }
        fence(Ordering::Release);
    }

    // ========================================================================
    // Page geometry
    // ========================================================================

    /// Size class for an object of `size` bytes
    pub fn size_class_for(&self, size: usize) -> PageSizeClass {
        if size <= self.config.small_object_limit() {
            PageSizeClass::Small
        } else if size <= self.config.medium_object_limit() {
            PageSizeClass::Medium
        } else {
            PageSizeClass::Large
        }
    }

    /// Page size needed for `class` holding an object of `object_size` bytes
    pub fn page_size_for(&self, class: PageSizeClass, object_size: usize) -> usize {
        match class {
            PageSizeClass::Small => self.config.small_page_size(),
            PageSizeClass::Medium => self.config.medium_page_size(),
            PageSizeClass::Large => {
                Alignment::align_up(object_size.max(1), self.config.granule_size())
            }
        }
    }

    /// Object alignment shift used on pages of `class`
    pub fn object_alignment_shift(&self, class: PageSizeClass) -> u32 {
        match class {
            PageSizeClass::Small => self.config.small_object_alignment_shift,
            PageSizeClass::Medium => self.config.medium_object_alignment_shift,
            PageSizeClass::Large => self.config.granule_shift,
        }
    }

    // ========================================================================
    // Page allocation
    // ========================================================================

    /// Allocate a page of `size` bytes
    ///
    /// Small and medium pages must request exactly their class size; large
    /// pages are rounded up to whole granules.
    ///
    /// # Errors
    /// - `InvalidArgument` if `size` does not match the class
    /// - `OutOfMemory` if no granules are left
    pub fn alloc_page(&self, class: PageSizeClass, size: usize) -> Result<Arc<Page>> {
        let size = match class {
            PageSizeClass::Large => self.page_size_for(class, size),
            _ => {
                let expected = self.page_size_for(class, 0);
                if size != expected {
                    return Err(RelocError::InvalidArgument(format!(
                        "{} page must be {} bytes, got {}",
                        class, expected, size
                    )));
                }
                size
            }
        };

        let granules = size >> self.config.granule_shift;
        let total_granules = self.capacity() >> self.config.granule_shift;

        let start = {
            let mut allocator = self.allocator.lock();
            let reused = allocator.free.get_mut(&granules).and_then(|starts| starts.pop());

            let start = match reused {
                Some(start) => start,
                None => {
                    if allocator.next + granules > total_granules {
                        return Err(RelocError::OutOfMemory {
                            requested: size,
                            available: self.free(),
                        });
                    }
                    let start = (allocator.next as u64) << self.config.granule_shift;
                    allocator.next += granules;
                    start
                }
            };
            allocator.allocated.insert(start, granules);
            start
        };

        self.used.fetch_add(size, Ordering::Relaxed);
        log::trace!("{} page allocated at {:#x} ({} bytes)", class, start, size);

        Ok(Arc::new(Page::new(
            start,
            size,
            class,
            self.object_alignment_shift(class),
        )))
    }

    /// Allocate a page suitable for one object of `object_size` bytes
    pub fn alloc_page_for(&self, object_size: usize) -> Result<Arc<Page>> {
        let class = self.size_class_for(object_size);
        self.alloc_page(class, self.page_size_for(class, object_size))
    }

    /// Return a page's granules to the heap
    ///
    /// The page contents are cleared.
    ///
    /// # Errors
    /// `InvalidAddress` if the page is not currently allocated.
    pub fn free_page(&self, page: &Page) -> Result<()> {
        let granules = {
            let mut allocator = self.allocator.lock();
            let granules = allocator
                .allocated
                .swap_remove(&page.start())
                .ok_or(RelocError::InvalidAddress {
                    address: page.start(),
                })?;
            allocator
                .free
                .entry(granules)
                .or_default()
                .push(page.start());
            granules
        };

        for offset in (page.start()..page.end()).step_by(Alignment::WORD) {
            self.word(offset).store(0, Ordering::Relaxed);
        }

        self.used
            .fetch_sub(granules << self.config.granule_shift, Ordering::Relaxed);
        log::trace!("page at {:#x} freed", page.start());
        Ok(())
    }

    /// Number of allocated pages
    pub fn page_count(&self) -> usize {
        self.allocator.lock().allocated.len()
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .field("granule_size", &self.config.granule_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KB: usize = 1024;

    fn heap() -> Heap {
        Heap::new(RelocConfig {
            heap_size: 64 * KB,
            granule_shift: 12,
            medium_page_granules: 4,
            medium_object_alignment_shift: 5,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Heap::new(RelocConfig {
            heap_size: 1000,
            granule_shift: 12,
            ..Default::default()
        });
        assert!(matches!(result, Err(RelocError::Configuration(_))));
    }

    #[test]
    fn test_word_access() {
        let heap = heap();
        heap.write_word(0x18, 42);
        assert_eq!(heap.read_word(0x18), 42);
        assert_eq!(heap.read_word(0x10), 0);
    }

    #[test]
    #[should_panic]
    fn test_word_access_out_of_bounds() {
        let heap = heap();
        heap.read_word(64 * KB as u64);
    }

    #[test]
    fn test_copy_object() {
        let heap = heap();
        for i in 0..4u64 {
            heap.write_word(0x100 + i * 8, 0xA0 + i);
        }
        heap.copy_object(0x100, 0x800, 28);
        for i in 0..4u64 {
            assert_eq!(heap.read_word(0x800 + i * 8), 0xA0 + i);
        }
    }

    #[test]
    fn test_size_classes() {
        let heap = heap();
        assert_eq!(heap.size_class_for(8), PageSizeClass::Small);
        assert_eq!(heap.size_class_for(512), PageSizeClass::Small);
        assert_eq!(heap.size_class_for(513), PageSizeClass::Medium);
        assert_eq!(heap.size_class_for(2 * KB), PageSizeClass::Medium);
        assert_eq!(heap.size_class_for(2 * KB + 1), PageSizeClass::Large);
        assert_eq!(heap.page_size_for(PageSizeClass::Large, 5 * KB), 8 * KB);
    }

    #[test]
    fn test_alloc_pages_are_granule_aligned() {
        let heap = heap();
        let small = heap.alloc_page(PageSizeClass::Small, 4 * KB).unwrap();
        let medium = heap.alloc_page(PageSizeClass::Medium, 16 * KB).unwrap();
        let large = heap.alloc_page_for(5 * KB).unwrap();

        assert_eq!(small.start(), 0);
        assert_eq!(medium.start(), 0x1000);
        assert_eq!(large.start(), 0x5000);
        assert_eq!(large.size(), 8 * KB);
        assert_eq!(large.object_alignment_shift(), 12);
        assert_eq!(heap.used(), 28 * KB);
        assert_eq!(heap.page_count(), 3);
    }

    #[test]
    fn test_wrong_page_size_rejected() {
        let heap = heap();
        let result = heap.alloc_page(PageSizeClass::Small, 8 * KB);
        assert!(matches!(result, Err(RelocError::InvalidArgument(_))));
    }

    #[test]
    fn test_out_of_memory() {
        let heap = heap();
        for _ in 0..4 {
            heap.alloc_page(PageSizeClass::Medium, 16 * KB).unwrap();
        }
        let result = heap.alloc_page(PageSizeClass::Small, 4 * KB);
        assert!(matches!(result, Err(RelocError::OutOfMemory { .. })));
    }

    #[test]
    fn test_free_page_reuses_granules() {
        let heap = heap();
        let page = heap.alloc_page(PageSizeClass::Small, 4 * KB).unwrap();
        heap.write_word(page.start() + 8, 7);

        heap.free_page(&page).unwrap();
        assert_eq!(heap.used(), 0);
        assert_eq!(heap.read_word(page.start() + 8), 0);

        let again = heap.alloc_page(PageSizeClass::Small, 4 * KB).unwrap();
        assert_eq!(again.start(), page.start());
    }

    #[test]
    fn test_double_free_rejected() {
        let heap = heap();
        let page = heap.alloc_page(PageSizeClass::Small, 4 * KB).unwrap();
        heap.free_page(&page).unwrap();
        assert!(matches!(
            heap.free_page(&page),
            Err(RelocError::InvalidAddress { .. })
        ));
    }
}
