//! Object Model - Host Object Layout Seam
//!
//! The relocation core never interprets object contents. It only needs the
//! size of an object to copy it, which the hosting runtime supplies through
//! [`ObjectModel`].

use crate::heap::Heap;
use crate::util::Alignment;

/// ObjectModel - object geometry supplied by the hosting runtime
pub trait ObjectModel: Send + Sync {
    /// Size in bytes of the object starting at `offset`
    fn object_size(&self, heap: &Heap, offset: u64) -> usize;
}

/// Object model whose first word holds the object size in bytes
///
/// # Examples
///
/// ```rust
/// use zreloc::heap::{Heap, ObjectModel, PageSizeClass, SizeHeaderModel};
/// use zreloc::RelocConfig;
///
/// let heap = Heap::new(RelocConfig {
///     heap_size: 1024 * 1024,
///     granule_shift: 12,
///     medium_page_granules: 4,
///     medium_object_alignment_shift: 5,
///     ..Default::default()
/// }).unwrap();
///
/// let page = heap.alloc_page(PageSizeClass::Small, 4096).unwrap();
/// let obj = SizeHeaderModel.allocate(&heap, &page, 24).unwrap();
/// assert_eq!(SizeHeaderModel.object_size(&heap, obj), 24);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeHeaderModel;

impl SizeHeaderModel {
    /// Allocate an object of `size` bytes on `page` and write its header
    ///
    /// Sizes are rounded up to whole words; the minimum is one word.
    pub fn allocate(&self, heap: &Heap, page: &crate::heap::Page, size: usize) -> Option<u64> {
        let size = Alignment::align_up(size.max(Alignment::WORD), Alignment::WORD);
        let offset = page.alloc_object(size)?;
        heap.write_word(offset, size as u64);
        Some(offset)
    }
}

impl ObjectModel for SizeHeaderModel {
    fn object_size(&self, heap: &Heap, offset: u64) -> usize {
        heap.read_word(offset) as usize
    }
}
