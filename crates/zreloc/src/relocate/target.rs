//! Target Allocation - Destination Pages for Relocated Objects
//!
//! One shared target page per size class. Allocation bumps the current page
//! without locking; only replacing an exhausted page takes the lock.

use crate::error::{RelocError, Result};
use crate::heap::{Heap, Page, PageSizeClass};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// TargetAllocator - per-size-class destination pages
pub struct TargetAllocator {
    heap: Arc<Heap>,
    small: RwLock<Option<Arc<Page>>>,
    medium: RwLock<Option<Arc<Page>>>,

    /// Every page this allocator has filled, in allocation order
    pages: Mutex<Vec<Arc<Page>>>,
}

impl TargetAllocator {
    pub fn new(heap: Arc<Heap>) -> Self {
        Self {
            heap,
            small: RwLock::new(None),
            medium: RwLock::new(None),
            pages: Mutex::new(Vec::new()),
        }
    }

    fn current(&self, class: PageSizeClass) -> Result<&RwLock<Option<Arc<Page>>>> {
        match class {
            PageSizeClass::Small => Ok(&self.small),
            PageSizeClass::Medium => Ok(&self.medium),
            PageSizeClass::Large => Err(RelocError::InvalidArgument(
                "large objects are not relocated".to_string(),
            )),
        }
    }

    /// Allocate `size` bytes on the current target page of `class`
    ///
    /// Returns the page and the offset of the allocation.
    ///
    /// # Errors
    /// - `InvalidArgument` for the large class
    /// - `OutOfMemory` if a new target page cannot be allocated
    pub fn alloc(&self, class: PageSizeClass, size: usize) -> Result<(Arc<Page>, u64)> {
        let slot = self.current(class)?;

        if let Some(page) = slot.read().as_ref() {
            if let Some(offset) = page.alloc_object(size) {
                return Ok((Arc::clone(page), offset));
            }
        }

        let mut current = slot.write();

        // Another thread may have refilled while we waited
        if let Some(page) = current.as_ref() {
            if let Some(offset) = page.alloc_object(size) {
                return Ok((Arc::clone(page), offset));
            }
        }

        let page = self
            .heap
            .alloc_page(class, self.heap.page_size_for(class, size))?;
        let offset = page.alloc_object(size).ok_or(RelocError::OutOfMemory {
            requested: size,
            available: page.remaining(),
        })?;

        log::debug!("{} target page allocated at {:#x}", class, page.start());
        self.pages.lock().push(Arc::clone(&page));
        *current = Some(Arc::clone(&page));
        Ok((page, offset))
    }

    /// Undo an allocation made by [`alloc`](Self::alloc)
    ///
    /// Returns false if later allocations on the page prevent it.
    pub fn undo(&self, page: &Page, offset: u64, size: usize) -> bool {
        page.undo_alloc_object(offset, size)
    }

    /// Pages that received relocated objects
    pub fn pages(&self) -> Vec<Arc<Page>> {
        self.pages.lock().clone()
    }

    /// Stop allocating on the current pages
    ///
    /// The next allocation of each class starts a fresh page.
    pub fn retire_current(&self) {
        *self.small.write() = None;
        *self.medium.write() = None;
    }
}
