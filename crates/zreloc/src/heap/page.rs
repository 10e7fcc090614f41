//! Page Management - Granule-Aligned Object Pages
//!
//! A page is a granule-aligned range of the heap arena holding objects of one
//! size class. Objects are bump-allocated and addressed by their byte offset.
//!
//! Page classes:
//! - Small: one granule, 8-byte object alignment
//! - Medium: `medium_page_granules` granules, configurable alignment
//! - Large: one object spanning whole granules
//!
//! Each page carries a live map with one bit per object index. The host sets
//! bits during marking; relocation visits live objects in address order.

use crate::util::Alignment;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Page size class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PageSizeClass {
    Small,
    Medium,
    Large,
}

impl std::fmt::Display for PageSizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageSizeClass::Small => write!(f, "Small"),
            PageSizeClass::Medium => write!(f, "Medium"),
            PageSizeClass::Large => write!(f, "Large"),
        }
    }
}

/// Page - contiguous object storage of one size class
pub struct Page {
    /// Base offset in the heap arena
    start: u64,

    /// Page size in bytes (whole granules)
    size: usize,

    size_class: PageSizeClass,

    /// log2 of the object alignment
    object_alignment_shift: u32,

    /// Bump pointer (offset of the next free byte)
    top: AtomicU64,

    /// One bit per object index
    live_map: Box<[AtomicU64]>,
    live_objects: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl Page {
    /// Create a page descriptor
    ///
    /// Normally obtained from [`Heap::alloc_page`](crate::heap::Heap::alloc_page).
    pub fn new(
        start: u64,
        size: usize,
        size_class: PageSizeClass,
        object_alignment_shift: u32,
    ) -> Self {
        let indices = size >> object_alignment_shift;
        let words = indices.div_ceil(64);

        Self {
            start,
            size,
            size_class,
            object_alignment_shift,
            top: AtomicU64::new(start),
            live_map: (0..words).map(|_| AtomicU64::new(0)).collect(),
            live_objects: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// End offset (exclusive)
    pub fn end(&self) -> u64 {
        self.start + self.size as u64
    }

    pub fn size_class(&self) -> PageSizeClass {
        self.size_class
    }

    pub fn object_alignment_shift(&self) -> u32 {
        self.object_alignment_shift
    }

    pub fn object_alignment(&self) -> usize {
        1usize << self.object_alignment_shift
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end()
    }

    pub fn top(&self) -> u64 {
        self.top.load(Ordering::Acquire)
    }

    /// Bytes handed out by the bump pointer
    pub fn used(&self) -> usize {
        (self.top() - self.start) as usize
    }

    pub fn remaining(&self) -> usize {
        self.size - self.used()
    }

    /// Object index of an offset in this page
    pub fn index_of(&self, offset: u64) -> usize {
        ((offset - self.start) >> self.object_alignment_shift) as usize
    }

    fn aligned_size(&self, size: usize) -> usize {
        Alignment::align_up(size.max(1), self.object_alignment())
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Bump-allocate `size` bytes
    ///
    /// The size is rounded up to the object alignment. Returns None when the
    /// page cannot fit the object.
    pub fn alloc_object(&self, size: usize) -> Option<u64> {
        let aligned = self.aligned_size(size) as u64;
        let mut current = self.top.load(Ordering::Relaxed);

        loop {
            let new_top = current.checked_add(aligned)?;
            if new_top > self.end() {
                return None;
            }

            match self.top.compare_exchange_weak(
                current,
                new_top,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(current),
                Err(actual) => current = actual,
            }
        }
    }

    /// Undo the most recent allocation at `offset`
    ///
    /// Only succeeds if no later allocation happened on this page.
    pub fn undo_alloc_object(&self, offset: u64, size: usize) -> bool {
        let aligned = self.aligned_size(size) as u64;
        self.top
            .compare_exchange(offset + aligned, offset, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    /// Record the object at `offset` as live
    ///
    /// Returns false if it was already marked.
    pub fn mark_object_live(&self, offset: u64, size: usize) -> bool {
        debug_assert!(self.contains(offset), "offset {:#x} outside page", offset);
        let index = self.index_of(offset);
        let bit = 1u64 << (index % 64);

        let prev = self.live_map[index / 64].fetch_or(bit, Ordering::AcqRel);
        if prev & bit != 0 {
            return false;
        }

        self.live_objects.fetch_add(1, Ordering::Relaxed);
        self.live_bytes
            .fetch_add(self.aligned_size(size), Ordering::Relaxed);
        true
    }

    pub fn is_object_live(&self, offset: u64) -> bool {
        if !self.contains(offset) {
            return false;
        }
        let index = self.index_of(offset);
        self.live_map[index / 64].load(Ordering::Acquire) & (1u64 << (index % 64)) != 0
    }

    pub fn live_objects(&self) -> usize {
        self.live_objects.load(Ordering::Relaxed)
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    /// Visit the offset of every live object in address order
    pub fn for_each_live_object<F>(&self, mut f: F)
    where
        F: FnMut(u64),
    {
        for (word_index, word) in self.live_map.iter().enumerate() {
            let mut bits = word.load(Ordering::Acquire);
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;

                let index = word_index * 64 + bit;
                f(self.start + ((index as u64) << self.object_alignment_shift));
            }
        }
    }

    /// Live object offsets in address order
    pub fn live_object_offsets(&self) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(self.live_objects());
        self.for_each_live_object(|offset| offsets.push(offset));
        offsets
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("start", &format_args!("{:#x}", self.start))
            .field("size", &self.size)
            .field("size_class", &self.size_class)
            .field("used", &self.used())
            .field("live_objects", &self.live_objects())
            .finish()
    }
}
