//! Forwarding Record - Per-Page Relocation State
//!
//! A forwarding record describes one page being relocated: the source range,
//! the object alignment of its size class, a reference count guarding the
//! page's lifetime, and an open-addressed hash table from object index to
//! new heap offset.
//!
//! Memory layout: the entry table is attached directly behind the record
//! header in a single allocation (see [`AttachedArray`]).
//!
//! Structure:
//! - Capacity is a power of two and larger than the number of live objects
//!   on the page, so probing always reaches an empty slot
//! - Slots are `AtomicU64` words written once with a CAS
//! - Lookups use acquire loads; no locks on any path
//!
//! Usage:
//! 1. Driver creates the record when the page enters the relocation set
//! 2. Relocating threads `find` the index and `insert` after copying
//! 3. Barriers `find` to resolve stale references
//! 4. Driver drops the record once the page is released

use crate::assert_context;
use crate::error::{RelocError, Result};
use crate::heap::PageSizeClass;
use crate::relocate::entry::{ForwardingEntry, FROM_INDEX_BITS};
use crate::util::{hash_u32, AtomicUtils, AttachedArray};
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

type EntryArray = AttachedArray<RecordHeader, AtomicU64>;

struct RecordHeader {
    start: u64,
    size: usize,
    size_class: PageSizeClass,
    object_alignment_shift: u32,
    ref_count: AtomicU32,
    layout: Layout,
    entries: EntryArray,
}

/// Result of probing a record for an object index
///
/// Either the populated entry for the index (`found() == true`), or the first
/// empty slot on its probe sequence, which is where an insert would go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardingCursor {
    slot: usize,
    entry: ForwardingEntry,
}

impl ForwardingCursor {
    pub fn found(&self) -> bool {
        self.entry.populated()
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn entry(&self) -> ForwardingEntry {
        self.entry
    }

    /// New offset if the object has been forwarded
    pub fn to_offset(&self) -> Option<u64> {
        self.found().then(|| self.entry.to_offset())
    }
}

/// ForwardingRecord - relocation state of one source page
///
/// The handle owns the allocation holding the header and its entry table.
/// Share it with `Arc`.
pub struct ForwardingRecord {
    header: NonNull<RecordHeader>,
}

// SAFETY: the header is immutable after construction apart from atomics.
unsafe impl Send for ForwardingRecord {}
unsafe impl Sync for ForwardingRecord {}

impl ForwardingRecord {
    /// Create a record sized for `live_objects` objects
    ///
    /// Capacity is the next power of two of twice the live object count.
    pub fn new(
        start: u64,
        size: usize,
        size_class: PageSizeClass,
        object_alignment_shift: u32,
        live_objects: usize,
    ) -> Result<Self> {
        let capacity = live_objects.saturating_mul(2).max(1).next_power_of_two();
        Self::with_capacity(start, size, size_class, object_alignment_shift, capacity)
    }

    /// Create a record with an explicit table capacity
    ///
    /// # Errors
    /// `InvalidArgument` if `capacity` is not a power of two, if the page is
    /// empty, or if it holds more object indices than an entry can encode.
    pub fn with_capacity(
        start: u64,
        size: usize,
        size_class: PageSizeClass,
        object_alignment_shift: u32,
        capacity: usize,
    ) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(RelocError::InvalidArgument(format!(
                "forwarding capacity {} is not a power of two",
                capacity
            )));
        }

        if size == 0 {
            return Err(RelocError::InvalidArgument(format!(
                "empty source page at {:#x}",
                start
            )));
        }

        if object_alignment_shift >= usize::BITS
            || (size >> object_alignment_shift) > (1usize << FROM_INDEX_BITS)
        {
            return Err(RelocError::InvalidArgument(format!(
                "page of {} bytes with alignment shift {} exceeds the index field",
                size, object_alignment_shift
            )));
        }

        let (layout, _) = EntryArray::layout(capacity)
            .map_err(|e| RelocError::InvalidArgument(format!("forwarding layout: {}", e)))?;

        // SAFETY: layout has non-zero size (the header alone is non-empty).
        // Zeroed memory is a valid array of empty entries.
        let raw = unsafe { std::alloc::alloc_zeroed(layout) }.cast::<RecordHeader>();
        let header = NonNull::new(raw).ok_or(RelocError::OutOfMemory {
            requested: layout.size(),
            available: 0,
        })?;

        // SAFETY: freshly allocated, properly aligned for RecordHeader.
        unsafe {
            header.as_ptr().write(RecordHeader {
                start,
                size,
                size_class,
                object_alignment_shift,
                ref_count: AtomicU32::new(1),
                layout,
                entries: EntryArray::new(capacity),
            });
        }

        Ok(Self { header })
    }

    #[inline]
    fn header(&self) -> &RecordHeader {
        // SAFETY: initialized in the constructor and freed only on drop.
        unsafe { self.header.as_ref() }
    }

    #[inline]
    fn slot(&self, index: usize) -> &AtomicU64 {
        let header = self.header();
        // SAFETY: allocated with EntryArray::layout(length), zero-initialized;
        // callers mask `index` with `capacity - 1`.
        unsafe { header.entries.get(header, index & (header.entries.length() - 1)) }
    }

    /// Base offset of the source page
    pub fn start(&self) -> u64 {
        self.header().start
    }

    /// Size of the source page in bytes
    pub fn size(&self) -> usize {
        self.header().size
    }

    /// End (exclusive) of the source page
    pub fn end(&self) -> u64 {
        self.start() + self.size() as u64
    }

    pub fn size_class(&self) -> PageSizeClass {
        self.header().size_class
    }

    pub fn object_alignment_shift(&self) -> u32 {
        self.header().object_alignment_shift
    }

    /// Number of slots in the entry table
    pub fn capacity(&self) -> usize {
        self.header().entries.length()
    }

    /// Whether `offset` lies in the source page
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start() && offset < self.end()
    }

    /// Object index of a source offset
    ///
    /// Panics if `offset` lies outside the source page.
    pub fn index_of(&self, offset: u64) -> u64 {
        assert_context!(
            self.contains(offset),
            "offset {:#x} outside page {:#x}..{:#x}",
            offset,
            self.start(),
            self.end()
        );
        (offset - self.start()) >> self.object_alignment_shift()
    }

    /// Entry at `slot`
    pub fn at(&self, slot: usize) -> ForwardingEntry {
        ForwardingEntry::from_raw(self.slot(slot).load(Ordering::Acquire))
    }

    // ========================================================================
    // Page reference counting
    // ========================================================================

    /// Claim the source page
    ///
    /// Succeeds while the reference count is positive; fails once the driver
    /// and all workers have released the page. A successful claim must be
    /// paired with [`release`](Self::release).
    pub fn retain(&self) -> bool {
        AtomicUtils::increment_if_positive(&self.header().ref_count)
    }

    /// Drop a claim on the source page
    pub fn release(&self) {
        let released = self.header().ref_count.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |count| count.checked_sub(1),
        );
        assert_context!(
            released.is_ok(),
            "page {:#x} released more often than retained",
            self.start()
        );
    }

    /// Claim the page for the lifetime of the returned guard
    pub fn retain_guard(&self) -> Option<RetainGuard<'_>> {
        self.retain().then_some(RetainGuard { record: self })
    }

    /// Read-only check whether any claim is outstanding
    pub fn is_retained(&self) -> bool {
        self.ref_count() > 0
    }

    pub fn ref_count(&self) -> u32 {
        self.header().ref_count.load(Ordering::Acquire)
    }

    // ========================================================================
    // Lookup & insertion
    // ========================================================================

    fn first_slot(&self, from_index: u64) -> usize {
        hash_u32(from_index as u32) as usize & (self.capacity() - 1)
    }

    fn next_slot(&self, slot: usize) -> usize {
        (slot + 1) & (self.capacity() - 1)
    }

    /// Probe for `from_index`
    ///
    /// Returns the populated entry for the index, or the first empty slot on
    /// its probe sequence. Panics if a full wrap finds neither, which means
    /// the record was undersized.
    pub fn find(&self, from_index: u64) -> ForwardingCursor {
        let mut slot = self.first_slot(from_index);
        let mut probes = 0;

        loop {
            let entry = self.at(slot);
            if !entry.populated() || entry.from_index() == from_index {
                return ForwardingCursor { slot, entry };
            }

            probes += 1;
            assert_context!(
                probes < self.capacity(),
                "forwarding table of page {:#x} full ({} slots) while probing index {}",
                self.start(),
                self.capacity(),
                from_index
            );
            slot = self.next_slot(slot);
        }
    }

    /// New offset for `from_index`, if forwarded
    pub fn forwarded_offset(&self, from_index: u64) -> Option<u64> {
        self.find(from_index).to_offset()
    }

    /// Install `from_index -> to_offset` starting at `cursor`
    ///
    /// `cursor` should come from [`find`](Self::find) for the same index.
    /// Returns the offset that is now authoritative: `to_offset` if this call
    /// installed it, or the offset installed by a thread that won the race.
    /// On return `cursor` points at the authoritative entry.
    pub fn insert(&self, from_index: u64, to_offset: u64, cursor: &mut ForwardingCursor) -> u64 {
        let new_entry = ForwardingEntry::new(from_index, to_offset);
        let mut probes = 0;

        loop {
            let prev = self.slot(cursor.slot).compare_exchange(
                ForwardingEntry::EMPTY.raw(),
                new_entry.raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );

            let mut entry = match prev {
                Ok(_) => {
                    cursor.entry = new_entry;
                    return to_offset;
                }
                Err(current) => ForwardingEntry::from_raw(current),
            };

            // Slot taken: skip to the next empty or matching slot
            while entry.populated() {
                if entry.from_index() == from_index {
                    cursor.entry = entry;
                    return entry.to_offset();
                }

                probes += 1;
                assert_context!(
                    probes < self.capacity(),
                    "forwarding table of page {:#x} full ({} slots) while inserting index {}",
                    self.start(),
                    self.capacity(),
                    from_index
                );

                cursor.slot = self.next_slot(cursor.slot);
                entry = self.at(cursor.slot);
            }
            cursor.entry = entry;
        }
    }

    /// All populated entries with their slot numbers
    pub fn populated_entries(&self) -> Vec<(usize, ForwardingEntry)> {
        (0..self.capacity())
            .map(|slot| (slot, self.at(slot)))
            .filter(|(_, entry)| entry.populated())
            .collect()
    }
}

impl Drop for ForwardingRecord {
    fn drop(&mut self) {
        let layout = self.header().layout;
        if self.is_retained() {
            log::debug!(
                "dropping forwarding record {:#x} with ref count {}",
                self.start(),
                self.ref_count()
            );
        }

        // SAFETY: allocated in with_capacity with `layout`; entries are plain
        // atomics and need no drop.
        unsafe {
            std::ptr::drop_in_place(self.header.as_ptr());
            std::alloc::dealloc(self.header.as_ptr().cast::<u8>(), layout);
        }
    }
}

impl std::fmt::Debug for ForwardingRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardingRecord")
            .field("start", &format_args!("{:#x}", self.start()))
            .field("size", &self.size())
            .field("size_class", &self.size_class())
            .field("object_alignment_shift", &self.object_alignment_shift())
            .field("capacity", &self.capacity())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// Outstanding claim on a forwarding record's source page
pub struct RetainGuard<'a> {
    record: &'a ForwardingRecord,
}

impl Drop for RetainGuard<'_> {
    fn drop(&mut self) {
        self.record.release();
    }
}
