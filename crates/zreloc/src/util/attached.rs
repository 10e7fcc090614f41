//! Attached Arrays
//!
//! An attached array is a variable-length array placed in the same
//! allocation as its owner, directly after it:
//!
//! ```text
//! +-----------------+---------+---------+-----+-----------+
//! | owner (T)       | padding | elem 0  | ... | elem N-1  |
//! +-----------------+---------+---------+-----+-----------+
//! ^ owner           ^ size_of::<T>()  ^ object_size()
//! ```
//!
//! The owner stores an [`AttachedArray`] value holding only the length; the
//! base address is derived from the owner's address.

use crate::util::alignment::Alignment;
use std::alloc::{Layout, LayoutError};
use std::marker::PhantomData;

/// Length descriptor of an array attached behind an owner of type `T`
pub struct AttachedArray<T, E> {
    length: usize,
    _marker: PhantomData<fn(&T) -> &E>,
}

impl<T, E> AttachedArray<T, E> {
    pub const fn new(length: usize) -> Self {
        Self {
            length,
            _marker: PhantomData,
        }
    }

    /// Offset of element 0 from the owner: owner size rounded up to the
    /// element alignment
    pub const fn object_size() -> usize {
        Alignment::align_up(std::mem::size_of::<T>(), std::mem::align_of::<E>())
    }

    /// Layout of the owner followed by `length` elements
    ///
    /// Returns the combined layout and the element offset, which always
    /// equals [`Self::object_size`].
    pub fn layout(length: usize) -> Result<(Layout, usize), LayoutError> {
        let (layout, offset) = Layout::new::<T>().extend(Layout::array::<E>(length)?)?;
        debug_assert_eq!(offset, Self::object_size());
        Ok((layout.pad_to_align(), offset))
    }

    pub const fn length(&self) -> usize {
        self.length
    }

    /// Element `index` of the array attached behind `owner`
    ///
    /// # Safety
    ///
    /// `owner` must live in an allocation made with
    /// `Self::layout(self.length())`, with every element initialized, and
    /// `index` must be below `self.length()`.
    pub unsafe fn get<'a>(&self, owner: &'a T, index: usize) -> &'a E {
        debug_assert!(index < self.length, "attached index {} >= {}", index, self.length);
        let base = (owner as *const T).cast::<u8>().add(Self::object_size());
        &*base.cast::<E>().add(index)
    }
}
