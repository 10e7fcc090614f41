//! Forwarding Entry - Packed 64-bit Slot
//!
//! ```text
//!  6                  4 4
//!  3                  6 5                                            1 0
//! +--------------------+-----------------------------------------------+-+
//! |     from_index     |                   to_offset                   |P|
//! +--------------------+-----------------------------------------------+-+
//! ```
//!
//! One entry fits one machine word, so a single atomic load or CAS moves the
//! whole mapping and readers can never observe a torn entry.

use serde::Serialize;

/// Width of the populated flag
pub const POPULATED_BITS: u32 = 1;
/// Width of the destination offset field
pub const TO_OFFSET_BITS: u32 = 45;
/// Width of the source object index field
pub const FROM_INDEX_BITS: u32 = 18;

const TO_OFFSET_SHIFT: u32 = POPULATED_BITS;
const FROM_INDEX_SHIFT: u32 = POPULATED_BITS + TO_OFFSET_BITS;

const POPULATED_MASK: u64 = 1;
const TO_OFFSET_MASK: u64 = (1 << TO_OFFSET_BITS) - 1;
const FROM_INDEX_MASK: u64 = (1 << FROM_INDEX_BITS) - 1;

/// ForwardingEntry - one slot of a forwarding record's hash table
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ForwardingEntry {
    raw: u64,
}

impl ForwardingEntry {
    /// Unpopulated slot
    pub const EMPTY: ForwardingEntry = ForwardingEntry { raw: 0 };

    /// Populated entry mapping `from_index` to `to_offset`
    ///
    /// Values wider than their field are truncated.
    pub const fn new(from_index: u64, to_offset: u64) -> Self {
        Self {
            raw: POPULATED_MASK
                | ((to_offset & TO_OFFSET_MASK) << TO_OFFSET_SHIFT)
                | ((from_index & FROM_INDEX_MASK) << FROM_INDEX_SHIFT),
        }
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self { raw }
    }

    pub const fn raw(&self) -> u64 {
        self.raw
    }

    pub const fn populated(&self) -> bool {
        (self.raw & POPULATED_MASK) != 0
    }

    pub const fn to_offset(&self) -> u64 {
        (self.raw >> TO_OFFSET_SHIFT) & TO_OFFSET_MASK
    }

    pub const fn from_index(&self) -> u64 {
        (self.raw >> FROM_INDEX_SHIFT) & FROM_INDEX_MASK
    }
}
