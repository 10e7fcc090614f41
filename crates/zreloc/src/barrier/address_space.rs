//! Address Space Layout - Metadata Bits & Phase Views
//!
//! A colored address carries the heap offset in its low bits and exactly one
//! metadata bit above it. Which metadata bit counts as "good" depends on the
//! current global phase:
//!
//! ```text
//! 64-bit colored address (offset_bits = 42):
//! ┌──────────────┬─────┬─────┬─────┬─────┬───────────────────────┐
//! │    Unused    │ Fin │ Rem │ M1  │ M0  │        Offset         │
//! │    63-46     │ 45  │ 44  │ 43  │ 42  │         41-0          │
//! └──────────────┴─────┴─────┴─────┴─────┴───────────────────────┘
//! ```
//!
//! - Mark phase:  good = current marked bit (M0 and M1 alternate per cycle)
//! - Relocate:    good = Remapped
//!
//! The masks are kept in two immutable values instead of process globals:
//! [`AddressLayout`] holds the bit positions fixed at initialization, and
//! [`AddressView`] is the per-phase snapshot handed to every barrier call.
//! A phase flip produces a new view; readers never mutate one in place.

use serde::Serialize;

/// Metadata color of a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Color {
    Marked0,
    Marked1,
    Remapped,
    Finalizable,
}

/// Global collector phase as seen by barriers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GlobalPhase {
    /// Concurrent marking; good color is the current marked bit
    Mark,
    /// Marking finished, relocation set being prepared
    MarkCompleted,
    /// Concurrent relocation; good color is Remapped
    Relocate,
}

impl std::fmt::Display for GlobalPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GlobalPhase::Mark => "Mark",
            GlobalPhase::MarkCompleted => "MarkCompleted",
            GlobalPhase::Relocate => "Relocate",
        };
        f.write_str(name)
    }
}

/// Bit positions of the offset and metadata fields
///
/// Built once from configuration and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressLayout {
    offset_bits: u32,
    offset_mask: u64,
    marked0: u64,
    marked1: u64,
    remapped: u64,
    finalizable: u64,
    metadata_mask: u64,
}

impl AddressLayout {
    /// Layout with `offset_bits` low bits of offset
    pub const fn new(offset_bits: u32) -> Self {
        let marked0 = 1u64 << offset_bits;
        let marked1 = 1u64 << (offset_bits + 1);
        let remapped = 1u64 << (offset_bits + 2);
        let finalizable = 1u64 << (offset_bits + 3);

        Self {
            offset_bits,
            offset_mask: (1u64 << offset_bits) - 1,
            marked0,
            marked1,
            remapped,
            finalizable,
            metadata_mask: marked0 | marked1 | remapped | finalizable,
        }
    }

    pub fn offset_bits(&self) -> u32 {
        self.offset_bits
    }

    pub fn offset_mask(&self) -> u64 {
        self.offset_mask
    }

    /// Exclusive upper bound of valid offsets
    pub fn offset_max(&self) -> u64 {
        self.offset_mask + 1
    }

    pub fn metadata_mask(&self) -> u64 {
        self.metadata_mask
    }

    pub fn marked0(&self) -> u64 {
        self.marked0
    }

    pub fn marked1(&self) -> u64 {
        self.marked1
    }

    pub fn remapped(&self) -> u64 {
        self.remapped
    }

    pub fn finalizable(&self) -> u64 {
        self.finalizable
    }

    /// Metadata bit for a color
    pub fn color_bit(&self, color: Color) -> u64 {
        match color {
            Color::Marked0 => self.marked0,
            Color::Marked1 => self.marked1,
            Color::Remapped => self.remapped,
            Color::Finalizable => self.finalizable,
        }
    }
}

/// Immutable snapshot of the masks that are current for one phase
///
/// Obtain a fresh view after every phase flip; a `good` address derived from
/// one view is not good under the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressView {
    layout: AddressLayout,
    phase: GlobalPhase,
    seqnum: u32,
    marked: u64,
    good_mask: u64,
    bad_mask: u64,
    weak_bad_mask: u64,
}

impl AddressView {
    /// Startup view: Relocate phase with nothing relocating, good = Remapped
    pub fn initial(layout: AddressLayout) -> Self {
        Self::derive(
            layout,
            GlobalPhase::Relocate,
            0,
            layout.marked0,
            layout.remapped,
        )
    }

    fn derive(
        layout: AddressLayout,
        phase: GlobalPhase,
        seqnum: u32,
        marked: u64,
        good_mask: u64,
    ) -> Self {
        let bad_mask = good_mask ^ layout.metadata_mask;
        let weak_bad_mask =
            (good_mask | layout.remapped | layout.finalizable) ^ layout.metadata_mask;

        Self {
            layout,
            phase,
            seqnum,
            marked,
            good_mask,
            bad_mask,
            weak_bad_mask,
        }
    }

    /// View after mark start: alternate the marked bit and make it good
    pub fn flipped_to_marked(&self) -> Self {
        let marked = if self.marked == self.layout.marked0 {
            self.layout.marked1
        } else {
            self.layout.marked0
        };
        Self::derive(
            self.layout,
            GlobalPhase::Mark,
            self.seqnum.wrapping_add(1),
            marked,
            marked,
        )
    }

    /// View after mark end; masks are unchanged
    pub fn mark_completed(&self) -> Self {
        Self {
            phase: GlobalPhase::MarkCompleted,
            ..*self
        }
    }

    /// View after relocate start: Remapped becomes good
    pub fn flipped_to_remapped(&self) -> Self {
        Self::derive(
            self.layout,
            GlobalPhase::Relocate,
            self.seqnum,
            self.marked,
            self.layout.remapped,
        )
    }

    pub fn layout(&self) -> &AddressLayout {
        &self.layout
    }

    pub fn phase(&self) -> GlobalPhase {
        self.phase
    }

    /// Mark cycle sequence number; bumped on every mark start
    pub fn seqnum(&self) -> u32 {
        self.seqnum
    }

    /// Marked bit of the current (or most recent) mark cycle
    pub fn marked_mask(&self) -> u64 {
        self.marked
    }

    pub fn good_mask(&self) -> u64 {
        self.good_mask
    }

    pub fn bad_mask(&self) -> u64 {
        self.bad_mask
    }

    pub fn weak_bad_mask(&self) -> u64 {
        self.weak_bad_mask
    }

    pub fn is_relocating(&self) -> bool {
        self.phase == GlobalPhase::Relocate
    }
}
