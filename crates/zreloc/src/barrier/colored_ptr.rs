//! Colored Address Implementation
//!
//! All predicates are pure functions of the raw bits and the masks of an
//! [`AddressView`] (or the fixed [`AddressLayout`]).

use crate::barrier::address_space::{AddressLayout, AddressView, Color};
use std::sync::atomic::{AtomicU64, Ordering};

/// ColoredAddress - heap reference with metadata bits above the offset
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ColoredAddress {
    raw: u64,
}

impl ColoredAddress {
    pub const NULL: ColoredAddress = ColoredAddress { raw: 0 };

    pub const fn from_raw(raw: u64) -> Self {
        Self { raw }
    }

    /// Address with `offset` and a single metadata color
    pub fn colored(offset: u64, color: Color, layout: &AddressLayout) -> Self {
        Self {
            raw: (offset & layout.offset_mask()) | layout.color_bit(color),
        }
    }

    /// Good address for `offset` under `view`
    pub fn good_from_offset(offset: u64, view: &AddressView) -> Self {
        Self {
            raw: (offset & view.layout().offset_mask()) | view.good_mask(),
        }
    }

    pub const fn raw(&self) -> u64 {
        self.raw
    }

    /// Raw bit pattern; 0 for null
    pub const fn as_int(&self) -> u64 {
        self.raw
    }

    pub const fn is_null(&self) -> bool {
        self.raw == 0
    }

    pub fn offset(&self, layout: &AddressLayout) -> u64 {
        self.raw & layout.offset_mask()
    }

    pub fn is_good(&self, view: &AddressView) -> bool {
        (self.raw & view.bad_mask()) == 0 && !self.is_null()
    }

    pub fn is_good_or_null(&self, view: &AddressView) -> bool {
        (self.raw & view.bad_mask()) == 0
    }

    pub fn is_bad(&self, view: &AddressView) -> bool {
        (self.raw & view.bad_mask()) != 0
    }

    pub fn is_weak_bad(&self, view: &AddressView) -> bool {
        (self.raw & view.weak_bad_mask()) != 0
    }

    pub fn is_weak_good(&self, view: &AddressView) -> bool {
        !self.is_weak_bad(view) && !self.is_null()
    }

    pub fn is_weak_good_or_null(&self, view: &AddressView) -> bool {
        !self.is_weak_bad(view)
    }

    /// Carries the marked bit of the current cycle
    pub fn is_marked(&self, view: &AddressView) -> bool {
        (self.raw & view.marked_mask()) != 0
    }

    pub fn is_remapped(&self, layout: &AddressLayout) -> bool {
        (self.raw & layout.remapped()) != 0
    }

    pub fn is_finalizable(&self, layout: &AddressLayout) -> bool {
        (self.raw & layout.finalizable()) != 0
    }

    /// Same offset, colored with the good mask of `view`
    pub fn good(&self, view: &AddressView) -> Self {
        Self::good_from_offset(self.offset(view.layout()), view)
    }

    pub fn good_or_null(&self, view: &AddressView) -> Self {
        if self.is_null() {
            *self
        } else {
            self.good(view)
        }
    }

    /// Good address that additionally carries the finalizable bit
    pub fn finalizable_good(&self, view: &AddressView) -> Self {
        Self {
            raw: self.good(view).raw | view.layout().finalizable(),
        }
    }

    /// Plausible heap reference from an untrusted raw value
    ///
    /// Apart from an optional Finalizable bit, exactly one non-offset bit
    /// must be set, and it must be Marked0, Marked1 or Remapped.
    pub fn is_in_heap(&self, layout: &AddressLayout) -> bool {
        let color = self.raw & !layout.offset_mask() & !layout.finalizable();
        if !color.is_power_of_two() {
            return false;
        }

        (color & layout.metadata_mask()) != 0
    }

    /// Load a reference field
    pub fn load(slot: &AtomicU64) -> Self {
        Self::from_raw(slot.load(Ordering::Acquire))
    }

    /// Replace `expected` in `slot` with `healed`
    ///
    /// Returns the value now in the slot: `healed` on success, or whatever
    /// another thread stored first.
    pub fn heal(slot: &AtomicU64, expected: Self, healed: Self) -> Self {
        match slot.compare_exchange(expected.raw, healed.raw, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => healed,
            Err(current) => Self::from_raw(current),
        }
    }
}

impl std::fmt::LowerHex for ColoredAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.raw, f)
    }
}

impl From<ColoredAddress> for u64 {
    fn from(addr: ColoredAddress) -> u64 {
        addr.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: AddressLayout = AddressLayout::new(42);

    fn relocate_view() -> AddressView {
        AddressView::initial(LAYOUT)
    }

    fn mark_view() -> AddressView {
        AddressView::initial(LAYOUT).flipped_to_marked()
    }

    // ========================================================================
    // Basic accessors
    // ========================================================================

    #[test]
    fn test_null() {
        let null = ColoredAddress::NULL;
        assert!(null.is_null());
        assert_eq!(null.as_int(), 0);
        assert!(!null.is_weak_good(&relocate_view()));
        assert!(null.is_weak_good_or_null(&relocate_view()));
        assert_eq!(null.good_or_null(&relocate_view()), null);
    }

    #[test]
    fn test_offset_strips_color() {
        let addr = ColoredAddress::colored(0x1234, Color::Marked1, &LAYOUT);
        assert_eq!(addr.offset(&LAYOUT), 0x1234);
        assert_eq!(addr.raw(), 0x1234 | LAYOUT.marked1());
    }

    #[test]
    fn test_colored_truncates_offset() {
        let addr = ColoredAddress::colored(u64::MAX, Color::Remapped, &LAYOUT);
        assert_eq!(addr.offset(&LAYOUT), LAYOUT.offset_mask());
    }

    // ========================================================================
    // Good / bad classification
    // ========================================================================

    #[test]
    fn test_good_uses_current_mask() {
        let addr = ColoredAddress::colored(0x40, Color::Marked0, &LAYOUT);

        let good = addr.good(&relocate_view());
        assert!(good.is_remapped(&LAYOUT));
        assert!(good.is_good(&relocate_view()));
        assert_eq!(good.offset(&LAYOUT), 0x40);

        let good = addr.good(&mark_view());
        assert_eq!(good.raw(), 0x40 | LAYOUT.marked1());
        assert!(good.is_marked(&mark_view()));
    }

    #[test]
    fn test_stale_marked_is_weak_bad_in_relocate() {
        let view = relocate_view();
        let stale = ColoredAddress::colored(0x80, Color::Marked1, &LAYOUT);
        assert!(stale.is_weak_bad(&view));
        assert!(stale.is_bad(&view));
        assert!(!stale.is_weak_good(&view));
    }

    #[test]
    fn test_remapped_is_weak_good_while_marking() {
        let view = mark_view();
        let remapped = ColoredAddress::colored(0x80, Color::Remapped, &LAYOUT);
        assert!(remapped.is_bad(&view));
        assert!(remapped.is_weak_good(&view));
    }

    #[test]
    fn test_finalizable_good() {
        let view = mark_view();
        let addr = ColoredAddress::colored(0x100, Color::Marked0, &LAYOUT);
        let fin = addr.finalizable_good(&view);
        assert!(fin.is_finalizable(&LAYOUT));
        assert!(fin.is_marked(&view));
        // Finalizable is tolerated by weak barriers
        assert!(fin.is_weak_good(&view));
    }

    // ========================================================================
    // Heap membership
    // ========================================================================

    #[test]
    fn test_is_in_heap() {
        for color in [Color::Marked0, Color::Marked1, Color::Remapped] {
            assert!(ColoredAddress::colored(0x10, color, &LAYOUT).is_in_heap(&LAYOUT));
        }

        let fin_only = ColoredAddress::colored(0x10, Color::Finalizable, &LAYOUT);
        assert!(!fin_only.is_in_heap(&LAYOUT));

        let fin_marked = ColoredAddress::colored(0x10, Color::Marked1, &LAYOUT)
            .finalizable_good(&mark_view());
        assert!(fin_marked.is_in_heap(&LAYOUT));

        let two_with_fin = LAYOUT.marked0() | LAYOUT.marked1() | LAYOUT.finalizable();
        let fin_two_colors = ColoredAddress::from_raw(0x10 | two_with_fin);
        assert!(!fin_two_colors.is_in_heap(&LAYOUT));

        let uncolored = ColoredAddress::from_raw(0x10);
        assert!(!uncolored.is_in_heap(&LAYOUT));

        let two_colors = ColoredAddress::from_raw(0x10 | LAYOUT.marked0() | LAYOUT.remapped());
        assert!(!two_colors.is_in_heap(&LAYOUT));

        let outside = ColoredAddress::from_raw(1 << 60);
        assert!(!outside.is_in_heap(&LAYOUT));
    }

    // ========================================================================
    // Atomic slot helpers
    // ========================================================================

    #[test]
    fn test_heal_success_and_loss() {
        let stale = ColoredAddress::colored(0x10, Color::Marked0, &LAYOUT);
        let healed = stale.good(&relocate_view());
        let slot = AtomicU64::new(stale.raw());

        assert_eq!(ColoredAddress::heal(&slot, stale, healed), healed);
        assert_eq!(ColoredAddress::load(&slot), healed);

        // Second heal from the same stale value observes the first one
        let other = ColoredAddress::colored(0x20, Color::Remapped, &LAYOUT);
        assert_eq!(ColoredAddress::heal(&slot, stale, other), healed);
    }
}
