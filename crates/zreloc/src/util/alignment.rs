//! Alignment Utilities
//!
//! Helper functions for power-of-two alignment.

/// Alignment - utility for alignment operations
pub struct Alignment;

impl Alignment {
    /// Align value up to boundary
    ///
    /// # Examples
    /// ```
    /// use zreloc::util::Alignment;
    /// assert_eq!(Alignment::align_up(100, 8), 104);
    /// assert_eq!(Alignment::align_up(64, 8), 64);
    /// ```
    pub const fn align_up(value: usize, alignment: usize) -> usize {
        (value + alignment - 1) & !(alignment - 1)
    }

    /// Align value down to boundary
    pub const fn align_down(value: usize, alignment: usize) -> usize {
        value & !(alignment - 1)
    }

    /// Check if value is aligned
    pub const fn is_aligned(value: usize, alignment: usize) -> bool {
        value & (alignment - 1) == 0
    }

    /// Align a 64-bit heap offset up to boundary
    pub const fn align_up_u64(value: u64, alignment: u64) -> u64 {
        (value + alignment - 1) & !(alignment - 1)
    }

    /// Word size of heap objects (8 bytes)
    pub const WORD: usize = 8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up_down() {
        assert_eq!(Alignment::align_up(1, 8), 8);
        assert_eq!(Alignment::align_up(0, 8), 0);
        assert_eq!(Alignment::align_down(15, 8), 8);
        assert_eq!(Alignment::align_up_u64(0x1001, 0x1000), 0x2000);
    }

    #[test]
    fn test_is_aligned() {
        assert!(Alignment::is_aligned(4096, 4096));
        assert!(!Alignment::is_aligned(4100, 8));
    }
}
