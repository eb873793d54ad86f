//! Alignment Utilities
//!
//! Helper functions for memory alignment and shadow-block sizing.

/// Alignment - utility for alignment operations
pub struct Alignment;

impl Alignment {
    /// Align value up to boundary
    ///
    /// # Examples
    /// ```
    /// use nlens::util::Alignment;
    /// assert_eq!(Alignment::align_up(100, 8), 104);
    /// assert_eq!(Alignment::align_up(64, 8), 64);
    /// ```
    pub fn align_up(value: usize, alignment: usize) -> usize {
        (value + alignment - 1) & !(alignment - 1)
    }

    /// Align value down to boundary
    pub fn align_down(value: usize, alignment: usize) -> usize {
        value & !(alignment - 1)
    }

    /// Check if value is aligned
    pub fn is_aligned(value: usize, alignment: usize) -> bool {
        value & (alignment - 1) == 0
    }

    /// Get alignment padding needed
    pub fn padding(value: usize, alignment: usize) -> usize {
        Self::align_up(value, alignment) - value
    }

    /// Round value up to the next power of two (identity on powers of two).
    ///
    /// Shadow fragment windows must be powers of two so that the low bits of
    /// an address index within a fragment and the high bits select the slot.
    pub fn next_power_of_two(value: usize) -> usize {
        value.next_power_of_two()
    }

    /// Number of trailing zero bits of a power of two, i.e. its shift width.
    pub fn shift_of(value: usize) -> u32 {
        debug_assert!(value.is_power_of_two());
        value.trailing_zeros()
    }

    /// Default object alignment (8 bytes)
    pub const DEFAULT: usize = 8;

    /// Machine word (8 bytes)
    pub const WORD: usize = core::mem::size_of::<usize>();

    /// Cache line alignment (64 bytes)
    pub const CACHE_LINE: usize = 64;

    /// Page alignment (4KB)
    pub const PAGE: usize = 4096;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(Alignment::align_up(0, 8), 0);
        assert_eq!(Alignment::align_up(1, 8), 8);
        assert_eq!(Alignment::align_up(8, 8), 8);
        assert_eq!(Alignment::align_up(100, 64), 128);
    }

    #[test]
    fn test_align_down() {
        assert_eq!(Alignment::align_down(0, 8), 0);
        assert_eq!(Alignment::align_down(7, 8), 0);
        assert_eq!(Alignment::align_down(100, 64), 64);
    }

    #[test]
    fn test_is_aligned() {
        assert!(Alignment::is_aligned(0, 4096));
        assert!(Alignment::is_aligned(64, 64));
        assert!(!Alignment::is_aligned(65, 64));
    }

    #[test]
    fn test_padding() {
        assert_eq!(Alignment::padding(100, 8), 4);
        assert_eq!(Alignment::padding(104, 8), 0);
    }

    #[test]
    fn test_next_power_of_two() {
        assert_eq!(Alignment::next_power_of_two(1), 1);
        assert_eq!(Alignment::next_power_of_two(3), 4);
        assert_eq!(Alignment::next_power_of_two(4096), 4096);
        assert_eq!(Alignment::next_power_of_two(4097), 8192);
    }

    #[test]
    fn test_shift_of() {
        assert_eq!(Alignment::shift_of(1), 0);
        assert_eq!(Alignment::shift_of(4096), 12);
        assert_eq!(Alignment::shift_of(1 << 22), 22);
    }
}
