//! Alignment Utilities
//!
//! Helper functions for code and memory alignment.

/// Alignment - utility for alignment operations
pub struct Alignment;

impl Alignment {
    /// Align value up to a power-of-two boundary
    ///
    /// # Examples
    /// ```
    /// use mbridge::util::Alignment;
    ///
    /// assert_eq!(Alignment::align_up(100, 16), 112);
    /// assert_eq!(Alignment::align_up(64, 16), 64);
    /// ```
    pub fn align_up(value: usize, alignment: usize) -> usize {
        (value + alignment - 1) & !(alignment - 1)
    }

    /// Align value down to a power-of-two boundary
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

    /// Method entry alignment in the code image
    pub const CODE: usize = 16;

    /// Trampoline alignment in the arena
    pub const TRAMPOLINE: usize = 16;
}
