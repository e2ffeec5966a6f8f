//! Per-block mark bitmap.
//!
//! One bit per atom. Only atoms that start a cell are ever set, so a set bit
//! doubles as "this address is the start of a live cell".

use super::block::ATOMS_PER_BLOCK;

/// Number of `u64` words backing one block's bitmap.
pub const BITMAP_WORDS: usize = ATOMS_PER_BLOCK / 64;

/// Mark bits for every atom of one block.
///
/// Marking is single-threaded, so plain words are enough.
///
/// ```
/// use marked_heap::space::MarkBitmap;
///
/// let mut bitmap = MarkBitmap::new();
/// assert!(!bitmap.test_and_set(7));
/// assert!(bitmap.test_and_set(7));
/// assert_eq!(bitmap.count(), 1);
/// ```
#[derive(Debug, Clone)]
#[repr(C)]
pub struct MarkBitmap {
    words: [u64; BITMAP_WORDS],
}

impl MarkBitmap {
    /// Creates a bitmap with every bit clear.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: [0; BITMAP_WORDS],
        }
    }

    #[inline]
    const fn split(index: usize) -> (usize, u64) {
        (index / 64, 1u64 << (index % 64))
    }

    /// Returns whether bit `index` is set.
    ///
    /// # Panics
    ///
    /// Panics if `index >= ATOMS_PER_BLOCK`.
    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> bool {
        let (word, mask) = Self::split(index);
        self.words[word] & mask != 0
    }

    /// Sets bit `index`.
    #[inline]
    pub const fn set(&mut self, index: usize) {
        let (word, mask) = Self::split(index);
        self.words[word] |= mask;
    }

    /// Sets bit `index` and returns its previous value.
    #[inline]
    pub const fn test_and_set(&mut self, index: usize) -> bool {
        let (word, mask) = Self::split(index);
        let prev = self.words[word] & mask != 0;
        self.words[word] |= mask;
        prev
    }

    /// Clears bit `index`.
    #[inline]
    pub const fn clear(&mut self, index: usize) {
        let (word, mask) = Self::split(index);
        self.words[word] &= !mask;
    }

    /// Clears every bit.
    #[inline]
    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Number of set bits.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl Default for MarkBitmap {
    fn default() -> Self {
        Self::new()
    }
}
