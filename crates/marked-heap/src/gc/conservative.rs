//! Conservative root gathering.
//!
//! Some roots are plain machine words whose type is unknown, typically
//! stack slots and spilled registers. A word is kept as a root only if it is
//! exactly the address of a live cell, so false positives can only retain
//! garbage, never corrupt it.

use std::ptr::NonNull;

use crate::space::MarkedSpace;
use crate::value::CellPtr;

/// Candidate words filtered against a space.
pub struct ConservativeRoots<'a> {
    space: &'a MarkedSpace,
    roots: Vec<CellPtr>,
}

impl<'a> ConservativeRoots<'a> {
    /// Starts an empty root set that validates against `space`.
    #[must_use]
    pub const fn new(space: &'a MarkedSpace) -> Self {
        Self {
            space,
            roots: Vec::new(),
        }
    }

    /// Records `word` if it is the address of a live cell. Returns whether
    /// it was kept.
    pub fn add(&mut self, word: usize) -> bool {
        if !self.space.contains(word) {
            return false;
        }
        // SAFETY: `contains` only accepts non-null cell starts.
        let cell = unsafe { CellPtr::from_raw(NonNull::new_unchecked(word as *mut _)) };
        self.roots.push(cell);
        true
    }

    /// Scans `len` words starting at `start`.
    ///
    /// # Safety
    ///
    /// `[start, start + len)` must be readable.
    pub unsafe fn add_range(&mut self, start: *const usize, len: usize) {
        for i in 0..len {
            // SAFETY: the caller guarantees the range is readable.
            let word = unsafe { start.add(i).read_volatile() };
            self.add(word);
        }
    }

    /// Adds every word of `words`.
    pub fn add_words(&mut self, words: &[usize]) {
        for &word in words {
            self.add(word);
        }
    }

    /// The roots kept so far. Duplicates are possible.
    #[must_use]
    pub fn roots(&self) -> &[CellPtr] {
        &self.roots
    }

    /// Number of roots kept so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// True if nothing was kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Releases the borrow on the space, keeping the roots.
    #[must_use]
    pub fn into_roots(self) -> Vec<CellPtr> {
        self.roots
    }
}

impl std::fmt::Debug for ConservativeRoots<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConservativeRoots")
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

/// A source of conservative roots, consulted at the start of every
/// collection while mark bits still describe the previous cycle.
pub trait RootScanner {
    /// Feeds candidate words into `roots`.
    fn gather_conservative_roots(&mut self, roots: &mut ConservativeRoots<'_>);
}

impl<F> RootScanner for F
where
    F: FnMut(&mut ConservativeRoots<'_>),
{
    fn gather_conservative_roots(&mut self, roots: &mut ConservativeRoots<'_>) {
        self(roots);
    }
}
