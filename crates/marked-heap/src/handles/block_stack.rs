//! A growable array made of fixed-size blocks.
//!
//! Elements never move once a block is allocated, and an index stays valid
//! until the block containing it is released by [`BlockStack::shrink`].

/// Fixed-size blocks of `N` elements, addressed by a flat index.
pub struct BlockStack<T, const N: usize> {
    blocks: Vec<Box<[T; N]>>,
    spare: Option<Box<[T; N]>>,
}

impl<T: Default, const N: usize> BlockStack<T, N> {
    /// Elements per block.
    pub const BLOCK_CAPACITY: usize = N;

    /// Creates an empty stack with no blocks.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            blocks: Vec::new(),
            spare: None,
        }
    }

    /// Appends a block and returns the index of its first element.
    ///
    /// A block kept back by the last [`shrink`](Self::shrink) is reused
    /// before a new one is allocated.
    pub fn grow(&mut self) -> usize {
        let block = self.spare.take().map_or_else(
            || Box::new(std::array::from_fn(|_| T::default())),
            |mut block| {
                block.fill_with(T::default);
                block
            },
        );
        self.blocks.push(block);
        (self.blocks.len() - 1) * N
    }

    /// Releases blocks beyond the first `keep`. One released block is kept
    /// as a spare for the next [`grow`](Self::grow).
    pub fn shrink(&mut self, keep: usize) {
        while self.blocks.len() > keep {
            let block = self.blocks.pop();
            if self.spare.is_none() {
                self.spare = block;
            }
        }
    }

    /// Returns the element at `index`, if its block exists.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.blocks.get(index / N).map(|block| &block[index % N])
    }

    /// Returns the element at `index` mutably, if its block exists.
    #[inline]
    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.blocks
            .get_mut(index / N)
            .map(|block| &mut block[index % N])
    }

    /// The elements of block `block`.
    #[must_use]
    pub fn block(&self, block: usize) -> Option<&[T]> {
        self.blocks.get(block).map(|b| &b[..])
    }

    /// Number of allocated blocks.
    #[inline]
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Total elements across allocated blocks.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.blocks.len() * N
    }
}

impl<T: Default, const N: usize> Default for BlockStack<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> std::fmt::Debug for BlockStack<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStack")
            .field("blocks", &self.blocks.len())
            .field("block_capacity", &N)
            .field("has_spare", &self.spare.is_some())
            .finish()
    }
}
