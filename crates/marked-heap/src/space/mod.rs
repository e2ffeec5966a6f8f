//! `MarkedSpace`: size-class segregated block allocation.
//!
//! Requests up to [`PRECISE_CUTOFF`] bytes are served from "precise" classes
//! stepping by one atom; larger requests up to [`MAX_CELL_SIZE`] use
//! "imprecise" classes stepping by [`IMPRECISE_STEP`]. Each class threads its
//! blocks onto a null-terminated doubly linked list and keeps an allocation
//! cursor into it. A hash set of block bases answers "is this a block" for
//! conservative pointer validation.

mod bitmap;
mod block;

pub use bitmap::{MarkBitmap, BITMAP_WORDS};
pub use block::{
    block_base, is_atom_aligned, BlockPtr, MarkedBlock, ATOMS_PER_BLOCK, ATOM_SIZE, BLOCK_MASK,
    BLOCK_SIZE, FIRST_ATOM,
};

use std::collections::HashSet;
use std::io;
use std::ptr::NonNull;

use crate::value::CellPtr;

// ============================================================================
// Size classes
// ============================================================================

/// Step between precise size classes.
pub const PRECISE_STEP: usize = ATOM_SIZE;

/// Largest request served by a precise class.
pub const PRECISE_CUTOFF: usize = 128;

/// Step between imprecise size classes.
pub const IMPRECISE_STEP: usize = 128;

/// Largest request the space can serve.
pub const MAX_CELL_SIZE: usize = 1024;

const PRECISE_COUNT: usize = PRECISE_CUTOFF / PRECISE_STEP;
const IMPRECISE_COUNT: usize = MAX_CELL_SIZE / IMPRECISE_STEP;

/// Total number of size classes.
pub const SIZE_CLASS_COUNT: usize = PRECISE_COUNT + IMPRECISE_COUNT;

/// Identifies one size class of a [`MarkedSpace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SizeClassId(u8);

impl SizeClassId {
    /// Index of the class inside the space's class table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// True for classes stepping by one atom.
    #[must_use]
    pub const fn is_precise(self) -> bool {
        self.index() < PRECISE_COUNT
    }
}

/// One size class: its cell size, its block list and its allocation cursor.
#[derive(Debug)]
pub struct SizeClass {
    cell_size: usize,
    first_block: Option<BlockPtr>,
    last_block: Option<BlockPtr>,
    next_block: Option<BlockPtr>,
    block_count: usize,
}

impl SizeClass {
    const fn new(cell_size: usize) -> Self {
        Self {
            cell_size,
            first_block: None,
            last_block: None,
            next_block: None,
            block_count: 0,
        }
    }

    /// Size of every cell in this class.
    #[must_use]
    pub const fn cell_size(&self) -> usize {
        self.cell_size
    }

    /// Number of blocks owned by this class.
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.block_count
    }

    fn blocks(&self) -> BlockIter {
        BlockIter {
            next: self.first_block,
        }
    }

    fn append(&mut self, block: BlockPtr) {
        // SAFETY: blocks on the list are live and owned by this class.
        unsafe {
            let header = &mut *block.as_ptr();
            header.set_prev(self.last_block);
            header.set_next(None);
            match self.last_block {
                Some(last) => (*last.as_ptr()).set_next(Some(block)),
                None => self.first_block = Some(block),
            }
        }
        self.last_block = Some(block);
        self.block_count += 1;
    }

    fn remove(&mut self, block: BlockPtr) {
        // SAFETY: `block` is on this class's list.
        unsafe {
            let header = &mut *block.as_ptr();
            let (prev, next) = (header.prev(), header.next());
            match prev {
                Some(prev) => (*prev.as_ptr()).set_next(next),
                None => self.first_block = next,
            }
            match next {
                Some(next) => (*next.as_ptr()).set_prev(prev),
                None => self.last_block = prev,
            }
            header.set_prev(None);
            header.set_next(None);
            if self.next_block == Some(block) {
                self.next_block = next;
            }
        }
        self.block_count -= 1;
    }
}

struct BlockIter {
    next: Option<BlockPtr>,
}

impl Iterator for BlockIter {
    type Item = BlockPtr;

    fn next(&mut self) -> Option<BlockPtr> {
        let block = self.next?;
        // SAFETY: list links only point at live blocks.
        self.next = unsafe { block.as_ref().next() };
        Some(block)
    }
}

// ============================================================================
// MarkedSpace
// ============================================================================

/// All blocks of a heap, partitioned into size classes.
pub struct MarkedSpace {
    /// Boxed so class addresses stay fixed while the space moves.
    size_classes: Box<[SizeClass; SIZE_CLASS_COUNT]>,
    blocks: HashSet<usize>,
    water_mark: usize,
    high_water_mark: usize,
}

impl MarkedSpace {
    /// Creates an empty space that may grow to `high_water_mark` bytes of
    /// blocks before [`allocate`](Self::allocate) asks for a collection.
    #[must_use]
    pub fn new(high_water_mark: usize) -> Self {
        let size_classes = Box::new(std::array::from_fn(|i| {
            let cell_size = if i < PRECISE_COUNT {
                (i + 1) * PRECISE_STEP
            } else {
                (i - PRECISE_COUNT + 1) * IMPRECISE_STEP
            };
            SizeClass::new(cell_size)
        }));
        Self {
            size_classes,
            blocks: HashSet::new(),
            water_mark: 0,
            high_water_mark,
        }
    }

    /// Picks the class serving `bytes`, or `None` above [`MAX_CELL_SIZE`].
    ///
    /// The same request always yields the same class.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn size_class_for(bytes: usize) -> Option<SizeClassId> {
        let bytes = if bytes == 0 { 1 } else { bytes };
        if bytes <= PRECISE_CUTOFF {
            Some(SizeClassId(((bytes - 1) / PRECISE_STEP) as u8))
        } else if bytes <= MAX_CELL_SIZE {
            Some(SizeClassId((PRECISE_COUNT + (bytes - 1) / IMPRECISE_STEP) as u8))
        } else {
            None
        }
    }

    /// The class behind `id`.
    #[must_use]
    pub fn size_class(&self, id: SizeClassId) -> &SizeClass {
        &self.size_classes[id.index()]
    }

    // ---- allocation ----

    /// Allocates a zombie-initialized, marked slot for `bytes`.
    ///
    /// Returns `Ok(None)` when the request cannot be served without growing
    /// past the high-water mark; the caller is expected to collect and
    /// retry.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a new block cannot be reserved.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` exceeds [`MAX_CELL_SIZE`].
    pub fn allocate(&mut self, bytes: usize) -> io::Result<Option<NonNull<u8>>> {
        let Some(class) = Self::size_class_for(bytes) else {
            panic!("cell of {bytes} bytes exceeds the maximum cell size of {MAX_CELL_SIZE}");
        };
        self.allocate_from_size_class(class)
    }

    /// Allocates from the blocks of one class, adding a block if the
    /// high-water mark allows it.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a new block cannot be reserved.
    pub fn allocate_from_size_class(
        &mut self,
        id: SizeClassId,
    ) -> io::Result<Option<NonNull<u8>>> {
        let class = &mut self.size_classes[id.index()];
        while let Some(block) = class.next_block {
            // SAFETY: the cursor only points at blocks of this class.
            let header = unsafe { &mut *block.as_ptr() };
            if let Some(cell) = header.allocate() {
                return Ok(Some(cell));
            }
            self.water_mark += BLOCK_SIZE;
            class.next_block = header.next();
        }

        if self.water_mark < self.high_water_mark {
            return self.allocate_with_new_block(id).map(Some);
        }
        Ok(None)
    }

    /// Adds a block to class `id` regardless of the high-water mark and
    /// allocates from it.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the block cannot be reserved.
    pub fn allocate_with_new_block(&mut self, id: SizeClassId) -> io::Result<NonNull<u8>> {
        let block = self.allocate_block(id)?;
        // SAFETY: the block was just created and has at least one free slot.
        let cell = unsafe { (*block.as_ptr()).allocate() };
        Ok(cell.unwrap_or_else(|| unreachable!("a fresh block always has a free cell")))
    }

    /// Reserves a block for class `id`, appends it to the class's list and
    /// makes it the allocation cursor.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the block cannot be reserved.
    pub fn allocate_block(&mut self, id: SizeClassId) -> io::Result<BlockPtr> {
        let class = &mut self.size_classes[id.index()];
        let block = MarkedBlock::create(class.cell_size)?;
        class.append(block);
        class.next_block = Some(block);
        // SAFETY: just created.
        let address = unsafe { block.as_ref().address() };
        self.blocks.insert(address);

        #[cfg(feature = "tracing")]
        crate::tracing::internal::log_block_created(class.cell_size, address);

        Ok(block)
    }

    fn free_block(&mut self, class: usize, block: BlockPtr) {
        self.size_classes[class].remove(block);
        // SAFETY: unlinked above; the block is owned by this space.
        unsafe {
            self.blocks.remove(&block.as_ref().address());
            MarkedBlock::destroy(block);
        }
    }

    /// Releases every block in `blocks` back to the OS.
    pub fn free_blocks(&mut self, blocks: &[BlockPtr]) {
        for &block in blocks {
            // SAFETY: only blocks owned by this space are handed in.
            let cell_size = unsafe { block.as_ref().cell_size() };
            let class = Self::size_class_for(cell_size)
                .unwrap_or_else(|| unreachable!("block cell size is always a class size"));
            self.free_block(class.index(), block);
        }
    }

    /// Releases blocks with no marked cells and returns how many there were.
    pub fn shrink(&mut self) -> usize {
        let empties: Vec<BlockPtr> = self
            .blocks_iter()
            // SAFETY: iterated blocks are live.
            .filter(|block| unsafe { block.as_ref().is_empty() })
            .collect();
        self.free_blocks(&empties);

        #[cfg(feature = "tracing")]
        if !empties.is_empty() {
            crate::tracing::internal::log_blocks_released(empties.len());
        }

        empties.len()
    }

    // ---- collection support ----

    /// Clears the mark bits of every block.
    pub fn clear_marks(&mut self) {
        for block in self.blocks_iter() {
            // SAFETY: iterated blocks are live and not otherwise borrowed.
            unsafe { (*block.as_ptr()).clear_marks() };
        }
    }

    /// Destroys every unmarked cell and returns how many were destroyed.
    pub fn sweep(&mut self) -> usize {
        self.blocks_iter()
            // SAFETY: iterated blocks are live and not otherwise borrowed.
            .map(|block| unsafe { (*block.as_ptr()).sweep() })
            .sum()
    }

    /// Rewinds every allocation cursor and the water mark.
    pub fn reset(&mut self) {
        self.water_mark = 0;
        for class in self.size_classes.iter_mut() {
            class.next_block = class.first_block;
            for block in class.blocks() {
                // SAFETY: iterated blocks are live.
                unsafe { (*block.as_ptr()).reset() };
            }
        }
    }

    /// True if `addr` is the start of a live cell in this space.
    ///
    /// Checks run cheapest first: alignment, block membership, mark bit.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        if addr == 0 || !is_atom_aligned(addr) {
            return false;
        }
        let base = block_base(addr);
        if !self.blocks.contains(&base) {
            return false;
        }
        // SAFETY: `base` is the address of a live block.
        unsafe { MarkedBlock::block_for(base).as_ref().contains(addr) }
    }

    // ---- iteration and statistics ----

    fn blocks_iter(&self) -> impl Iterator<Item = BlockPtr> + '_ {
        self.size_classes.iter().flat_map(SizeClass::blocks)
    }

    /// Calls `f` on every live cell.
    pub fn for_each_cell<F: FnMut(CellPtr)>(&self, mut f: F) {
        for block in self.blocks_iter() {
            // SAFETY: iterated blocks are live.
            unsafe { block.as_ref().for_each_cell(&mut f) };
        }
    }

    /// Number of live cells.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.blocks_iter()
            // SAFETY: iterated blocks are live.
            .map(|block| unsafe { block.as_ref().mark_count() })
            .sum()
    }

    /// Bytes occupied by live cells.
    #[must_use]
    pub fn size(&self) -> usize {
        self.blocks_iter()
            .map(|block| {
                // SAFETY: iterated blocks are live.
                let header = unsafe { block.as_ref() };
                header.mark_count() * header.cell_size()
            })
            .sum()
    }

    /// Bytes reserved for blocks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.blocks.len() * BLOCK_SIZE
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub const fn water_mark(&self) -> usize {
        self.water_mark
    }

    #[must_use]
    pub const fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    pub const fn set_high_water_mark(&mut self, high_water_mark: usize) {
        self.high_water_mark = high_water_mark;
    }

    /// Releases every block, destroying any cells still in them.
    pub fn destroy(&mut self) {
        let all: Vec<BlockPtr> = self.blocks_iter().collect();
        self.free_blocks(&all);
        debug_assert!(self.blocks.is_empty());
    }
}

impl Drop for MarkedSpace {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ============================================================================
// Mark bit access from a cell pointer
// ============================================================================

/// Returns whether `cell` is marked.
///
/// # Safety
///
/// `cell` must point into a live block.
#[inline]
#[must_use]
pub unsafe fn is_marked(cell: CellPtr) -> bool {
    unsafe { MarkedBlock::block_for(cell.addr()).as_ref().is_marked(cell.addr()) }
}

/// Marks `cell` and returns whether it was already marked.
///
/// # Safety
///
/// `cell` must point into a live block that is not otherwise borrowed.
#[inline]
pub unsafe fn test_and_set_marked(cell: CellPtr) -> bool {
    unsafe { (*MarkedBlock::block_for(cell.addr()).as_ptr()).test_and_set_marked(cell.addr()) }
}
