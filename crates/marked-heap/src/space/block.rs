//! `MarkedBlock`: one 16 KiB arena of same-sized cells.
//!
//! The block header lives in-band at the start of the block, so the block
//! owning any interior address is found by masking the address with
//! [`BLOCK_MASK`]. Cells start on atom boundaries after the header.

use std::io;
use std::mem::{self, ManuallyDrop};
use std::ptr::{self, NonNull};

use sys_alloc::{Mmap, MmapOptions};

use super::bitmap::MarkBitmap;
use crate::cell::{destroy_cell, write_zombie, CellHeader};
use crate::value::CellPtr;

// ============================================================================
// Constants
// ============================================================================

/// Size and alignment of every block.
pub const BLOCK_SIZE: usize = 16 * 1024;

/// Mask extracting the block base from an interior address.
pub const BLOCK_MASK: usize = !(BLOCK_SIZE - 1);

/// Allocation granule: the size of the largest primitive, so that any
/// built-in payload is naturally aligned.
pub const ATOM_SIZE: usize = mem::size_of::<f64>();

/// Number of atoms in a block, header included.
pub const ATOMS_PER_BLOCK: usize = BLOCK_SIZE / ATOM_SIZE;

/// Magic number for validating blocks ("MBLK" in ASCII).
pub const MAGIC_MARKED_BLOCK: u32 = 0x4D42_4C4B;

/// First atom that can start a cell; the header never shares an atom with one.
pub const FIRST_ATOM: usize = mem::size_of::<MarkedBlock>().div_ceil(ATOM_SIZE);

/// Pointer to a block header.
pub type BlockPtr = NonNull<MarkedBlock>;

/// Returns true if `addr` is a multiple of [`ATOM_SIZE`].
#[inline]
#[must_use]
pub const fn is_atom_aligned(addr: usize) -> bool {
    addr & (ATOM_SIZE - 1) == 0
}

/// Returns the base address of the block that would own `addr`.
#[inline]
#[must_use]
pub const fn block_base(addr: usize) -> usize {
    addr & BLOCK_MASK
}

// ============================================================================
// MarkedBlock
// ============================================================================

/// Metadata stored at the beginning of each block.
#[repr(C)]
pub struct MarkedBlock {
    magic: u32,
    atoms_per_cell: u32,
    cell_size: usize,
    /// Allocation cursor, always a cell start.
    next_atom: usize,
    /// One past the last atom that can start a whole cell.
    end_atom: usize,
    prev: Option<BlockPtr>,
    next: Option<BlockPtr>,
    region: ManuallyDrop<Mmap>,
    marks: MarkBitmap,
}

impl MarkedBlock {
    /// Reserves a block for cells of `cell_size` bytes and fills every slot
    /// with a zombie.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the region cannot be reserved.
    ///
    /// # Panics
    ///
    /// Panics if `cell_size` is zero or too large for even one cell to fit.
    pub fn create(cell_size: usize) -> io::Result<BlockPtr> {
        assert!(cell_size > 0, "cell size must be positive");
        let atoms_per_cell = cell_size.div_ceil(ATOM_SIZE);
        assert!(
            FIRST_ATOM + atoms_per_cell <= ATOMS_PER_BLOCK,
            "cell size {cell_size} does not fit in a block"
        );

        // SAFETY: the mapping is kept inside the block header and released
        // only by `destroy`.
        let region = unsafe {
            MmapOptions::new()
                .len(BLOCK_SIZE)
                .align(BLOCK_SIZE)
                .map_anon()?
        };
        let base = region.ptr();
        debug_assert_eq!(base as usize & !BLOCK_MASK, 0);

        #[allow(clippy::cast_possible_truncation)]
        let packed_atoms = atoms_per_cell as u32;
        let header = MarkedBlock {
            magic: MAGIC_MARKED_BLOCK,
            atoms_per_cell: packed_atoms,
            cell_size: atoms_per_cell * ATOM_SIZE,
            next_atom: FIRST_ATOM,
            end_atom: ATOMS_PER_BLOCK - atoms_per_cell + 1,
            prev: None,
            next: None,
            region: ManuallyDrop::new(region),
            marks: MarkBitmap::new(),
        };

        // SAFETY: `base` is BLOCK_SIZE bytes of fresh, aligned, writable memory.
        unsafe {
            base.cast::<MarkedBlock>().write(header);
            let block = &*base.cast::<MarkedBlock>();
            for atom in block.cell_atoms() {
                write_zombie(base.add(atom * ATOM_SIZE));
            }
            Ok(NonNull::new_unchecked(base.cast()))
        }
    }

    /// Destroys every remaining cell and releases the block's memory.
    ///
    /// # Safety
    ///
    /// `block` must come from [`create`](Self::create), must not be linked
    /// into any list, and must not be used afterwards.
    pub unsafe fn destroy(block: BlockPtr) {
        unsafe {
            let header = &mut *block.as_ptr();
            debug_assert!(header.is_valid());
            for atom in header.cell_atoms() {
                destroy_cell(header.atom_ptr(atom));
            }
            header.magic = 0;
            let region = ptr::read(&header.region);
            drop(ManuallyDrop::into_inner(region));
        }
    }

    /// Finds the block that would own `addr`, without checking that it exists.
    ///
    /// # Safety
    ///
    /// The result may only be dereferenced if the caller knows a block lives
    /// at that base.
    #[inline]
    #[must_use]
    pub unsafe fn block_for(addr: usize) -> BlockPtr {
        unsafe { NonNull::new_unchecked(block_base(addr) as *mut Self) }
    }

    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.magic == MAGIC_MARKED_BLOCK
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        self.region.ptr()
    }

    /// Address of the first byte of the block.
    #[inline]
    #[must_use]
    pub fn address(&self) -> usize {
        self.base() as usize
    }

    #[inline]
    fn atom_ptr(&self, atom: usize) -> NonNull<CellHeader> {
        // SAFETY: callers pass atoms below ATOMS_PER_BLOCK.
        unsafe { NonNull::new_unchecked(self.base().add(atom * ATOM_SIZE).cast()) }
    }

    #[inline]
    fn cell_atoms(&self) -> impl Iterator<Item = usize> {
        (FIRST_ATOM..self.end_atom).step_by(self.atoms_per_cell as usize)
    }

    /// Atom index of `addr`, which must lie inside this block.
    #[inline]
    #[must_use]
    pub fn atom_number(&self, addr: usize) -> usize {
        debug_assert_eq!(block_base(addr), self.address());
        (addr - self.address()) / ATOM_SIZE
    }

    /// Size of each cell in bytes, rounded up to whole atoms.
    #[inline]
    #[must_use]
    pub const fn cell_size(&self) -> usize {
        self.cell_size
    }

    #[inline]
    #[must_use]
    pub const fn atoms_per_cell(&self) -> usize {
        self.atoms_per_cell as usize
    }

    /// Number of cell slots in this block.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        (self.end_atom - FIRST_ATOM).div_ceil(self.atoms_per_cell())
    }

    // ---- allocation ----

    /// Returns the next slot whose mark bit is clear, marking it.
    ///
    /// Whatever occupied the slot is destroyed first; after a collection
    /// that did not sweep, that is how dead cells are finalized. The slot
    /// comes back holding a zombie header.
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        while self.next_atom < self.end_atom {
            let atom = self.next_atom;
            self.next_atom += self.atoms_per_cell();
            if !self.marks.test_and_set(atom) {
                let cell = self.atom_ptr(atom);
                // SAFETY: every slot always holds a constructed or zombie cell.
                unsafe { destroy_cell(cell) };
                return Some(cell.cast());
            }
        }
        None
    }

    /// Rewinds the allocation cursor to the first cell.
    pub const fn reset(&mut self) {
        self.next_atom = FIRST_ATOM;
    }

    // ---- marking ----

    #[inline]
    #[must_use]
    pub fn is_marked(&self, addr: usize) -> bool {
        self.marks.get(self.atom_number(addr))
    }

    /// Sets the mark bit of the cell at `addr`, returning the previous value.
    #[inline]
    pub fn test_and_set_marked(&mut self, addr: usize) -> bool {
        let atom = self.atom_number(addr);
        self.marks.test_and_set(atom)
    }

    #[inline]
    pub fn set_marked(&mut self, addr: usize) {
        let atom = self.atom_number(addr);
        self.marks.set(atom);
    }

    pub fn clear_marks(&mut self) {
        self.marks.clear_all();
    }

    #[must_use]
    pub fn mark_count(&self) -> usize {
        self.marks.count()
    }

    /// True if no cell in the block is marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mark_count() == 0
    }

    /// True if `addr` is the start of a live cell in this block.
    ///
    /// Dead cells still physically present are excluded, so conservative
    /// scanning never revives one.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        let base = self.address();
        if addr < base || addr - base >= BLOCK_SIZE || !is_atom_aligned(addr) {
            return false;
        }
        self.marks.get((addr - base) / ATOM_SIZE)
    }

    // ---- sweeping and iteration ----

    /// Destroys every unmarked cell that still holds a value and returns how
    /// many there were.
    pub fn sweep(&mut self) -> usize {
        let mut destroyed = 0;
        for atom in self.cell_atoms() {
            if self.marks.get(atom) {
                continue;
            }
            let cell = self.atom_ptr(atom);
            // SAFETY: the slot holds a constructed or zombie cell.
            unsafe {
                if !cell.as_ref().is_zombie() {
                    destroy_cell(cell);
                    destroyed += 1;
                }
            }
        }
        destroyed
    }

    /// Calls `f` on every marked cell.
    pub fn for_each_cell<F: FnMut(CellPtr)>(&self, mut f: F) {
        for atom in self.cell_atoms() {
            if self.marks.get(atom) {
                // SAFETY: a marked atom is the start of a live cell.
                f(unsafe { CellPtr::from_raw(self.atom_ptr(atom)) });
            }
        }
    }

    // ---- size-class list links ----

    #[inline]
    #[must_use]
    pub const fn next(&self) -> Option<BlockPtr> {
        self.next
    }

    #[inline]
    #[must_use]
    pub const fn prev(&self) -> Option<BlockPtr> {
        self.prev
    }

    #[inline]
    pub const fn set_next(&mut self, next: Option<BlockPtr>) {
        self.next = next;
    }

    #[inline]
    pub const fn set_prev(&mut self, prev: Option<BlockPtr>) {
        self.prev = prev;
    }
}
