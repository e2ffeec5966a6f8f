//! Values stored in handles, mark sets and cell fields.

use std::fmt;
use std::ptr::NonNull;

use crate::cell::{Cell, CellBox, CellHeader, CellType};

/// A pointer to the start of a heap cell.
///
/// Only the heap hands these out. A `CellPtr` stays meaningful for as long
/// as its cell is reachable; after the cell is collected the pointer is
/// stale and must not be dereferenced.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellPtr(NonNull<CellHeader>);

impl CellPtr {
    /// Wraps a raw cell start.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a cell header inside a live block.
    #[inline]
    #[must_use]
    pub const unsafe fn from_raw(ptr: NonNull<CellHeader>) -> Self {
        Self(ptr)
    }

    /// The address of the cell.
    #[inline]
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    #[must_use]
    pub(crate) const fn as_non_null(self) -> NonNull<CellHeader> {
        self.0
    }

    #[inline]
    #[must_use]
    pub(crate) fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr().cast()
    }

    /// Reads the header of the cell.
    ///
    /// # Safety
    ///
    /// The cell must not have been collected.
    #[inline]
    #[must_use]
    pub unsafe fn header(&self) -> &CellHeader {
        unsafe { self.0.as_ref() }
    }

    /// The cell's type as recorded in its vtable.
    ///
    /// # Safety
    ///
    /// The cell must not have been collected.
    #[inline]
    #[must_use]
    pub unsafe fn cell_type(self) -> CellType {
        unsafe { self.header().vtable().cell_type }
    }

    /// The cell's class name as recorded in its vtable.
    ///
    /// # Safety
    ///
    /// The cell must not have been collected.
    #[inline]
    #[must_use]
    pub unsafe fn class_name(self) -> &'static str {
        unsafe { (self.header().vtable().class_name)() }
    }

    /// Unchecked typed view of the cell's payload.
    ///
    /// [`Heap::get`](crate::Heap::get) is the checked equivalent.
    ///
    /// # Safety
    ///
    /// The cell must be live and must have been allocated as a `T`.
    #[inline]
    #[must_use]
    pub unsafe fn as_ref<'a, T: Cell>(self) -> &'a T {
        unsafe { &(*self.0.cast::<CellBox<T>>().as_ptr()).value }
    }

    /// Unchecked mutable view of the cell's payload.
    ///
    /// # Safety
    ///
    /// As for [`as_ref`](Self::as_ref), and no other reference to the
    /// payload may be alive.
    #[inline]
    #[must_use]
    pub unsafe fn as_mut<'a, T: Cell>(self) -> &'a mut T {
        unsafe { &mut (*self.0.cast::<CellBox<T>>().as_ptr()).value }
    }
}

impl fmt::Debug for CellPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellPtr({:#x})", self.addr())
    }
}

/// A JavaScript value as seen by the collector.
///
/// Only the `Cell` variant refers to heap memory; every other variant is an
/// immediate and never needs marking.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum JSValue {
    /// The "no value" state of a fresh or cleared slot.
    #[default]
    Empty,
    /// `undefined`.
    Undefined,
    /// `null`.
    Null,
    /// A boolean immediate.
    Boolean(bool),
    /// An integer immediate.
    Int32(i32),
    /// A floating-point immediate.
    Double(f64),
    /// A reference to a heap cell.
    Cell(CellPtr),
}

impl JSValue {
    /// True for the empty value.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// True if this refers to a cell.
    #[inline]
    #[must_use]
    pub const fn is_cell(&self) -> bool {
        matches!(self, Self::Cell(_))
    }

    /// True for `undefined` and `null`.
    #[inline]
    #[must_use]
    pub const fn is_undefined_or_null(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// The referenced cell, if any.
    #[inline]
    #[must_use]
    pub const fn as_cell(&self) -> Option<CellPtr> {
        match self {
            Self::Cell(cell) => Some(*cell),
            _ => None,
        }
    }
}

impl From<CellPtr> for JSValue {
    fn from(cell: CellPtr) -> Self {
        Self::Cell(cell)
    }
}

impl From<Option<CellPtr>> for JSValue {
    fn from(cell: Option<CellPtr>) -> Self {
        cell.map_or(Self::Null, Self::Cell)
    }
}

impl From<i32> for JSValue {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<f64> for JSValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for JSValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}
