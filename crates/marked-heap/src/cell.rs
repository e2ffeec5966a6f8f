//! Cell layout.
//!
//! Every cell starts with a one-word [`CellHeader`] pointing at a static
//! [`CellVTable`]. The vtable carries the type-erased operations the
//! collector needs: destroy the payload, visit its children, and identify
//! its type. Free and swept slots hold a header pointing at the zombie
//! vtable, whose operations do nothing, so every slot in a block can always
//! be treated as a cell.

use std::any::TypeId;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use crate::gc::MarkStack;
use crate::trace::{Trace, Visitor};
use crate::value::{CellPtr, JSValue};

// ============================================================================
// CellType
// ============================================================================

/// Coarse layout categories, ordered so that every leaf type comes before
/// the first compound one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum CellType {
    /// String data; never holds cell references.
    String,
    /// Any other cell without outgoing references.
    Leaf,
    /// An accessor pair.
    GetterSetter,
    /// A plain object.
    Object,
    /// The root object of a global environment.
    GlobalObject,
    /// An array object.
    Array,
}

impl CellType {
    /// First type whose cells may reference other cells.
    pub const COMPOUND: Self = Self::GetterSetter;

    /// Leaf cells hold no cell references, so marking them is enough and
    /// the drain loop never has to visit their children.
    #[inline]
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        (self as u8) < (Self::COMPOUND as u8)
    }

    /// True for the object types.
    #[inline]
    #[must_use]
    pub const fn is_object(self) -> bool {
        matches!(self, Self::Object | Self::GlobalObject | Self::Array)
    }
}

// ============================================================================
// Cell trait
// ============================================================================

/// A type that can live in the heap as a cell.
///
/// Payloads are stored one word past the start of an atom, so their
/// alignment may not exceed the atom size.
///
/// ```ignore
/// use marked_heap::{Cell, CellPtr, Trace};
///
/// #[derive(Trace, Cell)]
/// #[heap(cell_type = Array)]
/// struct Elements {
///     items: Vec<marked_heap::JSValue>,
/// }
/// ```
pub trait Cell: Trace + 'static {
    /// Layout category used for leaf fast paths and diagnostics.
    const CELL_TYPE: CellType = CellType::Object;

    /// Name reported by the type-count diagnostics.
    #[must_use]
    fn class_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

// ============================================================================
// Header and vtable
// ============================================================================

/// Type-erased operations for one cell type.
pub struct CellVTable {
    pub(crate) drop_in_place: unsafe fn(NonNull<CellHeader>),
    pub(crate) visit_children: unsafe fn(NonNull<CellHeader>, &mut MarkStack),
    pub(crate) has_children: unsafe fn(NonNull<CellHeader>) -> bool,
    pub(crate) type_id: fn() -> TypeId,
    pub(crate) class_name: fn() -> &'static str,
    /// The layout category of cells using this vtable.
    pub cell_type: CellType,
}

/// The first word of every cell.
#[repr(C)]
pub struct CellHeader {
    vtable: &'static CellVTable,
}

impl CellHeader {
    #[inline]
    pub(crate) const fn vtable(&self) -> &'static CellVTable {
        self.vtable
    }

    /// True if this slot holds no constructed value.
    #[inline]
    #[must_use]
    pub fn is_zombie(&self) -> bool {
        ptr::eq(self.vtable, &ZOMBIE_VTABLE)
    }

    #[inline]
    pub(crate) fn is<T: Cell>(&self) -> bool {
        (self.vtable.type_id)() == TypeId::of::<T>()
    }
}

/// In-memory layout of a constructed cell.
#[repr(C)]
pub(crate) struct CellBox<T> {
    header: CellHeader,
    pub(crate) value: T,
}

impl<T: Cell> CellBox<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            header: CellHeader {
                vtable: vtable_of::<T>(),
            },
            value,
        }
    }
}

struct Zombie;

fn zombie_type_id() -> TypeId {
    TypeId::of::<Zombie>()
}

const fn zombie_class_name() -> &'static str {
    "Zombie"
}

const unsafe fn zombie_drop(_: NonNull<CellHeader>) {}

const unsafe fn zombie_visit(_: NonNull<CellHeader>, _: &mut MarkStack) {}

const unsafe fn zombie_has_children(_: NonNull<CellHeader>) -> bool {
    false
}

static ZOMBIE_VTABLE: CellVTable = CellVTable {
    drop_in_place: zombie_drop,
    visit_children: zombie_visit,
    has_children: zombie_has_children,
    type_id: zombie_type_id,
    class_name: zombie_class_name,
    cell_type: CellType::Leaf,
};

/// Overwrites the slot at `slot` with a zombie header.
///
/// # Safety
///
/// `slot` must be atom-aligned and point into a block. Any previous occupant
/// must already have been destroyed.
#[inline]
pub(crate) unsafe fn write_zombie(slot: *mut u8) {
    unsafe {
        slot.cast::<CellHeader>().write(CellHeader {
            vtable: &ZOMBIE_VTABLE,
        });
    }
}

/// Runs the destructor of the cell at `cell` and leaves a zombie behind.
///
/// # Safety
///
/// `cell` must point at a constructed or zombie cell.
#[inline]
pub(crate) unsafe fn destroy_cell(cell: NonNull<CellHeader>) {
    unsafe {
        let vtable = cell.as_ref().vtable;
        (vtable.drop_in_place)(cell);
        write_zombie(cell.as_ptr().cast());
    }
}

struct VTableOf<T>(PhantomData<T>);

impl<T: Cell> VTableOf<T> {
    const VTABLE: CellVTable = CellVTable {
        drop_in_place: drop_cell::<T>,
        visit_children: visit_cell::<T>,
        has_children: probe_cell::<T>,
        type_id: TypeId::of::<T>,
        class_name: T::class_name,
        cell_type: T::CELL_TYPE,
    };
}

fn vtable_of<T: Cell>() -> &'static CellVTable {
    &VTableOf::<T>::VTABLE
}

unsafe fn drop_cell<T: Cell>(cell: NonNull<CellHeader>) {
    unsafe {
        let boxed = cell.cast::<CellBox<T>>().as_ptr();
        ptr::drop_in_place(&raw mut (*boxed).value);
    }
}

unsafe fn visit_cell<T: Cell>(cell: NonNull<CellHeader>, visitor: &mut MarkStack) {
    unsafe {
        let boxed = cell.cast::<CellBox<T>>().as_ref();
        boxed.value.trace(visitor);
    }
}

/// Visitor that only records whether anything referenced a cell.
struct ChildProbe(bool);

impl Visitor for ChildProbe {
    fn append(&mut self, value: JSValue) {
        self.0 |= value.is_cell();
    }

    fn append_cell(&mut self, _cell: CellPtr) {
        self.0 = true;
    }

    fn add_opaque_root(&mut self, _root: usize) {}
}

unsafe fn probe_cell<T: Cell>(cell: NonNull<CellHeader>) -> bool {
    let mut probe = ChildProbe(false);
    unsafe {
        cell.cast::<CellBox<T>>().as_ref().value.trace(&mut probe);
    }
    probe.0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain(#[allow(dead_code)] u64);

    unsafe impl Trace for Plain {
        fn trace(&self, _visitor: &mut impl Visitor) {}
    }

    impl Cell for Plain {
        const CELL_TYPE: CellType = CellType::Leaf;
    }

    #[test]
    fn leaf_boundary() {
        assert!(CellType::String.is_leaf());
        assert!(CellType::Leaf.is_leaf());
        assert!(!CellType::GetterSetter.is_leaf());
        assert!(!CellType::Array.is_leaf());
        assert!(CellType::GlobalObject.is_object());
        assert!(!CellType::GetterSetter.is_object());
    }

    #[test]
    fn vtable_describes_its_type() {
        assert_eq!((vtable_of::<Plain>().type_id)(), TypeId::of::<Plain>());
        assert_eq!(vtable_of::<Plain>().cell_type, CellType::Leaf);
        assert!((vtable_of::<Plain>().class_name)().ends_with("Plain"));
    }

    #[test]
    fn zombie_round_trip() {
        let mut slot = [0u64; 4];
        let ptr = slot.as_mut_ptr().cast::<u8>();
        unsafe {
            ptr.cast::<CellBox<Plain>>().write(CellBox::new(Plain(9)));
            let header = NonNull::new_unchecked(ptr.cast::<CellHeader>());
            assert!(!header.as_ref().is_zombie());
            assert!(header.as_ref().is::<Plain>());
            destroy_cell(header);
            assert!(header.as_ref().is_zombie());
            assert!(!header.as_ref().is::<Plain>());
        }
    }
}
