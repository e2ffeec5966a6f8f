//! Trace trait and Visitor pattern for marking.
//!
//! Types that implement `Trace` can be stored in cells. Their `trace`
//! reports every [`JSValue`] and [`CellPtr`] they hold so the mark stack can
//! follow them.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::BuildHasher;
use std::rc::Rc;

use crate::value::{CellPtr, JSValue};

// ============================================================================
// Core Traits
// ============================================================================

/// A type whose cell references can be enumerated.
///
/// # Safety
///
/// Implementations **MUST** report every cell reference they own by calling
/// the visitor. A missed reference lets the collector destroy a cell that is
/// still in use.
///
/// Prefer `#[derive(Trace)]` over a manual implementation.
///
/// ```ignore
/// unsafe impl Trace for Pair {
///     fn trace(&self, visitor: &mut impl Visitor) {
///         self.first.trace(visitor);
///         self.second.trace(visitor);
///     }
/// }
/// ```
pub unsafe trait Trace {
    /// Report all cell references contained in this value.
    fn trace(&self, visitor: &mut impl Visitor);
}

/// Receives cell references during marking.
///
/// The collector's implementation is [`MarkStack`](crate::MarkStack).
pub trait Visitor {
    /// Visit a value; immediates are ignored.
    fn append(&mut self, value: JSValue);

    /// Visit a cell reference.
    fn append_cell(&mut self, cell: CellPtr);

    /// Queue a run of values to be marked later.
    ///
    /// The default visits them immediately.
    ///
    /// # Safety
    ///
    /// `values` must stay valid and unmodified until the current drain
    /// finishes. Storage owned by a live cell or by the heap's root sets
    /// satisfies this.
    unsafe fn append_values(&mut self, values: &[JSValue]) {
        self.append_slice(values);
    }

    /// Visit every value in `values` now.
    fn append_slice(&mut self, values: &[JSValue]) {
        for value in values {
            self.append(*value);
        }
    }

    /// Record that `root` is reachable through the object graph, for weak
    /// handle owners to consult.
    fn add_opaque_root(&mut self, root: usize);
}

// ============================================================================
// Trace implementations for heap references
// ============================================================================

// SAFETY: reports the referenced cell, if any
unsafe impl Trace for JSValue {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        visitor.append(*self);
    }
}

// SAFETY: reports the referenced cell
unsafe impl Trace for CellPtr {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        visitor.append_cell(*self);
    }
}

// ============================================================================
// Trace implementations for primitive types
// ============================================================================

macro_rules! impl_trace_for_primitives {
    ($($t:ty),* $(,)?) => {
        $(
            // SAFETY: Primitive types contain no cell references
            unsafe impl Trace for $t {
                #[inline]
                fn trace(&self, _visitor: &mut impl Visitor) {}
            }
        )*
    };
}

impl_trace_for_primitives! {
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    f32, f64,
    bool, char, (),
    String, str,
    std::time::Duration,
    std::time::Instant,
    std::num::NonZeroU32,
    std::num::NonZeroU64,
    std::num::NonZeroUsize,
}

// ============================================================================
// Trace implementations for std container types
// ============================================================================

// SAFETY: References trace their target
unsafe impl<T: Trace + ?Sized> Trace for &T {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        T::trace(self, visitor);
    }
}

// SAFETY: Box traces its contents
unsafe impl<T: Trace + ?Sized> Trace for Box<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        T::trace(self.as_ref(), visitor);
    }
}

// SAFETY: Rc traces its contents
unsafe impl<T: Trace + ?Sized> Trace for Rc<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        T::trace(self.as_ref(), visitor);
    }
}

// SAFETY: Vec traces all elements
unsafe impl<T: Trace> Trace for Vec<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: Arrays trace all elements
unsafe impl<T: Trace, const N: usize> Trace for [T; N] {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: Slices trace all elements
unsafe impl<T: Trace> Trace for [T] {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: Option traces its contents if Some
unsafe impl<T: Trace> Trace for Option<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        if let Some(inner) = self {
            inner.trace(visitor);
        }
    }
}

// SAFETY: Cell<T> traces a copy of its contents
unsafe impl<T: Trace + Copy> Trace for Cell<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        self.get().trace(visitor);
    }
}

// SAFETY: RefCell traces its contents
unsafe impl<T: Trace + ?Sized> Trace for RefCell<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        // Marking only runs while the heap is exclusively borrowed, so a
        // live mutable borrow here means a payload escaped its cell.
        let inner = self
            .try_borrow()
            .unwrap_or_else(|_| panic!("cell payload mutably borrowed during marking"));
        inner.trace(visitor);
    }
}

// SAFETY: VecDeque traces all elements
unsafe impl<T: Trace> Trace for VecDeque<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: HashMap traces keys and values
unsafe impl<K: Trace, V: Trace, S: BuildHasher> Trace for HashMap<K, V, S> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for (k, v) in self {
            k.trace(visitor);
            v.trace(visitor);
        }
    }
}

// SAFETY: HashSet traces all elements
unsafe impl<T: Trace, S: BuildHasher> Trace for HashSet<T, S> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// SAFETY: BTreeMap traces all key-value pairs
unsafe impl<K: Trace, V: Trace> Trace for BTreeMap<K, V> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for (k, v) in self {
            k.trace(visitor);
            v.trace(visitor);
        }
    }
}

// SAFETY: BTreeSet traces all elements
unsafe impl<T: Trace> Trace for BTreeSet<T> {
    #[inline]
    fn trace(&self, visitor: &mut impl Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

// ============================================================================
// Trace implementations for tuples
// ============================================================================

macro_rules! impl_trace_for_tuples {
    () => {};
    ($first:ident $(, $rest:ident)*) => {
        // SAFETY: Tuples trace all their elements
        unsafe impl<$first: Trace $(, $rest: Trace)*> Trace for ($first, $($rest,)*) {
            #[inline]
            #[allow(non_snake_case)]
            fn trace(&self, visitor: &mut impl Visitor) {
                let ($first, $($rest,)*) = self;
                $first.trace(visitor);
                $($rest.trace(visitor);)*
            }
        }
        impl_trace_for_tuples!($($rest),*);
    };
}

impl_trace_for_tuples!(A, B, C, D, E, F);

// SAFETY: PhantomData contains no actual data
unsafe impl<T: ?Sized> Trace for std::marker::PhantomData<T> {
    #[inline]
    fn trace(&self, _visitor: &mut impl Visitor) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        values: usize,
        cells: usize,
        opaque: Vec<usize>,
    }

    impl Visitor for Counter {
        fn append(&mut self, value: JSValue) {
            self.values += 1;
            if value.is_cell() {
                self.cells += 1;
            }
        }

        fn append_cell(&mut self, _cell: CellPtr) {
            self.cells += 1;
        }

        fn add_opaque_root(&mut self, root: usize) {
            self.opaque.push(root);
        }
    }

    #[test]
    fn containers_report_every_value() {
        let values = vec![JSValue::Null, JSValue::from(1), JSValue::Undefined];
        let mut map = HashMap::new();
        map.insert(1u32, JSValue::from(true));
        let nested = (values, Some(Box::new(map)), RefCell::new(VecDeque::from([JSValue::Empty])));

        let mut counter = Counter::default();
        nested.trace(&mut counter);
        assert_eq!(counter.values, 5);
        assert_eq!(counter.cells, 0);
    }

    #[test]
    fn default_append_values_is_eager() {
        let values = [JSValue::Null; 4];
        let mut counter = Counter::default();
        unsafe { counter.append_values(&values) };
        assert_eq!(counter.values, 4);
        counter.add_opaque_root(3);
        assert_eq!(counter.opaque, vec![3]);
    }
}
