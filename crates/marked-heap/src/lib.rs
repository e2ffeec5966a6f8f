//! A block-structured, conservative mark-sweep heap.
//!
//! `marked-heap` stores [`Cell`]s in 16 KiB aligned blocks segregated by
//! size class and reclaims them with a stop-the-world mark-sweep collector.
//! Roots come from several places:
//!
//! - **Protected cells**: explicit, counted pins via [`Heap::protect`].
//! - **Global handles**: slots in the [`HandleHeap`], strong or weak. Weak
//!   handles have an owner that can keep them alive through opaque roots
//!   and is told when their cell dies.
//! - **Local handles**: scoped slots on the [`HandleStack`].
//! - **Conservative roots**: machine words from a [`RootScanner`], kept only
//!   if they are exactly the address of a live cell.
//!
//! Marking is iterative. The [`MarkStack`] works through pending cells and
//! runs of values without recursing, so deep object graphs cannot overflow
//! the native stack.
//!
//! # Quick Start
//!
//! ```
//! use marked_heap::{Cell, Heap, JSValue, Trace};
//!
//! #[derive(Trace, Cell)]
//! struct Node {
//!     value: JSValue,
//!     next: Option<marked_heap::CellPtr>,
//! }
//!
//! let mut heap = Heap::new();
//! let tail = heap.allocate_cell(Node { value: 2.into(), next: None });
//! let head = heap.allocate_cell(Node { value: 1.into(), next: Some(tail) });
//!
//! let root = heap.allocate_global_handle();
//! heap.handle_heap_mut().set(root, head.into());
//!
//! heap.collect_all_garbage();
//! assert_eq!(heap.object_count(), 2);
//! assert_eq!(heap.get::<Node>(head).unwrap().next, Some(tail));
//! ```
//!
//! # Thread Safety
//!
//! A [`Heap`] and its cells belong to one thread. [`CellPtr`] is `!Send`
//! and `!Sync`.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cell;
mod config;
mod error;
mod gc;
pub mod handles;
mod heap;
pub mod metrics;
pub mod space;
mod stack;
mod trace;
#[cfg(feature = "tracing")]
mod tracing;
mod value;

// Re-export public API
pub use cell::{Cell, CellHeader, CellType};
pub use config::HeapConfig;
pub use error::AllocationError;
pub use gc::{ConservativeRoots, MarkStack, RootScanner, DEFAULT_BATCH_THRESHOLD};
pub use handles::{
    HandleHeap, HandleList, HandleSlot, HandleStack, LocalHandle, WeakHandleOwner,
};
pub use heap::{Heap, OperationInProgress, SweepToggle};
pub use metrics::{CollectionType, GcMetrics};
pub use stack::{get_stack_bounds, MachineStackScanner, StackBounds};
pub use trace::{Trace, Visitor};
pub use value::{CellPtr, JSValue};

// Re-export derive macros when feature is enabled
#[cfg(feature = "derive")]
pub use marked_heap_derive::{Cell, Trace};

#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub mod test_util {
    use crate::{Heap, JSValue, RootScanner};

    /// A root scanner fed from a shared list of words, standing in for a
    /// machine stack in tests.
    #[derive(Debug, Clone, Default)]
    pub struct WordScanner {
        words: std::rc::Rc<std::cell::RefCell<Vec<usize>>>,
    }

    impl WordScanner {
        /// Creates an empty scanner.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes `word` visible to the next collections.
        pub fn push(&self, word: usize) {
            self.words.borrow_mut().push(word);
        }

        /// Forgets every word.
        pub fn clear(&self) {
            self.words.borrow_mut().clear();
        }
    }

    impl RootScanner for WordScanner {
        fn gather_conservative_roots(&mut self, roots: &mut crate::ConservativeRoots<'_>) {
            roots.add_words(&self.words.borrow());
        }
    }

    /// Builds a singly linked chain of `len` cells and returns its head.
    pub fn chain(heap: &mut Heap, len: usize) -> JSValue {
        let mut next = JSValue::Null;
        for _ in 0..len {
            next = heap.allocate_cell(Link { next }).into();
        }
        next
    }

    /// One link of [`chain`].
    #[derive(Debug)]
    pub struct Link {
        /// The next link or `Null`.
        pub next: JSValue,
    }

    // SAFETY: visits the only cell reference.
    unsafe impl crate::Trace for Link {
        fn trace(&self, visitor: &mut impl crate::Visitor) {
            visitor.append(self.next);
        }
    }

    impl crate::Cell for Link {}
}
