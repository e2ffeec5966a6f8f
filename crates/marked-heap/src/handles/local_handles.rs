//! Scoped local handles.
//!
//! Native code that holds cells only for the duration of a call pushes them
//! here instead of allocating global handles. Slots are bump-allocated
//! inside the innermost scope and released wholesale when that scope is
//! left.

use super::block_stack::BlockStack;
use crate::gc::MarkStack;
use crate::trace::Visitor;
use crate::value::JSValue;

/// Slots per local handle block.
pub const LOCAL_BLOCK_SIZE: usize = 256;

/// A slot on the [`HandleStack`], valid until its scope is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalHandle {
    index: usize,
    depth: usize,
    scope_id: u64,
}

/// Saved stack state, returned by [`HandleStack::enter_scope`].
#[derive(Debug)]
#[must_use = "a scope must be left with the frame that entered it"]
pub struct Frame {
    next: usize,
    scope_id: u64,
}

/// Stack of local handle slots.
#[derive(Debug, Default)]
pub struct HandleStack {
    slots: BlockStack<JSValue, LOCAL_BLOCK_SIZE>,
    next: usize,
    /// Ids of the open scopes, innermost last.
    scopes: Vec<u64>,
    next_scope_id: u64,
}

impl HandleStack {
    /// Creates an empty stack.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: BlockStack::new(),
            next: 0,
            scopes: Vec::new(),
            next_scope_id: 0,
        }
    }

    /// Opens a scope. Handles pushed until the matching
    /// [`leave_scope`](Self::leave_scope) belong to it.
    pub fn enter_scope(&mut self) -> Frame {
        let scope_id = self.next_scope_id;
        self.next_scope_id += 1;
        self.scopes.push(scope_id);
        Frame {
            next: self.next,
            scope_id,
        }
    }

    /// Closes the innermost scope, releasing its handles.
    ///
    /// # Panics
    ///
    /// Panics if `frame` does not belong to the innermost scope.
    pub fn leave_scope(&mut self, frame: Frame) {
        assert_eq!(
            self.scopes.last(),
            Some(&frame.scope_id),
            "handle scopes must be left innermost first"
        );
        self.scopes.pop();
        self.next = frame.next;
        self.slots.shrink(self.next.div_ceil(LOCAL_BLOCK_SIZE));
    }

    /// Pushes an empty slot in the innermost scope.
    ///
    /// # Panics
    ///
    /// Panics if no scope is open.
    pub fn push(&mut self) -> LocalHandle {
        let Some(&scope_id) = self.scopes.last() else {
            panic!("local handle pushed outside a handle scope");
        };
        if self.next == self.slots.capacity() {
            self.slots.grow();
        }
        let index = self.next;
        self.next += 1;
        *self.slot_mut(index) = JSValue::Empty;
        LocalHandle {
            index,
            depth: self.scopes.len(),
            scope_id,
        }
    }

    /// A handle is live while the scope that pushed it is still open.
    fn check(&self, handle: LocalHandle) {
        assert!(
            self.scopes.get(handle.depth - 1) == Some(&handle.scope_id),
            "local handle {handle:?} used after its scope was left"
        );
    }

    fn slot_mut(&mut self, index: usize) -> &mut JSValue {
        self.slots
            .get_mut(index)
            .unwrap_or_else(|| panic!("local handle {index} out of range"))
    }

    /// The value held by `handle`.
    #[must_use]
    pub fn get(&self, handle: LocalHandle) -> JSValue {
        self.check(handle);
        self.slots
            .get(handle.index)
            .copied()
            .unwrap_or_else(|| panic!("local handle {} out of range", handle.index))
    }

    /// Stores `value` in `handle`.
    pub fn set(&mut self, handle: LocalHandle, value: JSValue) {
        self.check(handle);
        *self.slot_mut(handle.index) = value;
    }

    /// Queues every used slot on `visitor`, one mark set per block.
    ///
    /// # Safety
    ///
    /// The stack must not be modified until `visitor` has been drained.
    pub unsafe fn mark(&self, visitor: &mut MarkStack) {
        for block in 0..self.slots.block_count() {
            let start = block * LOCAL_BLOCK_SIZE;
            if start >= self.next {
                break;
            }
            let used = (self.next - start).min(LOCAL_BLOCK_SIZE);
            if let Some(slots) = self.slots.block(block) {
                // SAFETY: forwarded from the caller.
                unsafe { visitor.append_values(&slots[..used]) };
            }
        }
    }

    /// Number of open scopes.
    #[must_use]
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Number of live local handles.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.next
    }

    /// True if no local handle is live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.next == 0
    }

    /// Slot blocks currently allocated.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.slots.block_count()
    }
}
