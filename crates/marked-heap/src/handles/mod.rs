//! External roots.
//!
//! A handle is a slot outside the object graph that holds one [`JSValue`]
//! on behalf of native code. Every allocated handle sits in exactly one of
//! three circular lists, each headed by a permanent sentinel node so that
//! linking and unlinking never branch on emptiness:
//!
//! - strong: holds a cell that is kept alive unconditionally,
//! - weak: holds a cell that is kept alive only if its owner says so,
//! - immediate: holds a non-cell value and never needs marking.
//!
//! Nodes move between lists when the cell-ness of their value changes or
//! when they are made weak or strong again.

#![allow(clippy::missing_panics_doc)]

mod block_stack;
mod local_handles;

#[cfg(test)]
mod tests;

pub use block_stack::BlockStack;
pub use local_handles::{Frame, HandleStack, LocalHandle, LOCAL_BLOCK_SIZE};

use std::rc::Rc;

use crate::cell::CellType;
use crate::gc::MarkStack;
use crate::space;
use crate::trace::Visitor;
use crate::value::JSValue;

/// Nodes per handle block.
pub const HANDLE_BLOCK_SIZE: usize = 256;

const NIL: u32 = u32::MAX;

/// Receives callbacks about weak handles it owns.
///
/// Both methods have no-op defaults, so an owner only implements what it
/// needs.
pub trait WeakHandleOwner {
    /// Called while marking for a weak handle whose cell is not yet marked.
    /// Returning `true` keeps the cell alive for this collection.
    ///
    /// `visitor` exposes the opaque roots reported so far.
    fn is_reachable_from_opaque_roots(
        &self,
        slot: HandleSlot,
        value: JSValue,
        context: usize,
        visitor: &mut MarkStack,
    ) -> bool {
        let _ = (slot, value, context, visitor);
        false
    }

    /// Called once for a weak handle whose cell is about to be collected.
    ///
    /// The handle still holds the dying cell. The owner may deallocate this
    /// or any other handle, but must not write to handles or change their
    /// weakness.
    fn finalize(&self, slot: HandleSlot, context: usize, handles: &mut HandleHeap) {
        let _ = (slot, context, handles);
    }
}

/// Identifies one allocated handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleSlot(u32);

impl HandleSlot {
    /// The node index behind this slot.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// The list a node currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandleList {
    /// Holds a cell and keeps it alive.
    Strong,
    /// Holds a cell on behalf of a weak owner.
    Weak,
    /// Holds a non-cell value.
    Immediate,
    /// Not allocated.
    #[default]
    Free,
}

impl HandleList {
    const fn sentinel(self) -> u32 {
        match self {
            Self::Strong => 0,
            Self::Weak => 1,
            Self::Immediate => 2,
            Self::Free => NIL,
        }
    }

    const fn counter(self) -> usize {
        self.sentinel() as usize
    }
}

const SENTINEL_COUNT: u32 = 3;

struct Node {
    value: JSValue,
    prev: u32,
    next: u32,
    list: HandleList,
    is_weak: bool,
    owner: Option<Rc<dyn WeakHandleOwner>>,
    context: usize,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            value: JSValue::Empty,
            prev: NIL,
            next: NIL,
            list: HandleList::Free,
            is_weak: false,
            owner: None,
            context: 0,
        }
    }
}

/// Table of external roots.
pub struct HandleHeap {
    nodes: BlockStack<Node, HANDLE_BLOCK_SIZE>,
    free_list: u32,
    counts: [usize; 3],
    next_to_finalize: u32,
    finalizing: bool,
}

impl HandleHeap {
    /// Creates a table with its three sentinels and one block of free nodes.
    #[must_use]
    pub fn new() -> Self {
        let mut handles = Self {
            nodes: BlockStack::new(),
            free_list: NIL,
            counts: [0; 3],
            next_to_finalize: NIL,
            finalizing: false,
        };
        handles.grow();
        for list in [HandleList::Strong, HandleList::Weak, HandleList::Immediate] {
            let sentinel = list.sentinel();
            let node = handles.node_mut(sentinel);
            node.prev = sentinel;
            node.next = sentinel;
            node.list = list;
        }
        handles
    }

    fn grow(&mut self) {
        let base = self.nodes.grow();
        let first = if base == 0 { SENTINEL_COUNT as usize } else { base };
        // Pushed in reverse so the lowest index is handed out first.
        for index in (first..base + HANDLE_BLOCK_SIZE).rev() {
            let index = u32::try_from(index).unwrap_or_else(|_| panic!("handle table overflow"));
            self.node_mut(index).next = self.free_list;
            self.free_list = index;
        }
    }

    fn node(&self, index: u32) -> &Node {
        self.nodes
            .get(index as usize)
            .unwrap_or_else(|| panic!("handle index {index} out of range"))
    }

    fn node_mut(&mut self, index: u32) -> &mut Node {
        self.nodes
            .get_mut(index as usize)
            .unwrap_or_else(|| panic!("handle index {index} out of range"))
    }

    fn live_node(&self, slot: HandleSlot) -> &Node {
        let node = self.node(slot.0);
        assert!(
            node.list != HandleList::Free && slot.0 >= SENTINEL_COUNT,
            "use of deallocated handle {slot:?}"
        );
        node
    }

    fn live_node_mut(&mut self, slot: HandleSlot) -> &mut Node {
        self.live_node(slot);
        self.node_mut(slot.0)
    }

    // ---- list primitives ----

    fn push(&mut self, list: HandleList, index: u32) {
        let sentinel = list.sentinel();
        let tail = self.node(sentinel).prev;
        {
            let node = self.node_mut(index);
            node.prev = tail;
            node.next = sentinel;
            node.list = list;
        }
        self.node_mut(tail).next = index;
        self.node_mut(sentinel).prev = index;
        self.counts[list.counter()] += 1;
    }

    fn remove(&mut self, index: u32) {
        let (prev, next, list) = {
            let node = self.node(index);
            (node.prev, node.next, node.list)
        };
        self.node_mut(prev).next = next;
        self.node_mut(next).prev = prev;
        let node = self.node_mut(index);
        node.prev = NIL;
        node.next = NIL;
        self.counts[list.counter()] -= 1;
    }

    fn list_for(value: JSValue, is_weak: bool) -> HandleList {
        match (value.is_cell(), is_weak) {
            (false, _) => HandleList::Immediate,
            (true, true) => HandleList::Weak,
            (true, false) => HandleList::Strong,
        }
    }

    fn relink(&mut self, index: u32) {
        self.remove(index);
        let node = self.node(index);
        let list = Self::list_for(node.value, node.is_weak);
        self.push(list, index);
    }

    fn first(&self, list: HandleList) -> u32 {
        self.node(list.sentinel()).next
    }

    // ---- allocation ----

    /// Allocates a handle holding [`JSValue::Empty`] on the immediate list.
    pub fn allocate(&mut self) -> HandleSlot {
        if self.free_list == NIL {
            self.grow();
        }
        let index = self.free_list;
        let node = self.node_mut(index);
        let next_free = node.next;
        *node = Node::default();
        self.free_list = next_free;
        self.push(HandleList::Immediate, index);
        HandleSlot(index)
    }

    /// Returns a handle to the free list.
    ///
    /// Safe to call from [`WeakHandleOwner::finalize`], for the handle being
    /// finalized or any other.
    ///
    /// # Panics
    ///
    /// Panics if `slot` was already deallocated.
    pub fn deallocate(&mut self, slot: HandleSlot) {
        let index = slot.0;
        self.live_node(slot);
        if self.next_to_finalize == index {
            self.next_to_finalize = self.node(index).next;
        }
        self.remove(index);
        let free_list = self.free_list;
        let node = self.node_mut(index);
        node.value = JSValue::Empty;
        node.owner = None;
        node.is_weak = false;
        node.context = 0;
        node.list = HandleList::Free;
        node.next = free_list;
        self.free_list = index;
    }

    // ---- values ----

    /// The value held by `slot`.
    #[must_use]
    pub fn get(&self, slot: HandleSlot) -> JSValue {
        self.live_node(slot).value
    }

    /// Moves `slot` to the list matching the cell-ness of `value`. Does not
    /// store `value`; [`set`](Self::set) does both.
    ///
    /// # Panics
    ///
    /// Panics while weak handles are being finalized.
    pub fn write_barrier(&mut self, slot: HandleSlot, value: JSValue) {
        assert!(
            !self.finalizing,
            "handle {slot:?} written during weak handle finalization"
        );
        let node = self.live_node(slot);
        if node.value.is_cell() == value.is_cell() {
            return;
        }
        let target = Self::list_for(value, node.is_weak);
        self.remove(slot.0);
        self.push(target, slot.0);
    }

    /// Stores `value` in `slot`, reclassifying it as needed.
    pub fn set(&mut self, slot: HandleSlot, value: JSValue) {
        self.write_barrier(slot, value);
        self.live_node_mut(slot).value = value;
    }

    // ---- weakness ----

    /// Makes `slot` weak. `owner` is consulted during marking and notified
    /// at finalization; `context` is passed back to it untouched.
    ///
    /// # Panics
    ///
    /// Panics while weak handles are being finalized.
    pub fn make_weak(
        &mut self,
        slot: HandleSlot,
        owner: Option<Rc<dyn WeakHandleOwner>>,
        context: usize,
    ) {
        assert!(
            !self.finalizing,
            "handle {slot:?} made weak during weak handle finalization"
        );
        let node = self.live_node_mut(slot);
        node.is_weak = true;
        node.owner = owner;
        node.context = context;
        self.relink(slot.0);
    }

    /// Makes a weak handle strong again, dropping its owner.
    ///
    /// # Panics
    ///
    /// Panics while weak handles are being finalized.
    pub fn make_strong(&mut self, slot: HandleSlot) {
        assert!(
            !self.finalizing,
            "handle {slot:?} made strong during weak handle finalization"
        );
        let node = self.live_node_mut(slot);
        node.is_weak = false;
        node.owner = None;
        node.context = 0;
        self.relink(slot.0);
    }

    /// True if `slot` was made weak.
    #[must_use]
    pub fn is_weak(&self, slot: HandleSlot) -> bool {
        self.live_node(slot).is_weak
    }

    /// The context given to [`make_weak`](Self::make_weak).
    #[must_use]
    pub fn weak_owner_context(&self, slot: HandleSlot) -> usize {
        self.live_node(slot).context
    }

    /// The list `slot` currently belongs to.
    #[must_use]
    pub fn list_of(&self, slot: HandleSlot) -> HandleList {
        self.node(slot.0).list
    }

    // ---- collection ----

    /// Appends every strong handle's cell to `visitor`.
    pub fn mark_strong_handles(&self, visitor: &mut MarkStack) {
        let sentinel = HandleList::Strong.sentinel();
        let mut index = self.first(HandleList::Strong);
        while index != sentinel {
            let node = self.node(index);
            visitor.append(node.value);
            index = node.next;
        }
    }

    /// Marks weak handles whose owner reports them reachable through
    /// opaque roots. Returns how many cells were newly appended.
    ///
    /// The caller drains `visitor` and repeats until this returns zero.
    pub fn mark_weak_handles(&self, visitor: &mut MarkStack) -> usize {
        let sentinel = HandleList::Weak.sentinel();
        let mut marked = 0;
        let mut index = self.first(HandleList::Weak);
        while index != sentinel {
            let current = index;
            let node = self.node(current);
            index = node.next;

            let Some(cell) = node.value.as_cell() else {
                continue;
            };
            // SAFETY: weak referents stay allocated until finalization.
            if unsafe { space::is_marked(cell) } {
                continue;
            }
            let Some(owner) = &node.owner else {
                continue;
            };
            let slot = HandleSlot(current);
            if !owner.is_reachable_from_opaque_roots(slot, node.value, node.context, visitor) {
                continue;
            }
            visitor.append(node.value);
            marked += 1;
        }
        marked
    }

    /// Notifies owners of weak handles whose cells were not marked, then
    /// clears those handles and moves them to the immediate list. Returns
    /// the number of handles cleared.
    ///
    /// Each dead handle is finalized exactly once: once cleared it no longer
    /// refers to a cell.
    pub fn finalize_weak_handles(&mut self) -> usize {
        let sentinel = HandleList::Weak.sentinel();
        let mut finalized = 0;
        self.finalizing = true;

        let mut index = self.first(HandleList::Weak);
        while index != sentinel {
            let (value, owner, context, next) = {
                let node = self.node(index);
                (node.value, node.owner.clone(), node.context, node.next)
            };
            self.next_to_finalize = next;

            let Some(cell) = value.as_cell() else {
                index = self.next_to_finalize;
                continue;
            };
            // SAFETY: unmarked cells are not swept before finalization ends.
            if unsafe { space::is_marked(cell) } {
                index = self.next_to_finalize;
                continue;
            }

            if let Some(owner) = owner {
                owner.finalize(HandleSlot(index), context, self);
            }

            // The owner may have deallocated this node.
            if self.node(index).list == HandleList::Weak {
                self.node_mut(index).value = JSValue::Empty;
                self.remove(index);
                self.push(HandleList::Immediate, index);
            }
            finalized += 1;
            index = self.next_to_finalize;
        }

        self.next_to_finalize = NIL;
        self.finalizing = false;
        finalized
    }

    // ---- diagnostics ----

    /// Strong handles holding a global object cell.
    #[must_use]
    pub fn protected_global_object_count(&self) -> usize {
        let mut count = 0;
        self.for_each_in_list(HandleList::Strong, |_, value| {
            if let Some(cell) = value.as_cell() {
                // SAFETY: strong referents are live.
                if unsafe { cell.cell_type() } == CellType::GlobalObject {
                    count += 1;
                }
            }
        });
        count
    }

    /// Calls `f` with every handle on `list`, in list order.
    pub fn for_each_in_list<F: FnMut(HandleSlot, JSValue)>(&self, list: HandleList, mut f: F) {
        if list == HandleList::Free {
            return;
        }
        let sentinel = list.sentinel();
        let mut index = self.first(list);
        while index != sentinel {
            let node = self.node(index);
            f(HandleSlot(index), node.value);
            index = node.next;
        }
    }

    /// Number of handles on the strong list.
    #[must_use]
    pub const fn strong_count(&self) -> usize {
        self.counts[HandleList::Strong.counter()]
    }

    /// Number of handles on the weak list.
    #[must_use]
    pub const fn weak_count(&self) -> usize {
        self.counts[HandleList::Weak.counter()]
    }

    /// Number of handles on the immediate list.
    #[must_use]
    pub const fn immediate_count(&self) -> usize {
        self.counts[HandleList::Immediate.counter()]
    }

    /// Number of allocated handles.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.strong_count() + self.weak_count() + self.immediate_count()
    }

    /// True if no handle is allocated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Node slots reserved, including sentinels and free nodes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.nodes.capacity()
    }
}

impl Default for HandleHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandleHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleHeap")
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .field("immediate", &self.immediate_count())
            .field("capacity", &self.capacity())
            .finish()
    }
}
