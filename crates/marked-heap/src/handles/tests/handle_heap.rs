//! Tests for handle list membership, weak marking and finalization.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::raw_cells;
use crate::gc::MarkStack;
use crate::handles::{HandleHeap, HandleList, HandleSlot, WeakHandleOwner};
use crate::space::{self, MarkedSpace};
use crate::trace::Visitor;
use crate::value::{CellPtr, JSValue};

fn erase<O: WeakHandleOwner + 'static>(owner: &Rc<O>) -> Option<Rc<dyn WeakHandleOwner>> {
    let owner: Rc<dyn WeakHandleOwner> = owner.clone();
    Some(owner)
}

/// Walks every list and checks that each live handle appears in exactly
/// one of them, the one it reports.
fn assert_lists_consistent(handles: &HandleHeap, live: &[HandleSlot]) {
    let mut seen: HashMap<HandleSlot, HandleList> = HashMap::new();
    for list in [HandleList::Strong, HandleList::Weak, HandleList::Immediate] {
        let mut count = 0;
        handles.for_each_in_list(list, |slot, value| {
            assert!(seen.insert(slot, list).is_none(), "{slot:?} on two lists");
            match list {
                HandleList::Immediate => assert!(!value.is_cell()),
                _ => assert!(value.is_cell()),
            }
            count += 1;
        });
        let expected = match list {
            HandleList::Strong => handles.strong_count(),
            HandleList::Weak => handles.weak_count(),
            _ => handles.immediate_count(),
        };
        assert_eq!(count, expected);
    }
    assert_eq!(seen.len(), live.len());
    for &slot in live {
        assert_eq!(seen.get(&slot), Some(&handles.list_of(slot)));
    }
}

#[test]
fn classification_follows_cell_ness() {
    let mut space = MarkedSpace::new(usize::MAX);
    let cell = raw_cells(&mut space, 1)[0];
    let mut handles = HandleHeap::new();

    let slot = handles.allocate();
    assert_eq!(handles.list_of(slot), HandleList::Immediate);
    assert!(handles.get(slot).is_empty());

    handles.set(slot, cell.into());
    assert_eq!(handles.list_of(slot), HandleList::Strong);
    handles.set(slot, JSValue::from(3));
    assert_eq!(handles.list_of(slot), HandleList::Immediate);

    handles.make_weak(slot, None, 0);
    assert!(handles.is_weak(slot));
    assert_eq!(handles.list_of(slot), HandleList::Immediate);
    handles.set(slot, cell.into());
    assert_eq!(handles.list_of(slot), HandleList::Weak);
    handles.set(slot, JSValue::Null);
    assert_eq!(handles.list_of(slot), HandleList::Immediate);
    assert!(handles.is_weak(slot));

    handles.set(slot, cell.into());
    handles.make_strong(slot);
    assert!(!handles.is_weak(slot));
    assert_eq!(handles.list_of(slot), HandleList::Strong);
    assert_lists_consistent(&handles, &[slot]);
}

#[test]
fn same_category_writes_keep_position() {
    let mut space = MarkedSpace::new(usize::MAX);
    let cells = raw_cells(&mut space, 2);
    let mut handles = HandleHeap::new();
    let a = handles.allocate();
    let b = handles.allocate();
    handles.set(a, cells[0].into());
    handles.set(b, cells[1].into());
    handles.set(a, cells[1].into());

    let mut order = Vec::new();
    handles.for_each_in_list(HandleList::Strong, |slot, _| order.push(slot));
    assert_eq!(order, vec![a, b]);
}

#[test]
fn deallocated_nodes_are_reused() {
    let mut handles = HandleHeap::new();
    let a = handles.allocate();
    handles.deallocate(a);
    assert_eq!(handles.list_of(a), HandleList::Free);
    assert!(handles.is_empty());
    assert_eq!(handles.allocate(), a);
}

#[test]
fn grows_past_one_block() {
    let mut handles = HandleHeap::new();
    let slots: Vec<_> = (0..600).map(|_| handles.allocate()).collect();
    assert_eq!(handles.len(), 600);
    assert!(handles.capacity() >= 603);
    assert_lists_consistent(&handles, &slots);
}

#[test]
#[should_panic(expected = "use of deallocated handle")]
fn use_after_deallocate_panics() {
    let mut handles = HandleHeap::new();
    let slot = handles.allocate();
    handles.deallocate(slot);
    let _ = handles.get(slot);
}

#[test]
fn random_operations_keep_lists_exclusive() {
    let mut space = MarkedSpace::new(usize::MAX);
    let cells = raw_cells(&mut space, 8);
    let mut handles = HandleHeap::new();
    let mut live: Vec<HandleSlot> = Vec::new();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..2_000 {
        match rng.gen_range(0..6) {
            0 => live.push(handles.allocate()),
            1 if !live.is_empty() => {
                let slot = live.swap_remove(rng.gen_range(0..live.len()));
                handles.deallocate(slot);
            }
            2 if !live.is_empty() => {
                let slot = live[rng.gen_range(0..live.len())];
                let cell = cells[rng.gen_range(0..cells.len())];
                handles.set(slot, cell.into());
            }
            3 if !live.is_empty() => {
                let slot = live[rng.gen_range(0..live.len())];
                let value = if rng.gen_bool(0.5) {
                    JSValue::from(rng.gen::<i32>())
                } else {
                    JSValue::Undefined
                };
                handles.set(slot, value);
            }
            4 if !live.is_empty() => {
                let slot = live[rng.gen_range(0..live.len())];
                handles.make_weak(slot, None, 0);
            }
            5 if !live.is_empty() => {
                let slot = live[rng.gen_range(0..live.len())];
                handles.make_strong(slot);
            }
            _ => {}
        }
        assert_lists_consistent(&handles, &live);
    }
}

#[test]
fn strong_handles_mark_their_cells() {
    let mut space = MarkedSpace::new(usize::MAX);
    let cells = raw_cells(&mut space, 3);
    let mut handles = HandleHeap::new();
    let strong = handles.allocate();
    handles.set(strong, cells[0].into());
    let weak = handles.allocate();
    handles.set(weak, cells[1].into());
    handles.make_weak(weak, None, 0);

    space.clear_marks();
    let mut visitor = MarkStack::default();
    handles.mark_strong_handles(&mut visitor);
    visitor.drain();

    unsafe {
        assert!(space::is_marked(cells[0]));
        assert!(!space::is_marked(cells[1]));
        assert!(!space::is_marked(cells[2]));
    }
}

struct OpaqueRootOwner;

impl WeakHandleOwner for OpaqueRootOwner {
    fn is_reachable_from_opaque_roots(
        &self,
        _slot: HandleSlot,
        _value: JSValue,
        context: usize,
        visitor: &mut MarkStack,
    ) -> bool {
        visitor.contains_opaque_root(context)
    }
}

#[test]
fn weak_handles_reachable_through_opaque_roots() {
    let mut space = MarkedSpace::new(usize::MAX);
    let cells = raw_cells(&mut space, 2);
    let owner = Rc::new(OpaqueRootOwner);
    let mut handles = HandleHeap::new();
    let kept = handles.allocate();
    handles.set(kept, cells[0].into());
    handles.make_weak(kept, erase(&owner), 7);
    let dropped = handles.allocate();
    handles.set(dropped, cells[1].into());
    handles.make_weak(dropped, erase(&owner), 8);

    space.clear_marks();
    let mut visitor = MarkStack::default();
    visitor.add_opaque_root(7);
    assert_eq!(handles.mark_weak_handles(&mut visitor), 1);
    visitor.drain();
    // Already marked now, so nothing new.
    assert_eq!(handles.mark_weak_handles(&mut visitor), 0);

    unsafe {
        assert!(space::is_marked(cells[0]));
        assert!(!space::is_marked(cells[1]));
    }
    assert_eq!(handles.finalize_weak_handles(), 1);
    assert_eq!(handles.get(kept), JSValue::Cell(cells[0]));
    assert!(handles.get(dropped).is_empty());
    assert_eq!(handles.weak_owner_context(dropped), 8);
}

#[derive(Default)]
struct SelfDeallocating {
    seen: RefCell<Vec<HandleSlot>>,
}

impl WeakHandleOwner for SelfDeallocating {
    fn finalize(&self, slot: HandleSlot, _context: usize, handles: &mut HandleHeap) {
        self.seen.borrow_mut().push(slot);
        handles.deallocate(slot);
    }
}

#[test]
fn self_deallocating_owners_are_each_finalized_once() {
    const N: usize = 64;
    let mut space = MarkedSpace::new(usize::MAX);
    let cells = raw_cells(&mut space, N);
    let owner = Rc::new(SelfDeallocating::default());
    let mut handles = HandleHeap::new();
    let mut slots = Vec::new();
    for &cell in &cells {
        let slot = handles.allocate();
        handles.set(slot, cell.into());
        handles.make_weak(slot, erase(&owner), 0);
        slots.push(slot);
    }

    space.clear_marks();
    assert_eq!(handles.finalize_weak_handles(), N);
    assert_eq!(*owner.seen.borrow(), slots);
    assert!(handles.is_empty());

    assert_eq!(handles.finalize_weak_handles(), 0);
    assert_eq!(owner.seen.borrow().len(), N);
}

/// Deallocates the handle whose index is stored in the context.
struct DeallocatesOther {
    calls: RefCell<usize>,
    victim: RefCell<Option<HandleSlot>>,
}

impl WeakHandleOwner for DeallocatesOther {
    fn finalize(&self, _slot: HandleSlot, _context: usize, handles: &mut HandleHeap) {
        *self.calls.borrow_mut() += 1;
        if let Some(victim) = self.victim.borrow_mut().take() {
            handles.deallocate(victim);
        }
    }
}

#[test]
fn owner_deallocating_a_later_node_skips_it() {
    let mut space = MarkedSpace::new(usize::MAX);
    let cells = raw_cells(&mut space, 3);
    let owner = Rc::new(DeallocatesOther {
        calls: RefCell::new(0),
        victim: RefCell::new(None),
    });
    let mut handles = HandleHeap::new();
    let slots: Vec<_> = cells
        .iter()
        .map(|&cell| {
            let slot = handles.allocate();
            handles.set(slot, cell.into());
            handles.make_weak(slot, erase(&owner), 0);
            slot
        })
        .collect();
    *owner.victim.borrow_mut() = Some(slots[1]);

    space.clear_marks();
    assert_eq!(handles.finalize_weak_handles(), 2);
    assert_eq!(*owner.calls.borrow(), 2);
    assert_eq!(handles.list_of(slots[0]), HandleList::Immediate);
    assert_eq!(handles.list_of(slots[1]), HandleList::Free);
    assert_eq!(handles.list_of(slots[2]), HandleList::Immediate);
    assert_lists_consistent(&handles, &[slots[0], slots[2]]);
}

#[test]
fn ownerless_weak_handles_are_cleared_silently() {
    let mut space = MarkedSpace::new(usize::MAX);
    let cells = raw_cells(&mut space, 2);
    let mut handles = HandleHeap::new();
    let dead = handles.allocate();
    handles.set(dead, cells[0].into());
    handles.make_weak(dead, None, 0);
    let alive = handles.allocate();
    handles.set(alive, cells[1].into());
    handles.make_weak(alive, None, 0);

    space.clear_marks();
    unsafe { space::test_and_set_marked(cells[1]) };
    assert_eq!(handles.finalize_weak_handles(), 1);
    assert!(handles.get(dead).is_empty());
    assert_eq!(handles.list_of(dead), HandleList::Immediate);
    assert_eq!(handles.get(alive), JSValue::Cell(cells[1]));
    assert_eq!(handles.list_of(alive), HandleList::Weak);
}

struct WritesDuringFinalize(CellPtr);

impl WeakHandleOwner for WritesDuringFinalize {
    fn finalize(&self, slot: HandleSlot, _context: usize, handles: &mut HandleHeap) {
        handles.set(slot, self.0.into());
    }
}

#[test]
#[should_panic(expected = "written during weak handle finalization")]
fn writing_during_finalization_panics() {
    let mut space = MarkedSpace::new(usize::MAX);
    let cells = raw_cells(&mut space, 2);
    let owner = Rc::new(WritesDuringFinalize(cells[1]));
    let mut handles = HandleHeap::new();
    let slot = handles.allocate();
    handles.set(slot, cells[0].into());
    handles.make_weak(slot, erase(&owner), 0);

    space.clear_marks();
    handles.finalize_weak_handles();
}

/// Flips the weakness of another handle from inside `finalize`.
struct RelinksOther {
    strengthen: bool,
    victim: RefCell<Option<HandleSlot>>,
}

impl WeakHandleOwner for RelinksOther {
    fn finalize(&self, _slot: HandleSlot, _context: usize, handles: &mut HandleHeap) {
        if let Some(victim) = self.victim.borrow_mut().take() {
            if self.strengthen {
                handles.make_strong(victim);
            } else {
                handles.make_weak(victim, None, 0);
            }
        }
    }
}

fn finalize_with_relinking_owner(strengthen: bool) {
    let mut space = MarkedSpace::new(usize::MAX);
    let cells = raw_cells(&mut space, 4);
    let owner = Rc::new(RelinksOther {
        strengthen,
        victim: RefCell::new(None),
    });
    let mut handles = HandleHeap::new();
    let strong = handles.allocate();
    handles.set(strong, cells[0].into());
    let weak: Vec<_> = cells[1..]
        .iter()
        .map(|&cell| {
            let slot = handles.allocate();
            handles.set(slot, cell.into());
            handles.make_weak(slot, erase(&owner), 0);
            slot
        })
        .collect();
    *owner.victim.borrow_mut() = Some(weak[1]);

    space.clear_marks();
    handles.finalize_weak_handles();
}

#[test]
#[should_panic(expected = "made strong during weak handle finalization")]
fn strengthening_during_finalization_panics() {
    finalize_with_relinking_owner(true);
}

#[test]
#[should_panic(expected = "made weak during weak handle finalization")]
fn weakening_during_finalization_panics() {
    finalize_with_relinking_owner(false);
}
