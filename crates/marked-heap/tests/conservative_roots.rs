//! Tests for conservative root scanning.

use std::cell::RefCell;
use std::rc::Rc;

use marked_heap::{Cell, ConservativeRoots, Heap, HeapConfig, JSValue, Trace};

#[derive(Trace, Cell)]
struct Object {
    field: JSValue,
}

/// Registers a scanner fed from the returned word list.
fn word_roots(heap: &mut Heap) -> Rc<RefCell<Vec<usize>>> {
    let words = Rc::new(RefCell::new(Vec::new()));
    let shared = Rc::clone(&words);
    heap.add_root_scanner(Box::new(move |roots: &mut ConservativeRoots<'_>| {
        roots.add_words(&shared.borrow());
    }));
    words
}

#[test]
fn exact_cell_address_keeps_cell_and_children() {
    let mut heap = Heap::new();
    let words = word_roots(&mut heap);
    let child = heap.allocate_cell(Object { field: JSValue::Null });
    let parent = heap.allocate_cell(Object { field: child.into() });
    words.borrow_mut().push(parent.addr());

    heap.collect_all_garbage();
    assert!(heap.is_marked(parent));
    assert!(heap.is_marked(child));
    assert_eq!(heap.object_count(), 2);
}

#[test]
fn interior_and_unaligned_words_are_ignored() {
    let mut heap = Heap::new();
    let words = word_roots(&mut heap);
    let cell = heap.allocate_cell(Object { field: JSValue::Null });
    words
        .borrow_mut()
        .extend([cell.addr() + 8, cell.addr() + 1, cell.addr() + 16, 0, usize::MAX]);

    heap.collect_all_garbage();
    assert_eq!(heap.object_count(), 0);
}

#[test]
fn dead_cell_address_does_not_resurrect() {
    let mut heap = Heap::new();
    let words = word_roots(&mut heap);
    let cell = heap.allocate_cell(Object { field: JSValue::Null });
    let keep = heap.allocate_cell(Object { field: JSValue::Null });
    heap.protect(keep.into());

    heap.collect_all_garbage();
    assert!(!heap.contains(cell.addr()));

    words.borrow_mut().push(cell.addr());
    heap.collect_all_garbage();
    assert!(!heap.contains(cell.addr()));
    assert_eq!(heap.object_count(), 1);
}

#[test]
fn roots_are_validated_against_the_previous_cycle() {
    let mut heap = Heap::new();
    let words = word_roots(&mut heap);
    let cell = heap.allocate_cell(Object { field: JSValue::Null });
    words.borrow_mut().push(cell.addr());

    for _ in 0..3 {
        heap.collect_all_garbage();
        assert!(heap.contains(cell.addr()));
    }

    words.borrow_mut().clear();
    heap.collect_all_garbage();
    assert!(!heap.contains(cell.addr()));
}

#[cfg(all(target_os = "linux", not(miri)))]
#[test]
fn machine_stack_scanner_finds_a_local() {
    let mut heap = Heap::with_config(HeapConfig::default().scan_machine_stack(true));
    let child = heap.allocate_cell(Object { field: JSValue::Null });
    let cell = std::hint::black_box(heap.allocate_cell(Object { field: child.into() }));

    heap.collect_all_garbage();
    assert!(heap.is_marked(cell));
    assert!(heap.is_marked(child));
    std::hint::black_box(&cell);
}
