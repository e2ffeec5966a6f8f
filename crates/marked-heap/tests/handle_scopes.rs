//! Tests for rooting through global handles, local handle scopes and
//! temporary sort vectors.

use marked_heap::{Cell, HandleList, Heap, JSValue, Trace};

#[derive(Trace, Cell)]
struct Object {
    field: JSValue,
}

fn object(heap: &mut Heap) -> JSValue {
    heap.allocate_cell(Object {
        field: JSValue::Null,
    })
    .into()
}

#[test]
fn local_handles_root_cells_for_the_scope() {
    let mut heap = Heap::new();
    let cell = heap.with_handle_scope(|heap| {
        let handle = heap.allocate_local_handle();
        let cell = object(heap);
        heap.set_local_handle(handle, cell);

        heap.collect_all_garbage();
        assert_eq!(heap.local_handle(handle), cell);
        assert!(heap.is_marked(cell.as_cell().unwrap()));
        cell
    });

    assert!(heap.handle_stack().is_empty());
    heap.collect_all_garbage();
    assert!(!heap.contains(cell.as_cell().unwrap().addr()));
}

#[test]
fn nested_scopes_release_only_their_own_handles() {
    let mut heap = Heap::new();
    heap.with_handle_scope(|heap| {
        let outer = heap.allocate_local_handle();
        let kept = object(heap);
        heap.set_local_handle(outer, kept);

        let dropped = heap.with_handle_scope(|heap| {
            let inner = heap.allocate_local_handle();
            let cell = object(heap);
            heap.set_local_handle(inner, cell);
            assert_eq!(heap.handle_stack().scope_depth(), 2);
            cell
        });

        heap.collect_all_garbage();
        assert!(heap.is_marked(kept.as_cell().unwrap()));
        assert!(!heap.contains(dropped.as_cell().unwrap().addr()));
    });
}

#[test]
fn unwinding_out_of_a_scope_leaves_it() {
    let mut heap = Heap::new();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        heap.with_handle_scope(|heap| {
            let handle = heap.allocate_local_handle();
            let cell = object(heap);
            heap.set_local_handle(handle, cell);
            panic!("callback failed");
        })
    }));
    assert!(result.is_err());

    assert_eq!(heap.handle_stack().scope_depth(), 0);
    assert!(heap.handle_stack().is_empty());
    heap.collect_all_garbage();
    assert_eq!(heap.object_count(), 0);
}

#[test]
#[should_panic(expected = "used after its scope was left")]
fn handle_from_a_left_scope_is_rejected_in_a_later_one() {
    let mut heap = Heap::new();
    let stale = heap.with_handle_scope(|heap| heap.allocate_local_handle());
    heap.with_handle_scope(|heap| {
        let fresh = heap.allocate_local_handle();
        heap.set_local_handle(fresh, JSValue::from(1));
        let _ = heap.local_handle(stale);
    });
}

#[test]
fn strong_global_handle_follows_its_value() {
    let mut heap = Heap::new();
    let slot = heap.allocate_global_handle();
    assert_eq!(heap.handle_heap().list_of(slot), HandleList::Immediate);

    let cell = object(&mut heap);
    heap.handle_heap_mut().set(slot, cell);
    assert_eq!(heap.handle_heap().list_of(slot), HandleList::Strong);
    heap.collect_all_garbage();
    assert_eq!(heap.object_count(), 1);

    heap.handle_heap_mut().set(slot, JSValue::from(7));
    assert_eq!(heap.handle_heap().list_of(slot), HandleList::Immediate);
    heap.collect_all_garbage();
    assert_eq!(heap.object_count(), 0);

    heap.handle_heap_mut().deallocate(slot);
    assert!(heap.handle_heap().is_empty());
}

#[test]
fn temp_sort_vectors_are_roots_until_popped() {
    let mut heap = Heap::new();
    let cells: Vec<JSValue> = (0..64).map(|_| object(&mut heap)).collect();
    heap.push_temp_sort_vector(cells.clone());
    heap.collect_all_garbage();
    assert_eq!(heap.object_count(), 64);

    // Entries dropped from the vector stop being roots.
    heap.temp_sort_vector_mut().unwrap().truncate(10);
    heap.collect_all_garbage();
    assert_eq!(heap.object_count(), 10);

    let popped = heap.pop_temp_sort_vector().unwrap();
    assert_eq!(popped[..], cells[..10]);
    heap.collect_all_garbage();
    assert_eq!(heap.object_count(), 0);
    assert!(heap.pop_temp_sort_vector().is_none());
}
