//! Tests for allocation failures.

use marked_heap::space::MAX_CELL_SIZE;
use marked_heap::{AllocationError, Cell, Heap, Trace};

#[derive(Trace, Cell)]
struct Huge {
    words: [u64; 200],
}

#[test]
fn oversized_raw_request_is_rejected() {
    let mut heap = Heap::new();
    let err = heap.try_allocate(2000).unwrap_err();
    assert!(matches!(
        err,
        AllocationError::CellTooLarge {
            requested: 2000,
            max: MAX_CELL_SIZE
        }
    ));
    assert!(!heap.is_busy());
    assert_eq!(heap.capacity(), 0);
}

#[test]
fn oversized_cell_is_rejected() {
    let mut heap = Heap::new();
    let err = heap.try_allocate_cell(Huge { words: [0; 200] }).unwrap_err();
    assert!(matches!(err, AllocationError::CellTooLarge { .. }));
}

#[test]
fn largest_cell_fits() {
    let mut heap = Heap::new();
    let cell = heap.try_allocate(MAX_CELL_SIZE).unwrap();
    assert!(heap.contains(cell.addr()));
    assert!(heap.try_allocate(0).is_ok());
}

#[test]
#[should_panic(expected = "exceeds the maximum cell size")]
fn infallible_allocation_panics() {
    let mut heap = Heap::new();
    let _ = heap.allocate(MAX_CELL_SIZE + 1);
}
