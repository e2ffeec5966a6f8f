mod handle_heap;

use crate::space::MarkedSpace;
use crate::value::CellPtr;

/// Raw zombie cells, marked as freshly allocated cells are.
fn raw_cells(space: &mut MarkedSpace, count: usize) -> Vec<CellPtr> {
    (0..count)
        .map(|_| {
            let ptr = space.allocate(16).unwrap().unwrap();
            unsafe { CellPtr::from_raw(ptr.cast()) }
        })
        .collect()
}
