//! Allocate, protect a subset, collect, repeat.

use std::cell::Cell as StdCell;
use std::rc::Rc;

use marked_heap::{Cell, CollectionType, Heap, JSValue, Trace};

#[derive(Trace, Cell)]
#[heap(cell_type = Leaf)]
struct Payload {
    words: [u64; 2],
    #[heap(skip)]
    drops: Rc<StdCell<usize>>,
}

impl Drop for Payload {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn every_tenth_cell_survives() {
    let drops = Rc::new(StdCell::new(0));
    let mut heap = Heap::new();

    let cells: Vec<JSValue> = (0..1000u64)
        .map(|i| {
            heap.allocate_cell(Payload {
                words: [i; 2],
                drops: drops.clone(),
            })
            .into()
        })
        .collect();
    assert_eq!(std::mem::size_of::<Payload>() + 8, 32);
    assert!(heap.space().block_count() > 1);
    for value in cells.iter().step_by(10) {
        heap.protect(*value);
    }

    heap.collect_all_garbage();
    let metrics = heap.last_metrics();
    assert_eq!(heap.object_count(), 100);
    assert_eq!(metrics.objects_surviving, 100);
    assert_eq!(metrics.objects_reclaimed, 900);
    assert_eq!(metrics.collection_type, CollectionType::Full);
    assert_eq!(drops.get(), 900);

    for (i, value) in cells.iter().enumerate().step_by(10) {
        let payload = heap.get::<Payload>(value.as_cell().unwrap()).unwrap();
        assert_eq!(payload.words, [i as u64; 2]);
    }

    // Nothing changed, so a second collection reclaims nothing.
    heap.collect_all_garbage();
    assert_eq!(heap.object_count(), 100);
    assert_eq!(heap.last_metrics().objects_reclaimed, 0);
    assert_eq!(heap.total_collections(), 2);
    assert_eq!(drops.get(), 900);
}

#[test]
fn freed_slots_are_reused() {
    let drops = Rc::new(StdCell::new(0));
    let mut heap = Heap::new();
    let keep = heap.allocate_cell(Payload {
        words: [0; 2],
        drops: drops.clone(),
    });
    heap.protect(keep.into());
    for _ in 0..500 {
        heap.allocate_cell(Payload {
            words: [1; 2],
            drops: drops.clone(),
        });
    }
    let capacity = heap.capacity();

    for _ in 0..10 {
        heap.collect_all_garbage();
        for _ in 0..500 {
            heap.allocate_cell(Payload {
                words: [2; 2],
                drops: drops.clone(),
            });
        }
        assert_eq!(heap.capacity(), capacity);
    }
    assert_eq!(drops.get(), 5000);
}
