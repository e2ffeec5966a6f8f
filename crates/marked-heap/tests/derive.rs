//! Tests for `#[derive(Trace, Cell)]`.

use std::collections::HashMap;

use marked_heap::{Cell, CellPtr, CellType, Heap, JSValue, Trace};

#[derive(Trace, Cell)]
struct Plain {
    value: JSValue,
}

#[derive(Trace, Cell)]
#[heap(class_name = "Pair")]
struct Tuple(JSValue, Option<CellPtr>);

#[derive(Trace, Cell)]
#[heap(cell_type = Array, class_name = "Array")]
struct Elements {
    items: Vec<JSValue>,
}

#[derive(Trace, Cell)]
#[heap(cell_type = GlobalObject, class_name = "Global")]
struct Global {
    bindings: HashMap<String, JSValue>,
}

#[derive(Trace, Cell)]
#[heap(cell_type = String)]
struct Text {
    chars: String,
}

#[derive(Trace, Cell)]
enum Shape {
    Empty,
    One(CellPtr),
    Many { items: Vec<CellPtr>, extra: JSValue },
}

#[derive(Trace, Cell)]
struct Wrapper<T> {
    inner: T,
}

#[derive(Trace, Cell)]
struct Skipping {
    #[heap(skip)]
    ignored: Option<CellPtr>,
    kept: JSValue,
}

fn plain(heap: &mut Heap) -> CellPtr {
    heap.allocate_cell(Plain {
        value: JSValue::Null,
    })
}

#[test]
fn struct_fields_are_traced() {
    let mut heap = Heap::new();
    let a = plain(&mut heap);
    let b = plain(&mut heap);
    let pair = heap.allocate_cell(Tuple(a.into(), Some(b)));
    heap.protect(pair.into());

    heap.collect_all_garbage();
    assert_eq!(heap.object_count(), 3);
}

#[test]
fn enum_variants_are_traced() {
    let mut heap = Heap::new();
    let a = plain(&mut heap);
    let b = plain(&mut heap);
    let c = plain(&mut heap);
    let empty = heap.allocate_cell(Shape::Empty);
    let one = heap.allocate_cell(Shape::One(a));
    let many = heap.allocate_cell(Shape::Many {
        items: vec![b],
        extra: c.into(),
    });
    for cell in [empty, one, many] {
        heap.protect(cell.into());
    }

    heap.collect_all_garbage();
    assert_eq!(heap.object_count(), 6);
}

#[test]
fn generic_and_collection_fields_are_traced() {
    let mut heap = Heap::new();
    let a = plain(&mut heap);
    let b = plain(&mut heap);
    let wrapped = heap.allocate_cell(Wrapper {
        inner: vec![Some(a), None],
    });
    let elements = heap.allocate_cell(Elements {
        items: vec![b.into(), JSValue::from(1.5)],
    });
    heap.protect(wrapped.into());
    heap.protect(elements.into());

    heap.collect_all_garbage();
    assert_eq!(heap.object_count(), 4);
    let inner = &heap.get::<Wrapper<Vec<Option<CellPtr>>>>(wrapped).unwrap().inner;
    assert_eq!(inner[0], Some(a));
}

#[test]
fn skipped_fields_are_not_roots() {
    let mut heap = Heap::new();
    let hidden = plain(&mut heap);
    let visible = plain(&mut heap);
    let cell = heap.allocate_cell(Skipping {
        ignored: Some(hidden),
        kept: visible.into(),
    });
    heap.protect(cell.into());

    heap.collect_all_garbage();
    assert!(!heap.contains(hidden.addr()));
    assert!(heap.is_marked(visible));
    assert!(heap.get::<Skipping>(cell).unwrap().ignored.is_some());
}

#[test]
fn cell_type_and_class_name_attributes() {
    assert_eq!(<Plain as Cell>::CELL_TYPE, CellType::Object);
    assert_eq!(<Elements as Cell>::CELL_TYPE, CellType::Array);
    assert_eq!(<Text as Cell>::CELL_TYPE, CellType::String);
    assert!(<Text as Cell>::CELL_TYPE.is_leaf());
    assert_eq!(<Tuple as Cell>::class_name(), "Pair");
    assert_eq!(<Plain as Cell>::class_name(), std::any::type_name::<Plain>());
}

#[test]
fn type_counts_use_class_names() {
    let mut heap = Heap::new();
    let global = heap.allocate_cell(Global {
        bindings: HashMap::new(),
    });
    let text = heap.allocate_cell(Text {
        chars: "hello".to_owned(),
    });
    heap.get_mut::<Global>(global)
        .unwrap()
        .bindings
        .insert("greeting".to_owned(), text.into());
    heap.allocate_cell(Elements { items: Vec::new() });
    heap.allocate_cell(Elements { items: Vec::new() });
    heap.protect(global.into());

    let counts = heap.object_type_counts();
    assert_eq!(counts["Global"], 1);
    assert_eq!(counts["Array"], 2);
    assert_eq!(counts[std::any::type_name::<Text>()], 1);
    assert_eq!(heap.global_object_count(), 1);
    assert_eq!(heap.protected_global_object_count(), 1);
    assert_eq!(heap.protected_object_type_counts()["Global"], 1);

    heap.collect_all_garbage();
    let counts = heap.object_type_counts();
    assert_eq!(counts.get("Array"), None);
    assert_eq!(counts[std::any::type_name::<Text>()], 1);
    assert_eq!(heap.get::<Text>(text).unwrap().chars, "hello");
}

#[test]
fn get_checks_the_cell_type() {
    let mut heap = Heap::new();
    let cell = plain(&mut heap);
    assert!(heap.get::<Plain>(cell).is_some());
    assert!(heap.get::<Text>(cell).is_none());
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "holds cell references")]
fn leaf_cell_with_references_is_caught() {
    #[derive(Trace, Cell)]
    #[heap(cell_type = Leaf)]
    struct Mislabeled {
        next: JSValue,
    }

    let mut heap = Heap::new();
    let target = plain(&mut heap);
    let cell = heap.allocate_cell(Mislabeled {
        next: target.into(),
    });
    heap.protect(cell.into());
    heap.collect_all_garbage();
}
