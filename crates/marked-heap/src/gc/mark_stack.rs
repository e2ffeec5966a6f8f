//! The marking worklist.
//!
//! Reachability is computed iteratively so that deep object graphs never
//! recurse on the native stack. Work comes in two shapes: single cells whose
//! children still need visiting, and mark sets, runs of values that have
//! not been looked at yet.

use std::collections::HashSet;

use crate::space;
use crate::trace::Visitor;
use crate::value::{CellPtr, JSValue};

/// Pending cells the drain loop lets accumulate before it stops pulling
/// from mark sets.
pub const DEFAULT_BATCH_THRESHOLD: usize = 50;

/// A not yet examined run of values, `[values, end)`.
struct MarkSet {
    values: *const JSValue,
    end: *const JSValue,
}

/// The collector's [`Visitor`].
///
/// Every cell passes through `test_and_set_marked` before it is queued, so a
/// cell is visited at most once per collection no matter how many paths
/// reach it.
pub struct MarkStack {
    values: Vec<CellPtr>,
    mark_sets: Vec<MarkSet>,
    opaque_roots: HashSet<usize>,
    batch_threshold: usize,
    visit_count: usize,
    #[cfg(debug_assertions)]
    visiting: bool,
}

impl MarkStack {
    /// Creates an empty mark stack with the given batching threshold.
    #[must_use]
    pub fn new(batch_threshold: usize) -> Self {
        Self {
            values: Vec::new(),
            mark_sets: Vec::new(),
            opaque_roots: HashSet::new(),
            batch_threshold: batch_threshold.max(1),
            visit_count: 0,
            #[cfg(debug_assertions)]
            visiting: false,
        }
    }

    /// Queues conservatively discovered roots. They are already validated
    /// against the space, so each is simply marked and queued.
    pub fn append_conservative_roots(&mut self, roots: &[CellPtr]) {
        for &cell in roots {
            self.internal_append(cell);
        }
    }

    fn internal_append(&mut self, cell: CellPtr) {
        // SAFETY: only cells reachable from roots are appended, and those
        // live in blocks owned by the heap being collected.
        if unsafe { space::test_and_set_marked(cell) } {
            return;
        }
        if self.is_leaf(cell) {
            self.visit_count += 1;
            return;
        }
        self.values.push(cell);
    }

    fn is_leaf(&self, cell: CellPtr) -> bool {
        // SAFETY: `cell` was just marked, so it is live.
        let vtable = unsafe { cell.header().vtable() };
        let leaf = vtable.cell_type.is_leaf();
        debug_assert!(
            // SAFETY: as above.
            !leaf || !unsafe { (vtable.has_children)(cell.as_non_null()) },
            "{} is a {:?} cell but holds cell references",
            (vtable.class_name)(),
            vtable.cell_type,
        );
        leaf
    }

    /// Visits the children of `cell` through its vtable.
    pub(crate) fn visit_children(&mut self, cell: CellPtr) {
        #[cfg(debug_assertions)]
        {
            assert!(
                !self.visiting,
                "child visitation re-entered while visiting another cell"
            );
            self.visiting = true;
        }

        self.visit_count += 1;
        // SAFETY: queued cells are marked and therefore live.
        unsafe {
            let visit = cell.header().vtable().visit_children;
            visit(cell.as_non_null(), self);
        }

        #[cfg(debug_assertions)]
        {
            self.visiting = false;
        }
    }

    /// Pulls the next unmarked cell out of the innermost mark set, popping
    /// the set once it is exhausted.
    fn next_from_mark_sets(&mut self) -> Option<CellPtr> {
        let set = self.mark_sets.last_mut()?;
        let mut found = None;
        while set.values < set.end {
            // SAFETY: `append_values` callers keep the run valid until the
            // drain finishes.
            let value = unsafe { *set.values };
            set.values = unsafe { set.values.add(1) };
            if let JSValue::Cell(cell) = value {
                // SAFETY: cells held by rooted storage are live.
                if !unsafe { space::is_marked(cell) } {
                    found = Some(cell);
                    break;
                }
            }
        }
        if set.values == set.end {
            self.mark_sets.pop();
        }
        found
    }

    /// Visits cells until both worklists are empty.
    pub fn drain(&mut self) {
        while !self.mark_sets.is_empty() || !self.values.is_empty() {
            while self.values.len() < self.batch_threshold && !self.mark_sets.is_empty() {
                let Some(cell) = self.next_from_mark_sets() else {
                    continue;
                };
                // SAFETY: see `internal_append`.
                if unsafe { space::test_and_set_marked(cell) } {
                    continue;
                }
                if self.is_leaf(cell) {
                    self.visit_count += 1;
                } else {
                    self.visit_children(cell);
                }
            }

            while let Some(cell) = self.values.pop() {
                self.visit_children(cell);
            }
        }
    }

    /// True if no work is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.mark_sets.is_empty()
    }

    /// Cells visited since the last [`reset`](Self::reset).
    #[must_use]
    pub const fn visit_count(&self) -> usize {
        self.visit_count
    }

    /// Pending cells allowed before mark sets stop being consumed.
    #[must_use]
    pub const fn batch_threshold(&self) -> usize {
        self.batch_threshold
    }

    // ---- opaque roots ----

    /// Returns whether `root` was reported during this collection.
    #[must_use]
    pub fn contains_opaque_root(&self, root: usize) -> bool {
        self.opaque_roots.contains(&root)
    }

    /// Distinct opaque roots reported so far.
    #[must_use]
    pub fn opaque_root_count(&self) -> usize {
        self.opaque_roots.len()
    }

    /// Forgets opaque roots and counters once a collection is over.
    pub fn reset(&mut self) {
        debug_assert!(self.is_empty(), "mark stack reset with pending work");
        self.values.clear();
        self.mark_sets.clear();
        self.opaque_roots.clear();
        self.visit_count = 0;
    }
}

impl Default for MarkStack {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_THRESHOLD)
    }
}

impl Visitor for MarkStack {
    #[inline]
    fn append(&mut self, value: JSValue) {
        if let JSValue::Cell(cell) = value {
            self.internal_append(cell);
        }
    }

    #[inline]
    fn append_cell(&mut self, cell: CellPtr) {
        self.internal_append(cell);
    }

    unsafe fn append_values(&mut self, values: &[JSValue]) {
        if values.is_empty() {
            return;
        }
        let range = values.as_ptr_range();
        self.mark_sets.push(MarkSet {
            values: range.start,
            end: range.end,
        });
    }

    fn add_opaque_root(&mut self, root: usize) {
        self.opaque_roots.insert(root);
    }
}

impl std::fmt::Debug for MarkStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkStack")
            .field("values", &self.values.len())
            .field("mark_sets", &self.mark_sets.len())
            .field("opaque_roots", &self.opaque_roots.len())
            .field("batch_threshold", &self.batch_threshold)
            .field("visit_count", &self.visit_count)
            .finish()
    }
}
