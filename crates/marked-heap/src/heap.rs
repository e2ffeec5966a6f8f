//! The heap facade.
//!
//! [`Heap`] owns the object space, the handle tables, the mark stack and
//! every other root source, and runs collections over them. A heap is an
//! ordinary value: create as many as needed, drop one to tear it down.
//!
//! A collection runs to completion on the calling thread:
//!
//! 1. gather conservative roots, while mark bits still describe the
//!    previous cycle,
//! 2. clear every mark bit,
//! 3. mark conservative roots, protected cells, temporary sort vectors,
//!    strong handles and local handles, draining after each,
//! 4. mark weak handles that are reachable through opaque roots, draining
//!    until nothing new is found,
//! 5. finalize weak handles whose cells stayed unmarked,
//! 6. rewind the allocator and, for a full collection, sweep.

use std::alloc::Layout;
use std::collections::HashMap;
use std::time::Instant;

use crate::cell::{Cell, CellBox, CellType};
use crate::config::HeapConfig;
use crate::error::AllocationError;
use crate::gc::{ConservativeRoots, MarkStack, RootScanner};
use crate::handles::{Frame, HandleHeap, HandleList, HandleSlot, HandleStack, LocalHandle};
use crate::metrics::{CollectionType, GcMetrics, PhaseTimer};
use crate::space::{MarkedSpace, ATOM_SIZE, BLOCK_SIZE, MAX_CELL_SIZE};
use crate::stack::MachineStackScanner;
use crate::trace::Visitor;
use crate::value::{CellPtr, JSValue};

#[cfg(feature = "tracing")]
use crate::tracing::internal::{
    log_phase_end, log_phase_start, next_gc_id, trace_collection, trace_phase, GcPhase,
};

/// What the heap is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationInProgress {
    /// Idle.
    #[default]
    NoOperation,
    /// Inside an allocation.
    Allocation,
    /// Inside a collection.
    Collection,
}

/// Whether a collection sweeps dead cells right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepToggle {
    /// Leave dead cells in place; they are destroyed when their slots are
    /// reused or at the next full collection.
    DoNotSweep,
    /// Destroy dead cells and release empty blocks.
    DoSweep,
}

type ActivityCallback = Box<dyn FnMut(&GcMetrics)>;

/// A garbage-collected heap of [`Cell`]s.
///
/// ```
/// use marked_heap::{Cell, Heap, JSValue, Trace};
///
/// #[derive(Trace, Cell)]
/// struct Pair {
///     first: JSValue,
///     second: JSValue,
/// }
///
/// let mut heap = Heap::new();
/// let leaf = heap.allocate_cell(Pair { first: 1.into(), second: 2.into() });
/// let pair = heap.allocate_cell(Pair { first: leaf.into(), second: JSValue::Null });
/// heap.protect(pair.into());
///
/// heap.collect_all_garbage();
/// assert!(heap.is_marked(leaf));
///
/// heap.unprotect(pair.into());
/// heap.collect_all_garbage();
/// assert_eq!(heap.object_count(), 0);
/// ```
pub struct Heap {
    space: MarkedSpace,
    handles: HandleHeap,
    local_handles: HandleStack,
    mark_stack: MarkStack,
    protected: HashMap<CellPtr, usize>,
    temp_sort_vectors: Vec<Vec<JSValue>>,
    root_scanners: Vec<Box<dyn RootScanner>>,
    config: HeapConfig,
    operation: OperationInProgress,
    extra_cost: usize,
    last_metrics: GcMetrics,
    total_collections: usize,
    activity_callback: Option<ActivityCallback>,
}

impl Heap {
    /// Creates a heap with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    /// Creates a heap with `config`.
    #[must_use]
    pub fn with_config(config: HeapConfig) -> Self {
        let mut heap = Self {
            space: MarkedSpace::new(Self::initial_high_water_mark(&config)),
            handles: HandleHeap::new(),
            local_handles: HandleStack::new(),
            mark_stack: MarkStack::new(config.drain_batch_threshold),
            protected: HashMap::new(),
            temp_sort_vectors: Vec::new(),
            root_scanners: Vec::new(),
            config,
            operation: OperationInProgress::NoOperation,
            extra_cost: 0,
            last_metrics: GcMetrics::new(),
            total_collections: 0,
            activity_callback: None,
        };
        if heap.config.scan_machine_stack {
            heap.add_root_scanner(Box::new(MachineStackScanner));
        }
        heap
    }

    /// With `collect_on_every_slow_allocation`, a zero high-water mark sends
    /// every block-exhausting allocation down the collecting slow path.
    const fn initial_high_water_mark(config: &HeapConfig) -> usize {
        if config.collect_on_every_slow_allocation {
            0
        } else {
            config.min_bytes_per_cycle
        }
    }

    /// The configuration this heap was created with.
    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocates `bytes` of raw cell storage holding a zombie header.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` exceeds the largest size class or a collection is
    /// in progress. Aborts through [`std::alloc::handle_alloc_error`] if no
    /// block can be reserved.
    pub fn allocate(&mut self, bytes: usize) -> CellPtr {
        Self::unwrap_allocation(self.try_allocate(bytes))
    }

    /// Fallible [`allocate`](Self::allocate).
    ///
    /// # Errors
    ///
    /// See [`AllocationError`].
    pub fn try_allocate(&mut self, bytes: usize) -> Result<CellPtr, AllocationError> {
        self.allocate_rooted(bytes, &mut |_: &mut MarkStack| {})
    }

    /// Moves `value` into a new cell.
    ///
    /// `value` is treated as a root if the allocation triggers a
    /// collection, so the cells it references survive.
    ///
    /// # Panics
    ///
    /// As for [`allocate`](Self::allocate).
    pub fn allocate_cell<T: Cell>(&mut self, value: T) -> CellPtr {
        Self::unwrap_allocation(self.try_allocate_cell(value))
    }

    /// Fallible [`allocate_cell`](Self::allocate_cell). On error `value` is
    /// dropped.
    ///
    /// # Errors
    ///
    /// See [`AllocationError`].
    pub fn try_allocate_cell<T: Cell>(&mut self, value: T) -> Result<CellPtr, AllocationError> {
        const {
            assert!(
                std::mem::align_of::<CellBox<T>>() <= ATOM_SIZE,
                "cell alignment exceeds the atom size"
            );
        }
        let bytes = std::mem::size_of::<CellBox<T>>();
        let cell = self.allocate_rooted(bytes, &mut |stack: &mut MarkStack| value.trace(stack))?;
        // SAFETY: the slot is fresh, sized and aligned for `CellBox<T>`, and
        // holds a zombie that needs no destruction.
        unsafe { cell.as_ptr().cast::<CellBox<T>>().write(CellBox::new(value)) };
        Ok(cell)
    }

    fn unwrap_allocation(result: Result<CellPtr, AllocationError>) -> CellPtr {
        match result {
            Ok(cell) => cell,
            Err(AllocationError::BlockReservation(_)) => {
                let layout = Layout::from_size_align(BLOCK_SIZE, BLOCK_SIZE)
                    .unwrap_or_else(|_| Layout::new::<u8>());
                std::alloc::handle_alloc_error(layout)
            }
            Err(err) => panic!("{err}"),
        }
    }

    fn allocate_rooted(
        &mut self,
        bytes: usize,
        extra_roots: &mut dyn FnMut(&mut MarkStack),
    ) -> Result<CellPtr, AllocationError> {
        if self.operation == OperationInProgress::Collection {
            return Err(AllocationError::CollectionInProgress);
        }
        let class = MarkedSpace::size_class_for(bytes).ok_or(AllocationError::CellTooLarge {
            requested: bytes,
            max: MAX_CELL_SIZE,
        })?;

        self.operation = OperationInProgress::Allocation;
        let mut result = self
            .space
            .allocate_from_size_class(class)
            .map_err(AllocationError::BlockReservation);

        if matches!(result, Ok(None)) {
            if self.config.automatic_collection {
                self.operation = OperationInProgress::NoOperation;
                self.collect_with_roots(SweepToggle::DoNotSweep, extra_roots);
                self.operation = OperationInProgress::Allocation;
                result = self
                    .space
                    .allocate_from_size_class(class)
                    .map_err(AllocationError::BlockReservation);
            }
            if matches!(result, Ok(None)) {
                result = self
                    .space
                    .allocate_with_new_block(class)
                    .map(Some)
                    .map_err(AllocationError::BlockReservation);
            }
        }
        self.operation = OperationInProgress::NoOperation;

        let ptr = result?.unwrap_or_else(|| unreachable!("a new block always has a free cell"));
        // SAFETY: the space returns the start of a zombie-initialized slot.
        Ok(unsafe { CellPtr::from_raw(ptr.cast()) })
    }

    // ========================================================================
    // Typed access
    // ========================================================================

    /// Returns the payload of `cell` if it is a live `T`.
    #[must_use]
    pub fn get<T: Cell>(&self, cell: CellPtr) -> Option<&T> {
        if !self.space.contains(cell.addr()) {
            return None;
        }
        // SAFETY: `contains` proved the cell is live; the type was checked.
        unsafe { cell.header().is::<T>().then(|| cell.as_ref::<T>()) }
    }

    /// Returns the payload of `cell` mutably if it is a live `T`.
    #[must_use]
    pub fn get_mut<T: Cell>(&mut self, cell: CellPtr) -> Option<&mut T> {
        if !self.space.contains(cell.addr()) {
            return None;
        }
        // SAFETY: as in `get`; `&mut self` excludes other payload borrows
        // obtained through this heap.
        unsafe { cell.header().is::<T>().then(|| cell.as_mut::<T>()) }
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Runs a full collection and sweeps.
    pub fn collect_all_garbage(&mut self) {
        self.collect(SweepToggle::DoSweep);
    }

    /// Runs a collection.
    ///
    /// # Panics
    ///
    /// Panics if called while another operation is in progress.
    pub fn collect(&mut self, sweep: SweepToggle) {
        self.collect_with_roots(sweep, &mut |_: &mut MarkStack| {});
    }

    fn collect_with_roots(
        &mut self,
        sweep: SweepToggle,
        extra_roots: &mut dyn FnMut(&mut MarkStack),
    ) {
        assert_eq!(
            self.operation,
            OperationInProgress::NoOperation,
            "collection started while the heap was busy"
        );
        self.operation = OperationInProgress::Collection;

        let collection_type = match sweep {
            SweepToggle::DoSweep => CollectionType::Full,
            SweepToggle::DoNotSweep => CollectionType::MarkOnly,
        };

        #[cfg(feature = "tracing")]
        let gc_id = next_gc_id();
        #[cfg(feature = "tracing")]
        let _gc_span = trace_collection(collection_type.as_str(), gc_id);

        let start = Instant::now();
        let mut timer = PhaseTimer::new();
        let objects_before = self.space.object_count();
        let bytes_before = self.space.size();

        // Phase 1: gather conservative roots, then clear marks
        timer.start();
        #[cfg(feature = "tracing")]
        let clear_span = trace_phase(GcPhase::Clear);
        #[cfg(feature = "tracing")]
        log_phase_start(GcPhase::Clear, bytes_before);

        let conservative = self.gather_conservative_roots();
        self.space.clear_marks();

        #[cfg(feature = "tracing")]
        log_phase_end(GcPhase::Clear, conservative.len());
        #[cfg(feature = "tracing")]
        drop(clear_span);
        timer.end_clear();

        // Phase 2: mark from roots, then fold in weak handles
        timer.start();
        #[cfg(feature = "tracing")]
        let mark_span = trace_phase(GcPhase::Mark);
        #[cfg(feature = "tracing")]
        log_phase_start(GcPhase::Mark, bytes_before);

        self.mark_roots(&conservative, extra_roots);

        #[cfg(feature = "tracing")]
        log_phase_end(GcPhase::Mark, self.mark_stack.visit_count());
        #[cfg(feature = "tracing")]
        drop(mark_span);

        #[cfg(feature = "tracing")]
        let weak_span = trace_phase(GcPhase::WeakMark);
        #[cfg(feature = "tracing")]
        log_phase_start(GcPhase::WeakMark, bytes_before);

        let weak_marked = self.mark_weak_handles();

        #[cfg(feature = "tracing")]
        log_phase_end(GcPhase::WeakMark, weak_marked);
        #[cfg(feature = "tracing")]
        drop(weak_span);
        #[cfg(not(feature = "tracing"))]
        let _ = weak_marked;
        timer.end_mark();

        // Phase 3: finalize weak handles, rewind the allocator, sweep
        timer.start();
        #[cfg(feature = "tracing")]
        let finalize_span = trace_phase(GcPhase::Finalize);
        #[cfg(feature = "tracing")]
        log_phase_start(GcPhase::Finalize, bytes_before);

        let weak_handles_finalized = self.handles.finalize_weak_handles();

        #[cfg(feature = "tracing")]
        log_phase_end(GcPhase::Finalize, weak_handles_finalized);
        #[cfg(feature = "tracing")]
        drop(finalize_span);

        self.space.reset();
        let objects_surviving = self.space.object_count();
        let bytes_surviving = self.space.size();

        let (objects_reclaimed, blocks_freed) = match sweep {
            SweepToggle::DoSweep => {
                #[cfg(feature = "tracing")]
                let _sweep_span = trace_phase(GcPhase::Sweep);
                #[cfg(feature = "tracing")]
                log_phase_start(GcPhase::Sweep, bytes_before);

                let destroyed = self.space.sweep();
                let freed = if self.config.release_empty_blocks {
                    self.space.shrink()
                } else {
                    0
                };

                #[cfg(feature = "tracing")]
                log_phase_end(GcPhase::Sweep, destroyed);
                (destroyed, freed)
            }
            SweepToggle::DoNotSweep => (objects_before.saturating_sub(objects_surviving), 0),
        };
        timer.end_sweep();

        self.space.set_high_water_mark(if self.config.collect_on_every_slow_allocation {
            0
        } else {
            (2 * bytes_surviving).max(self.config.min_bytes_per_cycle)
        });
        self.extra_cost = 0;

        let cells_visited = self.mark_stack.visit_count();
        self.mark_stack.reset();
        self.total_collections += 1;
        self.last_metrics = GcMetrics {
            duration: start.elapsed(),
            clear_duration: timer.clear,
            mark_duration: timer.mark,
            sweep_duration: timer.sweep,
            objects_surviving,
            bytes_surviving,
            objects_reclaimed,
            bytes_reclaimed: bytes_before.saturating_sub(bytes_surviving),
            cells_visited,
            weak_handles_finalized,
            blocks_freed,
            collection_type,
            total_collections: self.total_collections,
        };

        self.operation = OperationInProgress::NoOperation;
        if let Some(callback) = self.activity_callback.as_mut() {
            callback(&self.last_metrics);
        }
    }

    fn gather_conservative_roots(&mut self) -> Vec<CellPtr> {
        let mut roots = ConservativeRoots::new(&self.space);
        for scanner in &mut self.root_scanners {
            scanner.gather_conservative_roots(&mut roots);
        }
        roots.into_roots()
    }

    fn mark_roots(
        &mut self,
        conservative: &[CellPtr],
        extra_roots: &mut dyn FnMut(&mut MarkStack),
    ) {
        let stack = &mut self.mark_stack;

        stack.append_conservative_roots(conservative);
        stack.drain();

        for &cell in self.protected.keys() {
            stack.append_cell(cell);
        }
        stack.drain();

        for vector in &self.temp_sort_vectors {
            // SAFETY: the vectors are not touched before the drain below.
            unsafe { stack.append_values(vector) };
        }
        stack.drain();

        self.handles.mark_strong_handles(stack);
        stack.drain();

        // SAFETY: the local handle stack is not touched before the drain.
        unsafe { self.local_handles.mark(stack) };
        stack.drain();

        extra_roots(stack);
        stack.drain();
    }

    /// Marks weak handles reachable through opaque roots until a pass finds
    /// nothing new. Returns the number of handles marked.
    fn mark_weak_handles(&mut self) -> usize {
        let mut total = 0;
        loop {
            let marked = self.handles.mark_weak_handles(&mut self.mark_stack);
            if marked == 0 {
                return total;
            }
            total += marked;
            self.mark_stack.drain();
        }
    }

    /// Notes memory held outside the heap on behalf of a cell. With
    /// automatic collection on, enough of it triggers a full collection.
    pub fn report_extra_memory_cost(&mut self, cost: usize) {
        if cost < self.config.min_extra_cost {
            return;
        }
        if self.config.automatic_collection
            && self.operation == OperationInProgress::NoOperation
            && self.extra_cost > self.config.max_extra_cost
            && self.extra_cost > self.space.high_water_mark() / 2
        {
            self.collect_all_garbage();
        }
        self.extra_cost = self.extra_cost.saturating_add(cost);
    }

    /// Extra memory reported since the last collection.
    #[must_use]
    pub const fn extra_cost(&self) -> usize {
        self.extra_cost
    }

    /// Adds a source of conservative roots consulted by every collection.
    pub fn add_root_scanner(&mut self, scanner: Box<dyn RootScanner>) {
        self.root_scanners.push(scanner);
    }

    /// Installs a callback invoked after every collection.
    pub fn set_activity_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&GcMetrics) + 'static,
    {
        self.activity_callback = Some(Box::new(callback));
    }

    /// Statistics from the most recent collection.
    #[must_use]
    pub const fn last_metrics(&self) -> GcMetrics {
        self.last_metrics
    }

    /// Collections run so far.
    #[must_use]
    pub const fn total_collections(&self) -> usize {
        self.total_collections
    }

    // ========================================================================
    // Protection
    // ========================================================================

    /// Keeps the cell in `value` alive until a matching
    /// [`unprotect`](Self::unprotect). Calls nest. Non-cell values are
    /// ignored.
    pub fn protect(&mut self, value: JSValue) {
        if let Some(cell) = value.as_cell() {
            *self.protected.entry(cell).or_insert(0) += 1;
        }
    }

    /// Undoes one [`protect`](Self::protect). Returns `true` when the
    /// protection count of the cell drops to zero.
    pub fn unprotect(&mut self, value: JSValue) -> bool {
        let Some(cell) = value.as_cell() else {
            return false;
        };
        let Some(count) = self.protected.get_mut(&cell) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.protected.remove(&cell);
            return true;
        }
        false
    }

    fn for_each_protected_cell(&self, mut f: impl FnMut(CellPtr)) {
        for &cell in self.protected.keys() {
            f(cell);
        }
        self.handles.for_each_in_list(HandleList::Strong, |_, value| {
            if let Some(cell) = value.as_cell() {
                f(cell);
            }
        });
    }

    /// Cells kept alive by protection or strong handles.
    #[must_use]
    pub fn protected_object_count(&self) -> usize {
        let mut count = 0;
        self.for_each_protected_cell(|_| count += 1);
        count
    }

    /// Protected cells and strong handles that are global objects.
    #[must_use]
    pub fn protected_global_object_count(&self) -> usize {
        let protected = self
            .protected
            .keys()
            // SAFETY: protected cells are live.
            .filter(|cell| unsafe { cell.cell_type() } == CellType::GlobalObject)
            .count();
        protected + self.handles.protected_global_object_count()
    }

    /// Class name histogram of the protected cells.
    #[must_use]
    pub fn protected_object_type_counts(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        self.for_each_protected_cell(|cell| {
            // SAFETY: protected cells are live.
            *counts.entry(unsafe { cell.class_name() }).or_insert(0) += 1;
        });
        counts
    }

    // ========================================================================
    // Handles
    // ========================================================================

    /// Allocates a global handle holding [`JSValue::Empty`].
    pub fn allocate_global_handle(&mut self) -> HandleSlot {
        self.handles.allocate()
    }

    /// The global handle table.
    #[must_use]
    pub const fn handle_heap(&self) -> &HandleHeap {
        &self.handles
    }

    /// The global handle table, mutably.
    pub const fn handle_heap_mut(&mut self) -> &mut HandleHeap {
        &mut self.handles
    }

    /// The local handle stack.
    #[must_use]
    pub const fn handle_stack(&self) -> &HandleStack {
        &self.local_handles
    }

    /// Pushes a local handle in the innermost handle scope.
    ///
    /// # Panics
    ///
    /// Panics outside [`with_handle_scope`](Self::with_handle_scope).
    pub fn allocate_local_handle(&mut self) -> LocalHandle {
        self.local_handles.push()
    }

    /// The value of a local handle.
    #[must_use]
    pub fn local_handle(&self, handle: LocalHandle) -> JSValue {
        self.local_handles.get(handle)
    }

    /// Stores `value` in a local handle.
    pub fn set_local_handle(&mut self, handle: LocalHandle, value: JSValue) {
        self.local_handles.set(handle, value);
    }

    /// Runs `f` inside a fresh handle scope; local handles pushed by `f` are
    /// released when it returns or unwinds.
    pub fn with_handle_scope<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let frame = self.local_handles.enter_scope();
        let mut scope = HandleScopeGuard {
            heap: self,
            frame: Some(frame),
        };
        f(&mut *scope.heap)
    }

    // ========================================================================
    // Temporary sort vectors
    // ========================================================================

    /// Roots `values` until the matching
    /// [`pop_temp_sort_vector`](Self::pop_temp_sort_vector).
    pub fn push_temp_sort_vector(&mut self, values: Vec<JSValue>) {
        self.temp_sort_vectors.push(values);
    }

    /// Stops rooting the most recently pushed vector and returns it.
    pub fn pop_temp_sort_vector(&mut self) -> Option<Vec<JSValue>> {
        self.temp_sort_vectors.pop()
    }

    /// The most recently pushed vector.
    pub fn temp_sort_vector_mut(&mut self) -> Option<&mut Vec<JSValue>> {
        self.temp_sort_vectors.last_mut()
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// True if `addr` is the start of a live cell of this heap.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.space.contains(addr)
    }

    /// True if `cell` is marked: it survived the last collection or was
    /// allocated since.
    #[must_use]
    pub fn is_marked(&self, cell: CellPtr) -> bool {
        self.space.contains(cell.addr())
    }

    /// Calls `f` on every live cell.
    pub fn for_each_cell<F: FnMut(CellPtr)>(&self, f: F) {
        self.space.for_each_cell(f);
    }

    /// Number of live cells.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.space.object_count()
    }

    /// Bytes held by live cells.
    #[must_use]
    pub fn size(&self) -> usize {
        self.space.size()
    }

    /// Bytes reserved for blocks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.space.capacity()
    }

    /// Live cells that are global objects.
    #[must_use]
    pub fn global_object_count(&self) -> usize {
        let mut count = 0;
        self.space.for_each_cell(|cell| {
            // SAFETY: iterated cells are live.
            if unsafe { cell.cell_type() } == CellType::GlobalObject {
                count += 1;
            }
        });
        count
    }

    /// Class name histogram of the live constructed cells.
    #[must_use]
    pub fn object_type_counts(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        self.space.for_each_cell(|cell| {
            // SAFETY: iterated cells are live.
            unsafe {
                if !cell.header().is_zombie() {
                    *counts.entry(cell.class_name()).or_insert(0) += 1;
                }
            }
        });
        counts
    }

    /// True while an allocation or collection is running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.operation != OperationInProgress::NoOperation
    }

    /// The operation currently running.
    #[must_use]
    pub const fn operation_in_progress(&self) -> OperationInProgress {
        self.operation
    }

    /// The object space.
    #[must_use]
    pub const fn space(&self) -> &MarkedSpace {
        &self.space
    }
}

/// Leaves a handle scope when dropped.
struct HandleScopeGuard<'a> {
    heap: &'a mut Heap,
    frame: Option<Frame>,
}

impl Drop for HandleScopeGuard<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.heap.local_handles.leave_scope(frame);
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.operation = OperationInProgress::Collection;
        // Nothing is marked, so every weak handle is finalized and every
        // cell destroyed before the blocks go.
        self.space.clear_marks();
        self.handles.finalize_weak_handles();
        self.space.sweep();
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("operation", &self.operation)
            .field("objects", &self.object_count())
            .field("capacity", &self.capacity())
            .field("handles", &self.handles)
            .field("protected", &self.protected.len())
            .field("total_collections", &self.total_collections)
            .finish_non_exhaustive()
    }
}
