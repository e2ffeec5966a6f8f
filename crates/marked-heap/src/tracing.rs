//! Collector tracing support.
//!
//! Compiled only with the `tracing` feature. Provides structured spans and
//! events for collections and block lifecycle.

pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    /// Phases of one collection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        /// Gather conservative roots and reset mark bits.
        Clear,
        /// Mark from roots and drain.
        Mark,
        /// Fold opaque-root reachability of weak handles into the live set.
        WeakMark,
        /// Notify owners of dead weak handles.
        Finalize,
        /// Destroy unmarked cells and release empty blocks.
        Sweep,
    }

    /// Identifier correlating all events of one collection.
    ///
    /// Starts at 1 and increases monotonically across every heap in the
    /// process.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next unique collection ID.
    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a span covering an entire collection.
    pub fn trace_collection(collection_type: &str, gc_id: GcId) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "heap_collect",
            collection_type = collection_type,
            gc_id = gc_id.0
        )
        .entered()
    }

    /// Create a span for one phase.
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "heap_phase", phase = ?phase).entered()
    }

    /// Log the start of a phase.
    pub fn log_phase_start(phase: GcPhase, bytes_before: usize) {
        tracing::debug!(phase = ?phase, bytes_before, "phase_start");
    }

    /// Log the end of a phase with the number of cells it affected.
    pub fn log_phase_end(phase: GcPhase, cells: usize) {
        tracing::debug!(phase = ?phase, cells, "phase_end");
    }

    /// Log a block being reserved for a size class.
    pub fn log_block_created(cell_size: usize, address: usize) {
        tracing::trace!(cell_size, address, "block_created");
    }

    /// Log empty blocks being returned to the OS.
    pub fn log_blocks_released(count: usize) {
        tracing::debug!(count, "blocks_released");
    }
}
