//! Collection metrics.

use std::time::{Duration, Instant};

/// Statistics from one collection.
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Duration of the whole collection.
    pub duration: Duration,
    /// Duration of root gathering and mark clearing.
    pub clear_duration: Duration,
    /// Duration of marking, weak marking included.
    pub mark_duration: Duration,
    /// Duration of finalization and sweeping.
    pub sweep_duration: Duration,
    /// Cells marked.
    pub objects_surviving: usize,
    /// Bytes held by marked cells.
    pub bytes_surviving: usize,
    /// Cells destroyed by the sweep.
    pub objects_reclaimed: usize,
    /// Bytes of the destroyed cells.
    pub bytes_reclaimed: usize,
    /// Cells whose children were visited or that were marked as leaves.
    pub cells_visited: usize,
    /// Weak handles cleared.
    pub weak_handles_finalized: usize,
    /// Empty blocks returned to the OS.
    pub blocks_freed: usize,
    /// Whether the collection swept.
    pub collection_type: CollectionType,
    /// Collections run by this heap so far, this one included.
    pub total_collections: usize,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    /// Create a new `GcMetrics` with all fields set to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            clear_duration: Duration::ZERO,
            mark_duration: Duration::ZERO,
            sweep_duration: Duration::ZERO,
            objects_surviving: 0,
            bytes_surviving: 0,
            objects_reclaimed: 0,
            bytes_reclaimed: 0,
            cells_visited: 0,
            weak_handles_finalized: 0,
            blocks_freed: 0,
            collection_type: CollectionType::None,
            total_collections: 0,
        }
    }
}

/// Kind of collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectionType {
    /// No collection has run yet.
    #[default]
    None = 0,
    /// Marked and swept.
    Full = 1,
    /// Marked only; dead cells are destroyed lazily when their slots are
    /// reused.
    MarkOnly = 2,
}

impl CollectionType {
    /// Name used in log output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Full => "full",
            Self::MarkOnly => "mark_only",
        }
    }
}

/// Times the clear, mark and sweep phases of a collection.
///
/// ```
/// use marked_heap::metrics::PhaseTimer;
///
/// let mut timer = PhaseTimer::new();
/// timer.start();
/// timer.end_clear();
/// timer.start();
/// timer.end_mark();
/// assert!(timer.sweep.is_zero());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PhaseTimer {
    /// Clear phase time.
    pub clear: Duration,
    /// Mark phase time.
    pub mark: Duration,
    /// Sweep phase time.
    pub sweep: Duration,
    current_start: Option<Instant>,
}

impl PhaseTimer {
    /// Create a new `PhaseTimer` with all durations set to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            clear: Duration::ZERO,
            mark: Duration::ZERO,
            sweep: Duration::ZERO,
            current_start: None,
        }
    }

    /// Start timing a phase.
    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    /// End the clear phase and record its duration.
    pub fn end_clear(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.clear = start.elapsed();
        }
    }

    /// End the mark phase and record its duration.
    pub fn end_mark(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.mark = start.elapsed();
        }
    }

    /// End the sweep phase and record its duration.
    pub fn end_sweep(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.sweep = start.elapsed();
        }
    }
}

impl Default for PhaseTimer {
    fn default() -> Self {
        Self::new()
    }
}
