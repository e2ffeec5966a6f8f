//! Heap configuration.

use crate::gc::DEFAULT_BATCH_THRESHOLD;

/// Lower bound of the allocation budget between automatic collections.
pub const DEFAULT_MIN_BYTES_PER_CYCLE: usize = 512 * 1024;

/// Extra memory costs below this are not worth tracking.
pub const DEFAULT_MIN_EXTRA_COST: usize = 256;

/// Accumulated extra cost above which a collection is considered.
pub const DEFAULT_MAX_EXTRA_COST: usize = 1024 * 1024;

/// Tunables for a [`Heap`](crate::Heap).
///
/// ```
/// use marked_heap::HeapConfig;
///
/// let config = HeapConfig::default()
///     .automatic_collection(true)
///     .min_bytes_per_cycle(64 * 1024);
/// assert!(config.automatic_collection);
/// assert_eq!(config.drain_batch_threshold, 50);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Pending cells the drain loop accumulates before it stops pulling
    /// from mark sets.
    pub drain_batch_threshold: usize,
    /// Collect when allocation reaches the high-water mark or extra cost
    /// piles up. Off by default: cells held only in Rust locals are
    /// invisible to the collector unless the machine stack is scanned.
    pub automatic_collection: bool,
    /// Floor of the high-water mark computed after each collection.
    pub min_bytes_per_cycle: usize,
    /// Extra costs below this are ignored.
    pub min_extra_cost: usize,
    /// Extra cost that may trigger a collection.
    pub max_extra_cost: usize,
    /// Register a [`MachineStackScanner`](crate::MachineStackScanner).
    pub scan_machine_stack: bool,
    /// Return blocks left empty by a sweep to the OS.
    pub release_empty_blocks: bool,
    /// Collect on every allocation slow path, regardless of the water mark.
    /// Only meaningful with `automatic_collection`.
    pub collect_on_every_slow_allocation: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            drain_batch_threshold: DEFAULT_BATCH_THRESHOLD,
            automatic_collection: false,
            min_bytes_per_cycle: DEFAULT_MIN_BYTES_PER_CYCLE,
            min_extra_cost: DEFAULT_MIN_EXTRA_COST,
            max_extra_cost: DEFAULT_MAX_EXTRA_COST,
            scan_machine_stack: false,
            release_empty_blocks: true,
            collect_on_every_slow_allocation: false,
        }
    }
}

impl HeapConfig {
    /// Sets [`drain_batch_threshold`](Self::drain_batch_threshold).
    #[must_use]
    pub const fn drain_batch_threshold(mut self, threshold: usize) -> Self {
        self.drain_batch_threshold = threshold;
        self
    }

    /// Sets [`automatic_collection`](Self::automatic_collection).
    #[must_use]
    pub const fn automatic_collection(mut self, enabled: bool) -> Self {
        self.automatic_collection = enabled;
        self
    }

    /// Sets [`min_bytes_per_cycle`](Self::min_bytes_per_cycle).
    #[must_use]
    pub const fn min_bytes_per_cycle(mut self, bytes: usize) -> Self {
        self.min_bytes_per_cycle = bytes;
        self
    }

    /// Sets [`min_extra_cost`](Self::min_extra_cost).
    #[must_use]
    pub const fn min_extra_cost(mut self, bytes: usize) -> Self {
        self.min_extra_cost = bytes;
        self
    }

    /// Sets [`max_extra_cost`](Self::max_extra_cost).
    #[must_use]
    pub const fn max_extra_cost(mut self, bytes: usize) -> Self {
        self.max_extra_cost = bytes;
        self
    }

    /// Sets [`scan_machine_stack`](Self::scan_machine_stack).
    #[must_use]
    pub const fn scan_machine_stack(mut self, enabled: bool) -> Self {
        self.scan_machine_stack = enabled;
        self
    }

    /// Sets [`release_empty_blocks`](Self::release_empty_blocks).
    #[must_use]
    pub const fn release_empty_blocks(mut self, enabled: bool) -> Self {
        self.release_empty_blocks = enabled;
        self
    }

    /// Sets
    /// [`collect_on_every_slow_allocation`](Self::collect_on_every_slow_allocation).
    #[must_use]
    pub const fn collect_on_every_slow_allocation(mut self, enabled: bool) -> Self {
        self.collect_on_every_slow_allocation = enabled;
        self
    }
}
