//! Atomic counters for membrane observability.
//!
//! All counters use relaxed ordering; they are advisory, not
//! synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::Violation;

/// Global membrane operation counters.
pub struct MembraneMetrics {
    /// Object allocations handed out.
    pub object_allocs: AtomicU64,
    /// Array allocations handed out (including realloc of null).
    pub array_allocs: AtomicU64,
    /// Allocation requests that returned null.
    pub alloc_failures: AtomicU64,
    /// Successful frees (both pointer kinds).
    pub frees: AtomicU64,
    /// Reallocs serviced without moving the block.
    pub reallocs_in_place: AtomicU64,
    /// Reallocs that moved the block and issued a new tag.
    pub reallocs_moved: AtomicU64,
    /// Reallocs whose underlying call failed.
    pub realloc_failures: AtomicU64,
    /// Pointers rebuilt from raw addresses.
    pub rebases: AtomicU64,
    /// Rebases of a null raw address (passed through as null).
    pub null_rebases: AtomicU64,
    /// Sentinel pointers created.
    pub sentinels: AtomicU64,
    /// Interior or unowned frees detected.
    pub invalid_frees: AtomicU64,
    /// Tag mismatches detected.
    pub tag_mismatches: AtomicU64,
}

impl MembraneMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            object_allocs: AtomicU64::new(0),
            array_allocs: AtomicU64::new(0),
            alloc_failures: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            reallocs_in_place: AtomicU64::new(0),
            reallocs_moved: AtomicU64::new(0),
            realloc_failures: AtomicU64::new(0),
            rebases: AtomicU64::new(0),
            null_rebases: AtomicU64::new(0),
            sentinels: AtomicU64::new(0),
            invalid_frees: AtomicU64::new(0),
            tag_mismatches: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Count a detected violation under its class.
    pub fn record_violation(&self, violation: &Violation) {
        if violation.is_invalid_free() {
            Self::inc(&self.invalid_frees);
        } else {
            Self::inc(&self.tag_mismatches);
        }
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            object_allocs: Self::get(&self.object_allocs),
            array_allocs: Self::get(&self.array_allocs),
            alloc_failures: Self::get(&self.alloc_failures),
            frees: Self::get(&self.frees),
            reallocs_in_place: Self::get(&self.reallocs_in_place),
            reallocs_moved: Self::get(&self.reallocs_moved),
            realloc_failures: Self::get(&self.realloc_failures),
            rebases: Self::get(&self.rebases),
            null_rebases: Self::get(&self.null_rebases),
            sentinels: Self::get(&self.sentinels),
            invalid_frees: Self::get(&self.invalid_frees),
            tag_mismatches: Self::get(&self.tag_mismatches),
        }
    }
}

impl Default for MembraneMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all membrane counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub object_allocs: u64,
    pub array_allocs: u64,
    pub alloc_failures: u64,
    pub frees: u64,
    pub reallocs_in_place: u64,
    pub reallocs_moved: u64,
    pub realloc_failures: u64,
    pub rebases: u64,
    pub null_rebases: u64,
    pub sentinels: u64,
    pub invalid_frees: u64,
    pub tag_mismatches: u64,
}

/// Global metrics instance.
static GLOBAL_METRICS: MembraneMetrics = MembraneMetrics::new();

/// Access the global metrics singleton.
#[must_use]
pub fn global_metrics() -> &'static MembraneMetrics {
    &GLOBAL_METRICS
}
