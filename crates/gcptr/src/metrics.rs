//! Sweep metrics and statistics.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// What triggered a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SweepKind {
    /// No sweep has run on this thread yet.
    #[default]
    None = 0,
    /// A handle was dropped or reassigned.
    Eager = 1,
    /// `TrackedHandle::collect` was called.
    Explicit = 2,
    /// Forced sweep at thread or process teardown.
    Shutdown = 3,
}

/// Statistics from the most recent sweep on the current thread.
#[derive(Debug, Clone, Copy)]
pub struct SweepMetrics {
    /// Wall time spent removing and freeing records.
    pub duration: Duration,
    /// Number of records removed (allocations freed).
    pub records_reclaimed: usize,
    /// How many of the reclaimed allocations were arrays.
    pub arrays_reclaimed: usize,
    /// Number of elements dropped across all reclaimed allocations.
    pub elements_reclaimed: usize,
    /// Records left in the registry after the sweep.
    pub records_surviving: usize,
    /// What triggered the sweep.
    pub kind: SweepKind,
    /// Sweeps run on this thread so far, this one included.
    pub total_sweeps: usize,
}

impl Default for SweepMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepMetrics {
    /// Create a new `SweepMetrics` with all fields zeroed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            records_reclaimed: 0,
            arrays_reclaimed: 0,
            elements_reclaimed: 0,
            records_surviving: 0,
            kind: SweepKind::None,
            total_sweeps: 0,
        }
    }
}

/// Counts produced by freeing a batch of unreferenced records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Allocations freed.
    pub records: usize,
    /// Array allocations among them.
    pub arrays: usize,
    /// Elements dropped.
    pub elements: usize,
}

impl ReclaimStats {
    pub(crate) const fn merge(&mut self, other: Self) {
        self.records += other.records;
        self.arrays += other.arrays;
        self.elements += other.elements;
    }
}

thread_local! {
    static LAST_SWEEP: Cell<SweepMetrics> = const { Cell::new(SweepMetrics::new()) };
    static SWEEP_COUNT: Cell<usize> = const { Cell::new(0) };
}

/// Get the metrics of the last sweep that ran on this thread.
///
/// # Example
///
/// ```
/// use gcptr::{last_sweep_metrics, SweepKind, TrackedHandle};
///
/// let h: TrackedHandle<u8, 7> = TrackedHandle::new(1);
/// drop(h);
///
/// let metrics = last_sweep_metrics();
/// assert_eq!(metrics.kind, SweepKind::Eager);
/// assert_eq!(metrics.records_reclaimed, 1);
/// ```
#[must_use]
pub fn last_sweep_metrics() -> SweepMetrics {
    LAST_SWEEP.try_with(Cell::get).unwrap_or_default()
}

/// Store the outcome of a sweep for this thread and the process totals.
pub(crate) fn record_sweep(
    kind: SweepKind,
    stats: ReclaimStats,
    records_surviving: usize,
    duration: Duration,
) {
    let total_sweeps = SWEEP_COUNT
        .try_with(|n| {
            n.set(n.get() + 1);
            n.get()
        })
        .unwrap_or(0);

    let metrics = SweepMetrics {
        duration,
        records_reclaimed: stats.records,
        arrays_reclaimed: stats.arrays,
        elements_reclaimed: stats.elements,
        records_surviving,
        kind,
        total_sweeps,
    };
    let _ = LAST_SWEEP.try_with(|m| m.set(metrics));

    GLOBAL_METRICS.record(kind, stats, duration);
}

/// Process-level cumulative sweep statistics across all threads.
#[derive(Debug)]
pub struct GlobalMetrics {
    sweeps: AtomicUsize,
    shutdown_sweeps: AtomicUsize,
    records_reclaimed: AtomicUsize,
    elements_reclaimed: AtomicUsize,
    sweep_ns: AtomicU64,
}

impl Default for GlobalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalMetrics {
    /// Create a new `GlobalMetrics` with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sweeps: AtomicUsize::new(0),
            shutdown_sweeps: AtomicUsize::new(0),
            records_reclaimed: AtomicUsize::new(0),
            elements_reclaimed: AtomicUsize::new(0),
            sweep_ns: AtomicU64::new(0),
        }
    }

    fn record(&self, kind: SweepKind, stats: ReclaimStats, duration: Duration) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        if kind == SweepKind::Shutdown {
            self.shutdown_sweeps.fetch_add(1, Ordering::Relaxed);
        }
        self.records_reclaimed
            .fetch_add(stats.records, Ordering::Relaxed);
        self.elements_reclaimed
            .fetch_add(stats.elements, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        self.sweep_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Total sweeps run since process start.
    #[inline]
    #[must_use]
    pub fn total_sweeps(&self) -> usize {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Total forced shutdown sweeps.
    #[inline]
    #[must_use]
    pub fn total_shutdown_sweeps(&self) -> usize {
        self.shutdown_sweeps.load(Ordering::Relaxed)
    }

    /// Total allocations freed.
    #[inline]
    #[must_use]
    pub fn total_records_reclaimed(&self) -> usize {
        self.records_reclaimed.load(Ordering::Relaxed)
    }

    /// Total elements dropped.
    #[inline]
    #[must_use]
    pub fn total_elements_reclaimed(&self) -> usize {
        self.elements_reclaimed.load(Ordering::Relaxed)
    }

    /// Total time spent sweeping, in nanoseconds.
    #[inline]
    #[must_use]
    pub fn total_sweep_ns(&self) -> u64 {
        self.sweep_ns.load(Ordering::Relaxed)
    }
}

static GLOBAL_METRICS: GlobalMetrics = GlobalMetrics::new();

/// Get the process-wide cumulative sweep metrics.
#[must_use]
pub fn global_metrics() -> &'static GlobalMetrics {
    &GLOBAL_METRICS
}
