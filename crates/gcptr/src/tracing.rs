//! Registry tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! tracing spans and events for registration, release and sweeps. Without
//! the feature every hook compiles to nothing.

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    use crate::metrics::{ReclaimStats, SweepKind};

    /// Stable identifier for a sweep.
    ///
    /// Used to correlate the events emitted while one sweep runs. Starts
    /// at 1 and increases monotonically across the process.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SweepId(pub u64);

    static NEXT_SWEEP_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next unique sweep ID.
    pub fn next_sweep_id() -> SweepId {
        SweepId(NEXT_SWEEP_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a span for one sweep of the registry of `type_name`.
    pub fn trace_sweep(kind: SweepKind, type_name: &'static str, id: SweepId) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "gc_sweep",
            kind = ?kind,
            type_name = type_name,
            sweep_id = id.0
        )
        .entered()
    }

    /// Log the outcome of a sweep.
    pub fn log_sweep_end(stats: ReclaimStats, records_surviving: usize) {
        tracing::debug!(
            records_reclaimed = stats.records,
            arrays_reclaimed = stats.arrays,
            elements_reclaimed = stats.elements,
            records_surviving,
            "sweep_end"
        );
    }

    /// Log a handle taking a reference to an allocation.
    pub fn log_retain(type_name: &'static str, address: usize, refcount: usize) {
        tracing::trace!(type_name, address, refcount, "retain");
    }

    /// Log a handle dropping its reference to an allocation.
    pub fn log_release(type_name: &'static str, address: usize, refcount: usize) {
        tracing::trace!(type_name, address, refcount, "release");
    }

    /// Log a release or copy of an address the registry does not track.
    pub fn log_lookup_miss(type_name: &'static str, address: usize) {
        tracing::warn!(type_name, address, "lookup_miss");
    }

    /// Log enrollment of a registry with the exit hook.
    pub fn log_registry_created(type_name: &'static str, tag: usize) {
        tracing::debug!(type_name, tag, "registry_created");
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    use crate::metrics::ReclaimStats;

    /// Stub function when tracing is disabled.
    pub const fn log_sweep_end(_stats: ReclaimStats, _records_surviving: usize) {}

    /// Stub function when tracing is disabled.
    pub const fn log_retain(_type_name: &'static str, _address: usize, _refcount: usize) {}

    /// Stub function when tracing is disabled.
    pub const fn log_release(_type_name: &'static str, _address: usize, _refcount: usize) {}

    /// Stub function when tracing is disabled.
    pub const fn log_lookup_miss(_type_name: &'static str, _address: usize) {}

    /// Stub function when tracing is disabled.
    pub const fn log_registry_created(_type_name: &'static str, _tag: usize) {}
}
