//! Reference-counted tracking pointers for manual allocations.
//!
//! `gcptr` provides [`TrackedHandle<T, N>`], a smart pointer that wraps a
//! heap allocation (a single `T` or a `[T]`) and frees it as soon as no
//! handle refers to it anymore. It emulates garbage collection on top of
//! plain reference counting:
//!
//! - every `(T, N)` instantiation owns a [`Registry`] of
//!   [`AllocationRecord`]s, one per tracked address;
//! - constructing or cloning a handle takes a reference on the record;
//! - dropping or reassigning a handle releases it and **immediately sweeps**
//!   the registry, freeing every allocation whose count reached zero;
//! - at process exit a one-time hook frees whatever is still tracked.
//!
//! # Quick Start
//!
//! ```
//! use gcptr::TrackedHandle;
//!
//! let h1: TrackedHandle<i32> = TrackedHandle::new(5);
//! assert_eq!(TrackedHandle::<i32>::registry_len(), 1);
//!
//! let h2 = h1.clone();
//! assert_eq!(TrackedHandle::ref_count(&h2), 2);
//!
//! drop(h1);
//! drop(h2); // last reference: freed here
//! assert_eq!(TrackedHandle::<i32>::registry_len(), 0);
//! ```
//!
//! # Arrays
//!
//! ```
//! use gcptr::TrackedHandle;
//!
//! let arr: TrackedHandle<u64> = TrackedHandle::from_vec((0..10).collect());
//! assert_eq!(arr[9], 9);
//! assert_eq!(arr.iter().sum::<u64>(), 45);
//! ```
//!
//! # Limitations
//!
//! - Cycles of handles are never reclaimed before teardown.
//! - Each sweep scans the whole registry; lookups are linear.
//! - Handles are `!Send` and `!Sync`; each thread has its own registries.
//! - Zero-sized types are rejected at construction.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod context;
mod error;
mod handle;
mod iter;
mod metrics;
mod record;
mod registry;
mod tracing;

// Re-export public API
pub use error::TrackError;
pub use handle::TrackedHandle;
pub use iter::Iter;
pub use metrics::{
    global_metrics, last_sweep_metrics, GlobalMetrics, ReclaimStats, SweepKind, SweepMetrics,
};
pub use record::{AllocationRecord, ArrayMeta};
pub use registry::{Garbage, Registry, ValueListing};

/// Free every allocation tracked on the current thread, for all handle types.
///
/// This is what the process-exit hook runs on the exiting thread.
///
/// # Safety
///
/// Every live handle on this thread is left dangling: none of them may be
/// dereferenced or iterated afterwards. Dropping, cloning or assigning from
/// them never touches an allocation made after the shutdown, even at a
/// reused address.
pub unsafe fn shutdown_thread() -> ReclaimStats {
    context::shutdown_current_thread()
}

#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub mod test_util {
    /// Whether the process-exit hook has been registered.
    #[must_use]
    pub fn exit_hook_registered() -> bool {
        crate::context::exit_hook_registered()
    }

    /// Run the exit hook's work on the current thread, as `atexit` would.
    ///
    /// # Safety
    ///
    /// Same contract as [`crate::shutdown_thread`].
    pub unsafe fn run_exit_hook() -> crate::ReclaimStats {
        crate::context::shutdown_current_thread()
    }
}
