//! Thread-local registry set and process teardown.
//!
//! Every `(T, N)` instantiation of [`TrackedHandle`](crate::TrackedHandle)
//! gets its own [`Registry<T>`], created on first use and looked up through
//! [`with_registry`]. Handles are `!Send`, so a thread's registries only ever
//! see that thread's handles.
//!
//! Teardown happens twice over, whichever comes first:
//! - a one-time `atexit` hook runs the shutdown sweep of every registry on
//!   the exiting thread;
//! - dropping the set (thread-local destruction) drops each registry, which
//!   frees whatever it still tracks.
//!
//! A shutdown sweep starts a new registry epoch. Handles from the previous
//! epoch never match a record again, even when the allocator reuses their
//! address.

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Once;
use std::time::Instant;

use crate::metrics::{record_sweep, ReclaimStats, SweepKind};
use crate::registry::{Garbage, Registry};
use crate::tracing::internal::{log_registry_created, log_sweep_end};

/// Registry identity: element type plus the handle's array-size tag.
type RegistryKey = (TypeId, usize);

/// A type-erased registry, as stored in the [`RegistrySet`].
trait ErasedRegistry {
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Zero every count and hand back everything the registry tracks.
    fn take_all(&mut self) -> Box<dyn Reclaim>;
}

impl<T: 'static> ErasedRegistry for Registry<T> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn take_all(&mut self) -> Box<dyn Reclaim> {
        self.force_unreferenced();
        Box::new(self.take_unreferenced())
    }
}

/// Type-erased [`Garbage`].
trait Reclaim {
    fn reclaim(self: Box<Self>) -> ReclaimStats;
}

impl<T> Reclaim for Garbage<T> {
    fn reclaim(self: Box<Self>) -> ReclaimStats {
        (*self).reclaim()
    }
}

/// All registries of the current thread.
#[derive(Default)]
pub struct RegistrySet {
    registries: HashMap<RegistryKey, Box<dyn ErasedRegistry>>,
}

impl RegistrySet {
    fn get_or_create<T: 'static, const N: usize>(&mut self) -> &mut Registry<T> {
        self.registries
            .entry((TypeId::of::<T>(), N))
            .or_insert_with(|| {
                register_exit_hook();
                log_registry_created(type_name::<T>(), N);
                Box::new(Registry::<T>::new())
            })
            .as_any_mut()
            .downcast_mut::<Registry<T>>()
            .expect("registry key encodes the element type")
    }

    fn take_all(&mut self) -> Vec<Box<dyn Reclaim>> {
        self.registries
            .values_mut()
            .map(|registry| registry.take_all())
            .collect()
    }
}

thread_local! {
    static REGISTRIES: RefCell<RegistrySet> = RefCell::new(RegistrySet::default());
}

/// Run `f` against the registry of the `(T, N)` instantiation.
///
/// Returns `None` once the thread's registries have been destroyed. `f` must
/// not run user code that could re-enter the registry set: freeing happens
/// outside, through [`Garbage`].
pub fn with_registry<T: 'static, const N: usize, R>(
    f: impl FnOnce(&mut Registry<T>) -> R,
) -> Option<R> {
    REGISTRIES
        .try_with(|set| f(set.borrow_mut().get_or_create::<T, N>()))
        .ok()
}

/// Free every unreferenced allocation of the `(T, N)` registry.
///
/// Returns `true` if at least one allocation was freed.
pub fn sweep<T: 'static, const N: usize>(kind: SweepKind) -> bool {
    #[cfg(feature = "tracing")]
    let _span = crate::tracing::internal::trace_sweep(
        kind,
        type_name::<T>(),
        crate::tracing::internal::next_sweep_id(),
    );

    let start = Instant::now();
    let Some(garbage) = with_registry::<T, N, _>(|registry| {
        if kind == SweepKind::Shutdown {
            registry.force_unreferenced();
        }
        registry.take_unreferenced()
    }) else {
        return false;
    };
    let stats = garbage.reclaim();
    let surviving = with_registry::<T, N, _>(|registry| registry.len()).unwrap_or(0);

    record_sweep(kind, stats, surviving, start.elapsed());
    log_sweep_end(stats, surviving);
    stats.records > 0
}

/// Run the shutdown sweep of every registry on the current thread.
///
/// Outstanding handles are left dangling. Each registry starts a new epoch,
/// so dropping them afterwards frees nothing.
pub fn shutdown_current_thread() -> ReclaimStats {
    let start = Instant::now();
    let Ok(batches) = REGISTRIES.try_with(|set| set.borrow_mut().take_all()) else {
        return ReclaimStats::default();
    };

    let mut stats = ReclaimStats::default();
    for batch in batches {
        stats.merge(batch.reclaim());
    }
    record_sweep(SweepKind::Shutdown, stats, 0, start.elapsed());
    log_sweep_end(stats, 0);
    stats
}

static EXIT_HOOK: Once = Once::new();

/// Register the process-exit hook, once per process.
pub fn register_exit_hook() {
    EXIT_HOOK.call_once(|| {
        // SAFETY: `run_exit_hook` is an `extern "C"` function that catches
        // every panic before returning to libc.
        let rc = unsafe { libc::atexit(run_exit_hook) };
        debug_assert_eq!(rc, 0, "atexit registration failed");
    });
}

/// Whether the exit hook has been registered.
#[cfg(any(test, feature = "test-util"))]
pub fn exit_hook_registered() -> bool {
    EXIT_HOOK.is_completed()
}

extern "C" fn run_exit_hook() {
    let _ = std::panic::catch_unwind(shutdown_current_thread);
}
