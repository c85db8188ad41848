//! The `TrackedHandle<T, N>` smart pointer.
//!
//! This module provides the user-facing handle. Every handle holds one
//! reference to an allocation tracked by the registry of its `(T, N)`
//! instantiation; the allocation is freed by the sweep that follows the
//! release of its last reference.

#![allow(clippy::ptr_as_ptr, clippy::ptr_cast_constness)]

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::{Deref, Index};

use crate::context::{self, with_registry};
use crate::error::TrackError;
use crate::iter::Iter;
use crate::metrics::SweepKind;
use crate::record::{AllocationRecord, ArrayMeta};
use crate::tracing::internal::{log_lookup_miss, log_release, log_retain};

/// A reference-counted handle to a manually allocated `T` or `[T]`.
///
/// `TrackedHandle` behaves like the raw pointer it wraps: it dereferences to
/// the first element, indexes into arrays and converts back to `*const T`.
/// Handles of the same `(T, N)` instantiation share one registry; cloning a
/// handle adds a reference, dropping or reassigning one releases it and
/// immediately sweeps the registry, freeing every allocation no handle
/// references anymore.
///
/// `N` is a type-level tag. Handles with different tags use different
/// registries; the tag never sets the runtime array size.
///
/// Cycles of handles are never reclaimed before thread teardown.
///
/// Zero-sized types are rejected: all their allocations share one dangling
/// address, so the registry could not tell them apart.
///
/// # Thread Safety
///
/// `TrackedHandle` is `!Send` and `!Sync`. Each thread has its own registries.
///
/// # Examples
///
/// ```
/// use gcptr::TrackedHandle;
///
/// let h1: TrackedHandle<i32> = TrackedHandle::new(5);
/// let h2 = h1.clone();
/// assert_eq!(TrackedHandle::ref_count(&h1), 2);
/// assert_eq!(*h2, 5);
///
/// drop(h1);
/// assert_eq!(TrackedHandle::ref_count(&h2), 1);
/// ```
pub struct TrackedHandle<T: 'static, const N: usize = 0> {
    /// Mirrors the address of the associated record.
    ptr: *mut T,
    /// Local cache of the record's array metadata.
    meta: ArrayMeta,
    /// Registry epoch the reference was taken in.
    epoch: u64,
    /// Marker making the handle `!Send` and `!Sync`.
    _marker: PhantomData<*const ()>,
}

impl<T: 'static, const N: usize> TrackedHandle<T, N> {
    /// Allocate `value` on the heap and track it.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized. `value` is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use gcptr::TrackedHandle;
    ///
    /// let h: TrackedHandle<String> = TrackedHandle::new(String::from("hi"));
    /// assert_eq!(h.len(), 2);
    /// ```
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    /// Track a boxed value.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    pub fn from_box(value: Box<T>) -> Self {
        Self::reject_zero_sized();
        // SAFETY: the pointer comes straight from `Box::into_raw`.
        unsafe { Self::from_raw(Box::into_raw(value)) }
    }

    /// Track a boxed slice as an array allocation.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    pub fn from_boxed_slice(values: Box<[T]>) -> Self {
        Self::reject_zero_sized();
        let len = values.len();
        let ptr = Box::into_raw(values).cast::<T>();
        // SAFETY: `ptr` is a `Box<[T]>` of `len` elements we just released.
        unsafe { Self::from_raw_array(ptr, len) }
    }

    /// Track the elements of `values` as an array allocation.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    ///
    /// # Examples
    ///
    /// ```
    /// use gcptr::TrackedHandle;
    ///
    /// let arr: TrackedHandle<u32> = TrackedHandle::from_vec(vec![0; 10]);
    /// assert!(TrackedHandle::is_array(&arr));
    /// assert_eq!(TrackedHandle::array_size(&arr), 10);
    /// ```
    pub fn from_vec(values: Vec<T>) -> Self {
        Self::from_boxed_slice(values.into_boxed_slice())
    }

    /// A handle to the null address.
    ///
    /// Null handles are tracked like any other address, but nothing is ever
    /// freed for them.
    #[must_use]
    pub fn null() -> Self {
        // SAFETY: the null address is never freed.
        unsafe { Self::from_raw(std::ptr::null_mut()) }
    }

    /// Wrap a raw scalar allocation.
    ///
    /// If `ptr` is already tracked, the handle shares the existing record and
    /// mirrors its array metadata. Otherwise a scalar record is created.
    ///
    /// # Safety
    ///
    /// `ptr` must be null, already tracked by this handle type's registry, or
    /// come from `Box::<T>::into_raw` with no other owner. The registry frees
    /// it once no handle references it.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized. `ptr` is not freed.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        // SAFETY: forwarded to the caller.
        unsafe { Self::track(ptr, ArrayMeta::SCALAR) }
    }

    /// Wrap a raw array allocation of `len` elements.
    ///
    /// # Safety
    ///
    /// `ptr` must be null, already tracked by this handle type's registry, or
    /// come from `Box::<[T]>::into_raw` of exactly `len` elements (cast to
    /// `*mut T`) with no other owner.
    pub unsafe fn from_raw_array(ptr: *mut T, len: usize) -> Self {
        // SAFETY: forwarded to the caller.
        unsafe { Self::track(ptr, ArrayMeta::array(len)) }
    }

    unsafe fn track(ptr: *mut T, meta: ArrayMeta) -> Self {
        // SAFETY: forwarded to the caller.
        let (meta, epoch) = unsafe { Self::retain_raw(ptr, meta) };
        Self {
            ptr,
            meta,
            epoch,
            _marker: PhantomData,
        }
    }

    fn reject_zero_sized() {
        assert!(
            size_of::<T>() != 0,
            "TrackedHandle does not support zero-sized types"
        );
    }

    /// Take a reference to `ptr`, registering it if needed, and return the
    /// authoritative array metadata with the registry's epoch.
    unsafe fn retain_raw(ptr: *mut T, meta: ArrayMeta) -> (ArrayMeta, u64) {
        Self::reject_zero_sized();
        with_registry::<T, N, _>(|registry| {
            let epoch = registry.epoch();
            // SAFETY: forwarded to the caller.
            let record = unsafe { registry.retain_or_insert(ptr, meta) };
            log_retain(type_name::<T>(), record.address(), record.refcount());
            (record.meta(), epoch)
        })
        .unwrap_or((meta, 0))
    }

    /// Take a reference to the already tracked `ptr`, resyncing the record
    /// to `meta`. The reference being copied must belong to the current
    /// epoch.
    fn retain_tracked(ptr: *mut T, meta: ArrayMeta, epoch: u64) -> Result<(), TrackError> {
        let address = ptr.addr();
        let result = with_registry::<T, N, _>(|registry| -> Result<usize, TrackError> {
            registry.check(ptr, epoch)?;
            registry.retain(ptr, meta)
        })
        .unwrap_or(Err(TrackError::LookupMiss { address }));
        match result {
            Ok(refcount) => {
                log_retain(type_name::<T>(), address, refcount);
                Ok(())
            }
            Err(err) => {
                log_lookup_miss(type_name::<T>(), address);
                Err(err)
            }
        }
    }

    /// Release this handle's reference and sweep.
    fn release(&self) {
        let address = self.ptr.addr();
        let released = with_registry::<T, N, _>(|registry| -> Result<usize, TrackError> {
            registry.check(self.ptr, self.epoch)?;
            registry.release(self.ptr)
        });
        match released {
            Some(Ok(refcount)) => log_release(type_name::<T>(), address, refcount),
            Some(Err(_)) => log_lookup_miss(type_name::<T>(), address),
            // The thread's registries are already gone.
            None => return,
        }
        context::sweep::<T, N>(SweepKind::Eager);
    }

    /// Copy `handle`, adding a reference to its allocation.
    ///
    /// The copy takes the array metadata of `handle`, and so does the shared
    /// record.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::LookupMiss`] if the allocation is no longer
    /// tracked, which only happens after [`TrackedHandle::shutdown`].
    pub fn try_clone(handle: &Self) -> Result<Self, TrackError> {
        Self::retain_tracked(handle.ptr, handle.meta, handle.epoch)?;
        Ok(Self {
            ptr: handle.ptr,
            meta: handle.meta,
            epoch: handle.epoch,
            _marker: PhantomData,
        })
    }

    /// Point this handle at `other`'s allocation.
    ///
    /// The new target is retained before the old one is released, so
    /// assigning a handle to a copy of itself never frees anything. The old
    /// allocation is freed if this was its last handle.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::LookupMiss`] if `other`'s allocation is no
    /// longer tracked. This handle is left untouched.
    pub fn try_assign(&mut self, other: &Self) -> Result<(), TrackError> {
        let (ptr, meta, epoch) = (other.ptr, other.meta, other.epoch);
        Self::retain_tracked(ptr, meta, epoch)?;
        self.release();
        self.ptr = ptr;
        self.meta = meta;
        self.epoch = epoch;
        Ok(())
    }

    /// Point this handle at `other`'s allocation.
    ///
    /// # Panics
    ///
    /// Panics if `other`'s allocation is no longer tracked.
    pub fn assign(&mut self, other: &Self) {
        if let Err(err) = self.try_assign(other) {
            panic!("{err}");
        }
    }

    /// Rebind this handle to a raw scalar allocation.
    ///
    /// The new address is registered before the old one is released; the
    /// handle mirrors the new record's array metadata.
    ///
    /// # Safety
    ///
    /// Same contract as [`TrackedHandle::from_raw`].
    pub unsafe fn assign_raw(&mut self, ptr: *mut T) {
        // SAFETY: forwarded to the caller.
        let (meta, epoch) = unsafe { Self::retain_raw(ptr, ArrayMeta::SCALAR) };
        self.release();
        self.ptr = ptr;
        self.meta = meta;
        self.epoch = epoch;
    }

    /// Rebind this handle to a freshly boxed value.
    pub fn assign_box(&mut self, value: Box<T>) {
        // SAFETY: the pointer comes straight from `Box::into_raw`.
        unsafe { self.assign_raw(Box::into_raw(value)) }
    }

    /// Check if the handle wraps the null address.
    #[must_use]
    pub fn is_null(handle: &Self) -> bool {
        handle.ptr.is_null()
    }

    /// Whether the allocation is an array.
    #[must_use]
    pub const fn is_array(handle: &Self) -> bool {
        handle.meta.is_array
    }

    /// Element count of an array allocation, 0 for scalars.
    #[must_use]
    pub const fn array_size(handle: &Self) -> usize {
        handle.meta.array_size
    }

    /// Number of elements reachable through the handle: the array size for
    /// arrays, 1 for scalars, 0 for the null handle.
    #[must_use]
    pub fn extent(handle: &Self) -> usize {
        if handle.ptr.is_null() {
            0
        } else {
            handle.meta.extent()
        }
    }

    /// Get the raw pointer. Does not affect the reference count.
    #[must_use]
    pub const fn as_ptr(handle: &Self) -> *mut T {
        handle.ptr
    }

    /// Check if two handles point to the same allocation.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        std::ptr::eq(this.ptr, other.ptr)
    }

    /// Attempt to dereference this handle.
    ///
    /// Returns `None` for the null handle and for empty arrays.
    #[must_use]
    pub fn try_deref(handle: &Self) -> Option<&T> {
        Self::get(handle, 0).ok()
    }

    /// Get the element at `index`, checking it against the allocation.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::NullHandle`] for the null handle and
    /// [`TrackError::IndexOutOfBounds`] past the end of the allocation.
    pub fn get(handle: &Self, index: usize) -> Result<&T, TrackError> {
        if handle.ptr.is_null() {
            return Err(TrackError::NullHandle);
        }
        let extent = handle.meta.extent();
        if index >= extent {
            return Err(TrackError::IndexOutOfBounds { index, extent });
        }
        // SAFETY: the handle holds a reference, so the allocation is live, and
        // `index` is inside it.
        Ok(unsafe { &*handle.ptr.add(index) })
    }

    /// Get the element at `index` without any check.
    ///
    /// # Safety
    ///
    /// The handle must not be null and `index` must be below
    /// [`TrackedHandle::extent`].
    #[must_use]
    pub unsafe fn get_unchecked(handle: &Self, index: usize) -> &T {
        // SAFETY: forwarded to the caller.
        unsafe { &*handle.ptr.add(index) }
    }

    /// Cursor at the first element of the allocation.
    ///
    /// A scalar allocation is a one-element range.
    #[must_use]
    pub fn begin(&self) -> Iter<'_, T> {
        Iter::from_parts(self.ptr, Self::extent(self), 0)
    }

    /// Cursor one past the last element of the allocation.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn end(&self) -> Iter<'_, T> {
        let extent = Self::extent(self);
        Iter::from_parts(self.ptr, extent, extent as isize)
    }

    /// Iterate over the elements of the allocation.
    pub fn iter(&self) -> Iter<'_, T> {
        self.begin()
    }

    /// The record tracking this handle's allocation.
    ///
    /// Returns `None` once the allocation was freed by a shutdown sweep.
    #[must_use]
    pub fn record(handle: &Self) -> Option<AllocationRecord> {
        with_registry::<T, N, _>(|registry| registry.check(handle.ptr, handle.epoch).ok().copied())
            .flatten()
    }

    /// Number of live handles sharing this handle's allocation.
    ///
    /// Returns 0 if the allocation is no longer tracked.
    #[must_use]
    pub fn ref_count(handle: &Self) -> usize {
        Self::record(handle).map_or(0, |record| record.refcount())
    }

    /// Free every allocation of this handle type that no handle references.
    ///
    /// Returns `true` if at least one allocation was freed. Every handle drop
    /// already runs the same sweep.
    pub fn collect() -> bool {
        context::sweep::<T, N>(SweepKind::Explicit)
    }

    /// Free every allocation of this handle type, referenced or not.
    ///
    /// Runs automatically at process exit.
    ///
    /// # Safety
    ///
    /// Live handles of this type are left dangling: none of them may be
    /// dereferenced or iterated afterwards. The registry starts a new epoch,
    /// so cloning or assigning from them reports [`TrackError::LookupMiss`]
    /// and dropping them frees nothing, even when a later allocation reuses
    /// their address.
    pub unsafe fn shutdown() -> bool {
        context::sweep::<T, N>(SweepKind::Shutdown)
    }

    /// Number of allocations tracked for this handle type on this thread.
    #[must_use]
    pub fn registry_len() -> usize {
        with_registry::<T, N, _>(|registry| registry.len()).unwrap_or(0)
    }

    /// Snapshot of the records tracked for this handle type, in insertion
    /// order.
    #[must_use]
    pub fn records() -> Vec<AllocationRecord> {
        with_registry::<T, N, _>(|registry| registry.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Human-readable listing of this handle type's registry.
    #[must_use]
    pub fn show_list() -> String {
        let body = with_registry::<T, N, _>(|registry| registry.to_string()).unwrap_or_default();
        format!("registry<{}, {}>:\n{}", type_name::<T>(), N, body)
    }
}

impl<T: 'static + fmt::Debug, const N: usize> TrackedHandle<T, N> {
    /// Like [`TrackedHandle::show_list`], with the value of every
    /// allocation.
    ///
    /// The `Debug` impl of `T` must not access handle registries of type
    /// `TrackedHandle<T, N>`.
    ///
    /// # Examples
    ///
    /// ```
    /// use gcptr::TrackedHandle;
    ///
    /// let arr: TrackedHandle<u8, 41> = TrackedHandle::from_vec(vec![1, 2]);
    /// assert!(TrackedHandle::<u8, 41>::show_values().contains("array[2]  [1, 2]"));
    /// ```
    #[must_use]
    pub fn show_values() -> String {
        let body = with_registry::<T, N, _>(|registry| registry.with_values().to_string())
            .unwrap_or_default();
        format!("registry<{}, {}>:\n{}", type_name::<T>(), N, body)
    }
}

impl<T: 'static, const N: usize> Clone for TrackedHandle<T, N> {
    /// # Panics
    ///
    /// Panics if the allocation is no longer tracked; see
    /// [`TrackedHandle::try_clone`].
    fn clone(&self) -> Self {
        match Self::try_clone(self) {
            Ok(handle) => handle,
            Err(err) => panic!("{err}"),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign(source);
    }
}

impl<T: 'static, const N: usize> Drop for TrackedHandle<T, N> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: 'static, const N: usize> Deref for TrackedHandle<T, N> {
    type Target = T;

    /// # Panics
    ///
    /// Panics for the null handle and for empty arrays.
    fn deref(&self) -> &Self::Target {
        match Self::get(self, 0) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<T: 'static, const N: usize> Index<usize> for TrackedHandle<T, N> {
    type Output = T;

    /// # Panics
    ///
    /// Panics for the null handle and when `index` is past the end of the
    /// allocation.
    fn index(&self, index: usize) -> &Self::Output {
        match Self::get(self, index) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<'a, T: 'static, const N: usize> IntoIterator for &'a TrackedHandle<T, N> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.begin()
    }
}

impl<T: 'static, const N: usize> Default for TrackedHandle<T, N> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: 'static, const N: usize> From<T> for TrackedHandle<T, N> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: 'static, const N: usize> From<Box<T>> for TrackedHandle<T, N> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: 'static, const N: usize> From<Box<[T]>> for TrackedHandle<T, N> {
    fn from(values: Box<[T]>) -> Self {
        Self::from_boxed_slice(values)
    }
}

impl<T: 'static, const N: usize> From<Vec<T>> for TrackedHandle<T, N> {
    fn from(values: Vec<T>) -> Self {
        Self::from_vec(values)
    }
}

impl<T: 'static, const N: usize> From<&TrackedHandle<T, N>> for *const T {
    fn from(handle: &TrackedHandle<T, N>) -> Self {
        handle.ptr
    }
}

impl<T: 'static + fmt::Debug, const N: usize> fmt::Debug for TrackedHandle<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ptr.is_null() {
            return write!(f, "TrackedHandle(<null>)");
        }
        if self.meta.is_array {
            f.debug_tuple("TrackedHandle")
                .field(&self.iter().collect::<Vec<_>>())
                .finish()
        } else {
            f.debug_tuple("TrackedHandle").field(&&**self).finish()
        }
    }
}

impl<T: 'static, const N: usize> fmt::Pointer for TrackedHandle<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.ptr, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_construction_over_array_record_mirrors_metadata() {
        let arr: TrackedHandle<u8, 100> = TrackedHandle::from_vec(vec![1, 2, 3]);
        let alias: TrackedHandle<u8, 100> = unsafe { TrackedHandle::from_raw(TrackedHandle::as_ptr(&arr)) };

        assert!(TrackedHandle::is_array(&alias));
        assert_eq!(TrackedHandle::array_size(&alias), 3);
        assert_eq!(TrackedHandle::ref_count(&arr), 2);

        let copy = alias.clone();
        let record = TrackedHandle::record(&copy).unwrap();
        assert!(record.is_array());
        assert_eq!(record.array_size(), 3);
    }

    #[test]
    fn test_release_of_untracked_handle_frees_nothing() {
        let h: TrackedHandle<u8, 101> = TrackedHandle::new(9);
        unsafe { TrackedHandle::<u8, 101>::shutdown() };
        assert_eq!(TrackedHandle::<u8, 101>::registry_len(), 0);
        assert!(TrackedHandle::try_clone(&h).is_err());
        // Dropping the dangling handle must not free again.
        drop(h);
        assert_eq!(TrackedHandle::<u8, 101>::registry_len(), 0);
    }

    #[test]
    fn test_extent() {
        let scalar: TrackedHandle<u8, 102> = TrackedHandle::new(1);
        let array: TrackedHandle<u8, 102> = TrackedHandle::from_vec(vec![1, 2]);
        let empty: TrackedHandle<u8, 102> = TrackedHandle::from_vec(Vec::new());
        let null: TrackedHandle<u8, 102> = TrackedHandle::null();

        assert_eq!(TrackedHandle::extent(&scalar), 1);
        assert_eq!(TrackedHandle::extent(&array), 2);
        assert_eq!(TrackedHandle::extent(&empty), 0);
        assert_eq!(TrackedHandle::extent(&null), 0);
        assert!(TrackedHandle::try_deref(&empty).is_none());
        assert!(TrackedHandle::try_deref(&null).is_none());
    }
}
