//! The allocation registry.
//!
//! A `Registry<T>` is an insertion-ordered list of [`AllocationRecord`]s.
//! Lookups are linear scans by address. The registry owns every allocation
//! it tracks: a record whose count reaches zero is freed by the next sweep,
//! and dropping the registry frees whatever it still tracks.

#![allow(clippy::ptr_as_ptr, clippy::ptr_cast_constness)]

use std::fmt;
use std::marker::PhantomData;

use crate::error::TrackError;
use crate::metrics::ReclaimStats;
use crate::record::{AllocationRecord, ArrayMeta};

/// Tracks the allocations referenced by handles of one element type.
///
/// # Examples
///
/// ```
/// use gcptr::{ArrayMeta, Registry};
///
/// let mut registry = Registry::<String>::new();
/// let ptr = Box::into_raw(Box::new(String::from("tracked")));
///
/// // SAFETY: `ptr` comes from `Box::into_raw` and is owned by nobody else.
/// unsafe { registry.retain_or_insert(ptr, ArrayMeta::SCALAR) };
/// assert_eq!(registry.find(ptr).map(|r| r.refcount()), Some(1));
///
/// assert_eq!(registry.release(ptr), Ok(0));
/// assert!(registry.sweep());
/// assert!(registry.is_empty());
/// ```
pub struct Registry<T> {
    records: Vec<AllocationRecord>,
    /// Bumped whenever outstanding references are invalidated.
    epoch: u64,
    /// The registry drops `T` values when it frees allocations.
    _marker: PhantomData<T>,
}

impl<T> Registry<T> {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
            epoch: 0,
            _marker: PhantomData,
        }
    }

    /// Current epoch of the registry.
    ///
    /// A reference taken in an earlier epoch was invalidated by a shutdown
    /// sweep. Its address may since have been reused by a new allocation,
    /// so it must never be released against the current records.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Check that a reference to `ptr` taken at `epoch` is still valid.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::LookupMiss`] if the epoch is stale or `ptr` is
    /// not tracked.
    pub fn check(&self, ptr: *const T, epoch: u64) -> Result<&AllocationRecord, TrackError> {
        let miss = TrackError::LookupMiss {
            address: ptr.addr(),
        };
        if epoch != self.epoch {
            return Err(miss);
        }
        self.find(ptr).ok_or(miss)
    }

    /// Number of tracked allocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no allocation is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over the records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &AllocationRecord> + '_ {
        self.records.iter()
    }

    /// Find the record tracking `ptr`.
    #[must_use]
    pub fn find(&self, ptr: *const T) -> Option<&AllocationRecord> {
        let ptr = ptr as *const ();
        self.records
            .iter()
            .find(|record| std::ptr::eq(record.as_ptr(), ptr))
    }

    /// Find the record tracking `ptr`, mutably.
    pub fn find_mut(&mut self, ptr: *const T) -> Option<&mut AllocationRecord> {
        let ptr = ptr as *const ();
        self.records
            .iter_mut()
            .find(|record| std::ptr::eq(record.as_ptr(), ptr))
    }

    /// Check if `ptr` is tracked.
    #[must_use]
    pub fn contains(&self, ptr: *const T) -> bool {
        self.find(ptr).is_some()
    }

    /// Take a reference to `ptr`, registering it if it is not tracked yet.
    ///
    /// A new record starts with a count of one and carries `meta`. An
    /// existing record is incremented and keeps its own metadata. Returns
    /// the record after the update.
    ///
    /// # Safety
    ///
    /// If `ptr` is not tracked yet and is non-null, it must come from
    /// `Box::<T>::into_raw` (when `meta` is scalar) or from
    /// `Box::<[T]>::into_raw` with `meta.array_size` elements (when `meta` is
    /// an array), and nothing else may free it. The registry takes ownership.
    pub unsafe fn retain_or_insert(&mut self, ptr: *mut T, meta: ArrayMeta) -> &AllocationRecord {
        let pos = self
            .records
            .iter()
            .position(|record| std::ptr::eq(record.as_ptr(), ptr as *const ()));
        let pos = if let Some(pos) = pos {
            self.records[pos].inc_ref();
            pos
        } else {
            self.records.push(AllocationRecord::new(ptr as *mut (), meta));
            self.records.len() - 1
        };
        &self.records[pos]
    }

    /// Take another reference to an already tracked `ptr`.
    ///
    /// The record's metadata is overwritten with `meta`, which resyncs it with
    /// the handle being copied.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::LookupMiss`] if `ptr` is not tracked.
    pub fn retain(&mut self, ptr: *const T, meta: ArrayMeta) -> Result<usize, TrackError> {
        let record = self.find_mut(ptr).ok_or(TrackError::LookupMiss {
            address: ptr.addr(),
        })?;
        record.set_meta(meta);
        Ok(record.inc_ref())
    }

    /// Drop one reference to `ptr`. The count never goes below zero.
    ///
    /// Returns the remaining count. Nothing is freed until the next sweep.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::LookupMiss`] if `ptr` is not tracked.
    pub fn release(&mut self, ptr: *const T) -> Result<usize, TrackError> {
        self.find_mut(ptr)
            .map(AllocationRecord::dec_ref)
            .ok_or(TrackError::LookupMiss {
                address: ptr.addr(),
            })
    }

    /// Remove every record whose count is zero, without freeing anything yet.
    ///
    /// The returned [`Garbage`] frees the allocations when reclaimed or
    /// dropped. Splitting removal from freeing lets a caller release its
    /// borrow of the registry before user `Drop` code runs. Surviving
    /// records keep their relative order.
    #[must_use = "dropping the garbage frees it immediately"]
    pub fn take_unreferenced(&mut self) -> Garbage<T> {
        if !self.records.iter().any(|record| record.refcount() == 0) {
            return Garbage::empty();
        }
        let (dead, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|record| record.refcount() == 0);
        self.records = live;
        Garbage {
            records: dead,
            _marker: PhantomData,
        }
    }

    /// Force every count to zero, so the next sweep frees everything.
    ///
    /// Starts a new epoch: references taken before this call are no longer
    /// valid.
    pub fn force_unreferenced(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        for record in &mut self.records {
            record.set_refcount(0);
        }
    }

    /// Free and remove every allocation no handle references.
    ///
    /// Returns `true` if at least one allocation was freed. Running it again
    /// with no zero-count record is a no-op returning `false`.
    pub fn sweep(&mut self) -> bool {
        self.take_unreferenced().reclaim().records > 0
    }

    /// Free everything regardless of outstanding references.
    ///
    /// Handles still pointing into this registry are left dangling. They
    /// belong to the previous epoch, so they never match a record created
    /// afterwards, even at a reused address.
    pub fn shutdown_sweep(&mut self) -> bool {
        self.force_unreferenced();
        self.sweep()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Registry<T> {
    fn drop(&mut self) {
        self.shutdown_sweep();
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.records.iter()).finish()
    }
}

/// Human-readable listing of the registry, one record per line.
impl<T> fmt::Display for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "address refcount kind")?;
        if self.records.is_empty() {
            return writeln!(f, "  registry is empty");
        }
        for record in &self.records {
            writeln!(f, "  {record}")?;
        }
        Ok(())
    }
}

impl<T> Registry<T> {
    /// Listing that also prints the tracked values.
    ///
    /// ```
    /// use gcptr::{ArrayMeta, Registry};
    ///
    /// let mut registry = Registry::<u32>::new();
    /// let ptr = Box::into_raw(Box::new(41u32));
    /// unsafe { registry.retain_or_insert(ptr, ArrayMeta::SCALAR) };
    /// assert!(registry.with_values().to_string().contains("scalar  41"));
    /// ```
    #[must_use]
    pub const fn with_values(&self) -> ValueListing<'_, T> {
        ValueListing { registry: self }
    }
}

/// Registry listing with the value of every allocation, see
/// [`Registry::with_values`].
///
/// The `Debug` impl of `T` must not access handle registries.
pub struct ValueListing<'a, T> {
    registry: &'a Registry<T>,
}

impl<T: fmt::Debug> fmt::Display for ValueListing<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "address refcount kind value")?;
        if self.registry.is_empty() {
            return writeln!(f, "  registry is empty");
        }
        for record in self.registry.iter() {
            let ptr = record.as_ptr() as *const T;
            if ptr.is_null() {
                writeln!(f, "  {record}")?;
            } else if record.is_array() {
                // SAFETY: the registry owns every allocation it tracks until
                // it is swept, and an array record spans `array_size` elements.
                let values = unsafe { std::slice::from_raw_parts(ptr, record.array_size()) };
                writeln!(f, "  {record}  {values:?}")?;
            } else {
                // SAFETY: as above, for a single value.
                let value = unsafe { &*ptr };
                writeln!(f, "  {record}  {value:?}")?;
            }
        }
        Ok(())
    }
}

/// Records removed from a registry whose allocations still have to be freed.
///
/// Freeing happens in [`Garbage::reclaim`], or on drop.
pub struct Garbage<T> {
    records: Vec<AllocationRecord>,
    _marker: PhantomData<T>,
}

impl<T> Garbage<T> {
    const fn empty() -> Self {
        Self {
            records: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Number of allocations awaiting release.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if there is nothing to free.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Free every allocation, in the order the records were registered.
    pub fn reclaim(mut self) -> ReclaimStats {
        self.free_all()
    }

    fn free_all(&mut self) -> ReclaimStats {
        let mut stats = ReclaimStats::default();
        for record in std::mem::take(&mut self.records) {
            // SAFETY: records only enter a registry through `retain_or_insert`,
            // whose contract makes the registry the sole owner of the allocation.
            // A record leaves the registry exactly once, here.
            unsafe { record.free::<T>() };
            stats.merge(ReclaimStats {
                records: 1,
                arrays: usize::from(record.is_array()),
                elements: if record.as_ptr().is_null() {
                    0
                } else {
                    record.meta().extent()
                },
            });
        }
        stats
    }
}

impl<T> Drop for Garbage<T> {
    fn drop(&mut self) {
        self.free_all();
    }
}
