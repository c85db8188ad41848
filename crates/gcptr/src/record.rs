//! Registry entries describing a single tracked allocation.

#![allow(clippy::ptr_as_ptr)]

use std::fmt;

/// Array metadata for a tracked allocation.
///
/// A scalar allocation has an extent of one element. An array allocation
/// may be empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ArrayMeta {
    /// Whether the allocation was made as an array (`Box<[T]>`).
    pub is_array: bool,
    /// Element count when `is_array`, otherwise 0.
    pub array_size: usize,
}

impl ArrayMeta {
    /// Metadata of a single-object allocation.
    pub const SCALAR: Self = Self {
        is_array: false,
        array_size: 0,
    };

    /// Metadata of an array allocation holding `len` elements.
    #[must_use]
    pub const fn array(len: usize) -> Self {
        Self {
            is_array: true,
            array_size: len,
        }
    }

    /// Number of elements addressable through the allocation.
    #[must_use]
    pub const fn extent(self) -> usize {
        if self.is_array {
            self.array_size
        } else {
            1
        }
    }
}

/// One tracked allocation: its address, live handle count and array-ness.
///
/// Two records are equal when they track the same address, whatever their
/// counts or metadata.
#[derive(Clone, Copy)]
pub struct AllocationRecord {
    /// Never reassigned once the record exists.
    ptr: *mut (),
    refcount: usize,
    meta: ArrayMeta,
}

impl AllocationRecord {
    /// Create a record for `ptr` with a reference count of one.
    #[must_use]
    pub const fn new(ptr: *mut (), meta: ArrayMeta) -> Self {
        Self {
            ptr,
            refcount: 1,
            meta,
        }
    }

    /// Create a record for a single-object allocation.
    #[must_use]
    pub const fn scalar(ptr: *mut ()) -> Self {
        Self::new(ptr, ArrayMeta::SCALAR)
    }

    /// Create a record for an array allocation of `len` elements.
    #[must_use]
    pub const fn array(ptr: *mut (), len: usize) -> Self {
        Self::new(ptr, ArrayMeta::array(len))
    }

    /// The tracked address as an opaque integer.
    #[must_use]
    pub fn address(&self) -> usize {
        self.ptr.addr()
    }

    /// The tracked address.
    #[must_use]
    pub const fn as_ptr(&self) -> *mut () {
        self.ptr
    }

    /// Number of live handles referencing the allocation.
    #[must_use]
    pub const fn refcount(&self) -> usize {
        self.refcount
    }

    /// Whether the allocation is an array.
    #[must_use]
    pub const fn is_array(&self) -> bool {
        self.meta.is_array
    }

    /// Element count of an array allocation, 0 for scalars.
    #[must_use]
    pub const fn array_size(&self) -> usize {
        self.meta.array_size
    }

    /// Array metadata of the allocation.
    #[must_use]
    pub const fn meta(&self) -> ArrayMeta {
        self.meta
    }

    pub(crate) const fn set_meta(&mut self, meta: ArrayMeta) {
        self.meta = meta;
    }

    pub(crate) const fn set_refcount(&mut self, refcount: usize) {
        self.refcount = refcount;
    }

    /// Increment the count, saturating at `usize::MAX`.
    pub(crate) const fn inc_ref(&mut self) -> usize {
        self.refcount = self.refcount.saturating_add(1);
        self.refcount
    }

    /// Decrement the count if it is not already zero.
    pub(crate) const fn dec_ref(&mut self) -> usize {
        if self.refcount > 0 {
            self.refcount -= 1;
        }
        self.refcount
    }

    /// Drop the tracked value(s) and release the memory.
    ///
    /// Arrays are released as `Box<[T]>` of `array_size` elements, scalars
    /// as `Box<T>`. A null address is skipped.
    ///
    /// # Safety
    ///
    /// The address must come from `Box::<T>::into_raw` (scalar) or from
    /// `Box::<[T]>::into_raw` with exactly `array_size` elements (array),
    /// and must not have been freed already.
    pub(crate) unsafe fn free<T>(&self) {
        if self.ptr.is_null() {
            return;
        }
        let ptr = self.ptr as *mut T;
        if self.meta.is_array {
            let slice = std::ptr::slice_from_raw_parts_mut(ptr, self.meta.array_size);
            // SAFETY: caller guarantees the allocation is a live `Box<[T]>` of this length.
            drop(unsafe { Box::from_raw(slice) });
        } else {
            // SAFETY: caller guarantees the allocation is a live `Box<T>`.
            drop(unsafe { Box::from_raw(ptr) });
        }
    }
}

impl PartialEq for AllocationRecord {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.ptr, other.ptr)
    }
}

impl Eq for AllocationRecord {}

impl fmt::Debug for AllocationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationRecord")
            .field("address", &self.ptr)
            .field("refcount", &self.refcount)
            .field("is_array", &self.meta.is_array)
            .field("array_size", &self.meta.array_size)
            .finish()
    }
}

impl fmt::Display for AllocationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ptr.is_null() {
            write!(f, "[null] {}  ---", self.refcount)
        } else if self.meta.is_array {
            write!(
                f,
                "[{:p}] {}  array[{}]",
                self.ptr, self.refcount, self.meta.array_size
            )
        } else {
            write!(f, "[{:p}] {}  scalar", self.ptr, self.refcount)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_starts_at_one() {
        let record = AllocationRecord::scalar(std::ptr::null_mut());
        assert_eq!(record.refcount(), 1);
        assert!(!record.is_array());
        assert_eq!(record.array_size(), 0);
    }

    #[test]
    fn test_equality_is_by_address_only() {
        let value = Box::into_raw(Box::new(7u32)).cast::<()>();
        let mut a = AllocationRecord::scalar(value);
        let b = AllocationRecord::array(value, 4);
        a.inc_ref();
        assert_eq!(a, b);

        let other = Box::into_raw(Box::new(7u32)).cast::<()>();
        assert_ne!(a, AllocationRecord::scalar(other));

        unsafe {
            AllocationRecord::scalar(value).free::<u32>();
            AllocationRecord::scalar(other).free::<u32>();
        }
    }

    #[test]
    fn test_dec_ref_stops_at_zero() {
        let mut record = AllocationRecord::scalar(std::ptr::null_mut());
        assert_eq!(record.dec_ref(), 0);
        assert_eq!(record.dec_ref(), 0);
        assert_eq!(record.inc_ref(), 1);
    }

    #[test]
    fn test_extent() {
        assert_eq!(ArrayMeta::SCALAR.extent(), 1);
        assert_eq!(ArrayMeta::array(10).extent(), 10);
        assert_eq!(ArrayMeta::array(0).extent(), 0);
    }

    #[test]
    fn test_free_null_is_noop() {
        unsafe { AllocationRecord::scalar(std::ptr::null_mut()).free::<String>() };
    }
}
