//! Contract violations reported by the registry, handles and iterators.

use thiserror::Error;

/// Errors surfaced by fallible operations on tracked allocations.
///
/// Every variant describes misuse of the tracking protocol rather than a
/// transient condition; none of them are worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackError {
    /// The address is not tracked by the registry it was looked up in.
    #[error("allocation {address:#x} is not tracked by this registry")]
    LookupMiss {
        /// Address that was looked up.
        address: usize,
    },

    /// The handle wraps the null address.
    #[error("handle does not point to an allocation")]
    NullHandle,

    /// Checked element access past the end of the allocation.
    #[error("index {index} out of bounds for allocation of {extent} element(s)")]
    IndexOutOfBounds {
        /// Requested element index.
        index: usize,
        /// Number of elements in the allocation.
        extent: usize,
    },

    /// An iterator was dereferenced outside of its `[lower, upper)` range.
    #[error("iterator position {offset} is outside of [0, {extent})")]
    IteratorOutOfRange {
        /// Element offset of the iterator relative to its lower bound.
        offset: isize,
        /// Number of elements between the iterator's bounds.
        extent: usize,
    },
}
