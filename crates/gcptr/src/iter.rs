//! Bounds-checked cursors over a tracked allocation.
//!
//! An [`Iter`] is a position inside `[lower, upper)`. It can move freely in
//! both directions, but only yields elements while inside the range. It is
//! also a regular [`Iterator`] over the elements it has not passed yet.

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;

use crate::error::TrackError;

/// A cursor over the elements of a tracked allocation.
///
/// Created by [`TrackedHandle::begin`](crate::TrackedHandle::begin) and
/// [`TrackedHandle::end`](crate::TrackedHandle::end). Two cursors compare
/// equal when they point at the same position of the same range.
///
/// # Examples
///
/// ```
/// use gcptr::TrackedHandle;
///
/// let h: TrackedHandle<i32, 40> = TrackedHandle::from_vec(vec![1, 2, 3]);
///
/// let mut it = h.begin();
/// let mut sum = 0;
/// while it != h.end() {
///     sum += *it.get().unwrap();
///     it.advance();
/// }
/// assert_eq!(sum, 6);
///
/// assert_eq!(h.iter().rev().copied().collect::<Vec<_>>(), vec![3, 2, 1]);
/// ```
pub struct Iter<'a, T> {
    /// Lower bound.
    base: *const T,
    /// Number of elements in `[lower, upper)`.
    len: usize,
    /// Cursor position, relative to `base`. May leave the range.
    pos: isize,
    /// Exclusive end of the elements not yet yielded from the back.
    back: usize,
    _marker: PhantomData<&'a T>,
}

impl<'a, T> Iter<'a, T> {
    /// Create a cursor at `current` over `[lower, upper)`.
    ///
    /// # Safety
    ///
    /// `lower` and `upper` must bound a live allocation of `T` elements that
    /// outlives `'a`, and `current` must be derived from the same allocation.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or if `upper` is below `lower`.
    pub unsafe fn new(current: *const T, lower: *const T, upper: *const T) -> Self {
        // SAFETY: the caller guarantees all three pointers belong to one allocation.
        let (len, pos) = unsafe { (upper.offset_from(lower), current.offset_from(lower)) };
        let len = usize::try_from(len).expect("upper bound below lower bound");
        Self::from_parts(lower, len, pos)
    }

    pub(crate) const fn from_parts(base: *const T, len: usize, pos: isize) -> Self {
        Self {
            base,
            len,
            pos,
            back: len,
            _marker: PhantomData,
        }
    }

    /// Number of elements between the bounds.
    #[must_use]
    pub const fn extent(&self) -> usize {
        self.len
    }

    /// Position of the cursor relative to the lower bound.
    #[must_use]
    pub const fn offset(&self) -> isize {
        self.pos
    }

    /// Whether the cursor is at or past the upper bound.
    #[must_use]
    pub const fn is_end(&self) -> bool {
        self.pos >= self.len as isize
    }

    const fn in_range(&self, pos: isize) -> bool {
        pos >= 0 && (pos as usize) < self.len
    }

    /// The element under the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::IteratorOutOfRange`] if the cursor is outside
    /// `[lower, upper)`.
    pub fn get(&self) -> Result<&'a T, TrackError> {
        self.at(0)
    }

    /// The element `delta` positions away from the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::IteratorOutOfRange`] if that position is outside
    /// `[lower, upper)`.
    pub fn at(&self, delta: isize) -> Result<&'a T, TrackError> {
        let pos = self.pos.saturating_add(delta);
        if !self.in_range(pos) {
            return Err(TrackError::IteratorOutOfRange {
                offset: pos,
                extent: self.len,
            });
        }
        // SAFETY: `pos` is inside the allocation the cursor was built over,
        // which outlives `'a`.
        Ok(unsafe { &*self.base.add(pos as usize) })
    }

    /// Move one element forward.
    pub const fn advance(&mut self) {
        self.advance_by(1);
    }

    /// Move one element back.
    pub const fn retreat(&mut self) {
        self.retreat_by(1);
    }

    /// Move `n` elements forward.
    pub const fn advance_by(&mut self, n: usize) {
        self.pos = self.pos.saturating_add(n as isize);
    }

    /// Move `n` elements back.
    pub const fn retreat_by(&mut self, n: usize) {
        self.pos = self.pos.saturating_sub(n as isize);
    }

    /// Return to the lower bound and forget everything already yielded.
    pub const fn rewind(&mut self) {
        self.pos = 0;
        self.back = self.len;
    }

    /// Elements still to be yielded by the [`Iterator`] impl.
    const fn remaining(&self) -> usize {
        let front = if self.pos < 0 { 0 } else { self.pos as usize };
        self.back.saturating_sub(front)
    }
}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Iter<'_, T> {}

impl<T> PartialEq for Iter<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.base, other.base) && self.len == other.len && self.pos == other.pos
    }
}

impl<T> Eq for Iter<'_, T> {}

impl<T> fmt::Debug for Iter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("base", &self.base)
            .field("offset", &self.pos)
            .field("extent", &self.len)
            .finish()
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos < 0 {
            self.pos = 0;
        }
        if self.remaining() == 0 {
            return None;
        }
        let item = self.get().ok()?;
        self.advance();
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl<T> DoubleEndedIterator for Iter<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining() == 0 {
            return None;
        }
        self.back -= 1;
        let delta = self.back as isize - self.pos;
        self.at(delta).ok()
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<T> FusedIterator for Iter<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_moves_both_ways() {
        let data = [10, 20, 30];
        let range = data.as_ptr_range();
        let mut it = unsafe { Iter::new(range.start, range.start, range.end) };

        assert_eq!(it.get(), Ok(&10));
        it.advance_by(2);
        assert_eq!(it.get(), Ok(&30));
        it.retreat();
        assert_eq!(it.get(), Ok(&20));
        it.advance_by(2);
        assert!(it.is_end());
        assert_eq!(
            it.get(),
            Err(TrackError::IteratorOutOfRange {
                offset: 3,
                extent: 3
            })
        );
    }

    #[test]
    fn test_below_lower_bound_is_rejected() {
        let data = [1u8, 2];
        let range = data.as_ptr_range();
        let mut it = unsafe { Iter::new(range.start, range.start, range.end) };
        it.retreat();
        assert_eq!(it.offset(), -1);
        assert!(it.get().is_err());
        assert!(!it.is_end());
    }

    #[test]
    fn test_end_cursor_equality() {
        let data = [1u8, 2];
        let range = data.as_ptr_range();
        let mut it = unsafe { Iter::new(range.start, range.start, range.end) };
        let end = unsafe { Iter::new(range.end, range.start, range.end) };
        assert_ne!(it, end);
        it.advance_by(2);
        assert_eq!(it, end);
    }

    #[test]
    fn test_iterator_is_exact_and_double_ended() {
        let data = [1, 2, 3, 4];
        let range = data.as_ptr_range();
        let mut it = unsafe { Iter::new(range.start, range.start, range.end) };
        assert_eq!(it.len(), 4);
        assert_eq!(it.next(), Some(&1));
        assert_eq!(it.next_back(), Some(&4));
        assert_eq!(it.len(), 2);
        assert_eq!(it.collect::<Vec<_>>(), vec![&2, &3]);
    }

    #[test]
    fn test_rewind_restarts() {
        let data = [7, 8];
        let range = data.as_ptr_range();
        let mut it = unsafe { Iter::new(range.start, range.start, range.end) };
        assert_eq!(it.by_ref().count(), 2);
        assert_eq!(it.next(), None);
        it.rewind();
        assert_eq!(it.copied().collect::<Vec<_>>(), vec![7, 8]);
    }

    #[test]
    fn test_empty_range() {
        let data: [u32; 0] = [];
        let range = data.as_ptr_range();
        let mut it = unsafe { Iter::new(range.start, range.start, range.end) };
        assert!(it.is_end());
        assert_eq!(it.next(), None);
        assert_eq!(it.next_back(), None);
    }
}
