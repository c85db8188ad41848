//! Iteration over tracked allocations through `begin`/`end` cursors.

use gcptr::{TrackError, TrackedHandle};

#[test]
fn test_begin_end_walk() {
    let arr: TrackedHandle<i64, 1> = TrackedHandle::from_vec(vec![1, 2, 3, 4]);
    let mut it = arr.begin();
    let mut seen = Vec::new();
    while it != arr.end() {
        seen.push(*it.get().unwrap());
        it.advance();
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);
    assert!(it.is_end());
}

#[test]
fn test_walk_backwards_from_end() {
    let arr: TrackedHandle<i64, 2> = TrackedHandle::from_vec(vec![1, 2, 3]);
    let mut it = arr.end();
    let mut seen = Vec::new();
    while it != arr.begin() {
        it.retreat();
        seen.push(*it.get().unwrap());
    }
    assert_eq!(seen, vec![3, 2, 1]);
}

#[test]
fn test_scalar_is_one_element_range() {
    let x: TrackedHandle<i64, 3> = TrackedHandle::new(42);
    assert_eq!(x.begin().extent(), 1);
    assert_eq!(x.iter().copied().collect::<Vec<_>>(), vec![42]);

    let mut it = x.begin();
    it.advance();
    assert_eq!(it, x.end());
    assert_eq!(
        it.get(),
        Err(TrackError::IteratorOutOfRange {
            offset: 1,
            extent: 1
        })
    );
}

#[test]
fn test_for_loop_over_handle() {
    let arr: TrackedHandle<u32, 4> = TrackedHandle::from_vec(vec![2, 4, 6]);
    let mut total = 0;
    for value in &arr {
        total += value;
    }
    assert_eq!(total, 12);
}

#[test]
fn test_iterator_is_restartable() {
    let arr: TrackedHandle<u8, 5> = TrackedHandle::from_vec(vec![1, 2]);
    let mut it = arr.iter();
    assert_eq!(it.next(), Some(&1));
    assert_eq!(it.next(), Some(&2));
    assert_eq!(it.next(), None);
    it.rewind();
    assert_eq!(it.len(), 2);
    assert_eq!(it.rev().copied().collect::<Vec<_>>(), vec![2, 1]);
}

#[test]
fn test_iteration_does_not_change_counts() {
    let arr: TrackedHandle<u8, 6> = TrackedHandle::from_vec(vec![1, 2, 3]);
    let sum: u32 = arr.iter().map(|&v| u32::from(v)).sum();
    assert_eq!(sum, 6);
    assert_eq!(TrackedHandle::ref_count(&arr), 1);
}
