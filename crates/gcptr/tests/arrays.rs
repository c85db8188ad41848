//! Array allocation tests: metadata propagation, indexing and array release.

use gcptr::{last_sweep_metrics, TrackError, TrackedHandle};
use std::cell::Cell;
use std::rc::Rc;

struct DropCounter(Rc<Cell<usize>>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

fn counters(drops: &Rc<Cell<usize>>, n: usize) -> Vec<DropCounter> {
    (0..n).map(|_| DropCounter(Rc::clone(drops))).collect()
}

#[test]
fn test_array_record_metadata() {
    let arr: TrackedHandle<i32, 1> = TrackedHandle::from_vec(vec![0; 10]);
    let record = TrackedHandle::record(&arr).unwrap();
    assert!(record.is_array());
    assert_eq!(record.array_size(), 10);
    assert_eq!(record.refcount(), 1);
}

#[test]
fn test_sole_array_handle_frees_every_element() {
    let drops = Rc::new(Cell::new(0));
    let arr: TrackedHandle<DropCounter, 2> = TrackedHandle::from_vec(counters(&drops, 10));
    assert_eq!(TrackedHandle::<DropCounter, 2>::registry_len(), 1);

    drop(arr);
    assert_eq!(drops.get(), 10);
    assert_eq!(TrackedHandle::<DropCounter, 2>::registry_len(), 0);

    let metrics = last_sweep_metrics();
    assert_eq!(metrics.records_reclaimed, 1);
    assert_eq!(metrics.arrays_reclaimed, 1);
    assert_eq!(metrics.elements_reclaimed, 10);
}

#[test]
fn test_copy_propagates_array_metadata() {
    let drops = Rc::new(Cell::new(0));
    let arr: TrackedHandle<DropCounter, 3> = TrackedHandle::from_vec(counters(&drops, 4));
    let copy = arr.clone();

    assert!(TrackedHandle::is_array(&copy));
    assert_eq!(TrackedHandle::array_size(&copy), 4);
    let record = TrackedHandle::record(&copy).unwrap();
    assert!(record.is_array());
    assert_eq!(record.array_size(), 4);
    assert_eq!(record.refcount(), 2);

    drop(arr);
    assert_eq!(drops.get(), 0);
    drop(copy);
    assert_eq!(drops.get(), 4);
}

#[test]
fn test_raw_array_construction() {
    let raw = Box::into_raw(vec![5u8, 6, 7].into_boxed_slice()).cast::<u8>();
    let arr: TrackedHandle<u8, 4> = unsafe { TrackedHandle::from_raw_array(raw, 3) };
    assert_eq!(arr[2], 7);
    assert_eq!(unsafe { *TrackedHandle::get_unchecked(&arr, 1) }, 6);
}

#[test]
fn test_indexing() {
    let arr: TrackedHandle<u32, 5> = TrackedHandle::from_vec((10..15).collect());
    assert_eq!(arr[0], 10);
    assert_eq!(arr[4], 14);
    assert_eq!(*arr, 10);
    assert_eq!(TrackedHandle::get(&arr, 3), Ok(&13));
    assert_eq!(
        TrackedHandle::get(&arr, 5),
        Err(TrackError::IndexOutOfBounds {
            index: 5,
            extent: 5
        })
    );
}

#[test]
fn test_scalar_is_one_element() {
    let x: TrackedHandle<u32, 6> = TrackedHandle::new(9);
    assert_eq!(x[0], 9);
    assert!(TrackedHandle::get(&x, 1).is_err());
}

#[test]
#[should_panic(expected = "index 3 out of bounds")]
fn test_index_past_end_panics() {
    let arr: TrackedHandle<u32, 7> = TrackedHandle::from_vec(vec![1, 2, 3]);
    let value = arr[3];
    assert_eq!(value, 0);
}

#[test]
fn test_empty_array() {
    let empty: TrackedHandle<String, 8> = TrackedHandle::from_vec(Vec::new());
    assert!(TrackedHandle::is_array(&empty));
    assert_eq!(TrackedHandle::array_size(&empty), 0);
    assert!(TrackedHandle::try_deref(&empty).is_none());
    assert_eq!(empty.iter().count(), 0);
    drop(empty);
    assert_eq!(TrackedHandle::<String, 8>::registry_len(), 0);
}

#[test]
fn test_from_boxed_slice() {
    let boxed: Box<[char]> = vec!['a', 'b'].into_boxed_slice();
    let arr: TrackedHandle<char, 9> = boxed.into();
    assert_eq!(arr.iter().collect::<String>(), "ab");
}
