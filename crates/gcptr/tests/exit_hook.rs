//! Process-exit hook registration.
//!
//! Run with `--features test-util`.

#![cfg(feature = "test-util")]

use gcptr::test_util::{exit_hook_registered, run_exit_hook};
use gcptr::TrackedHandle;

#[test]
fn test_first_handle_registers_exit_hook() {
    let _h: TrackedHandle<u32, 1> = TrackedHandle::new(1);
    assert!(exit_hook_registered());
}

#[test]
fn test_exit_hook_frees_all_registries_of_thread() {
    let a: TrackedHandle<String, 2> = TrackedHandle::new(String::from("a"));
    let _a2 = a.clone();
    let _b: TrackedHandle<u8, 2> = TrackedHandle::from_vec(vec![0; 16]);

    let stats = unsafe { run_exit_hook() };
    assert_eq!(stats.records, 2);
    assert_eq!(stats.arrays, 1);
    assert_eq!(stats.elements, 17);
    assert_eq!(TrackedHandle::<String, 2>::registry_len(), 0);
    assert_eq!(TrackedHandle::<u8, 2>::registry_len(), 0);
}

#[test]
fn test_exit_hook_twice_is_harmless() {
    let _h: TrackedHandle<u64, 3> = TrackedHandle::new(3);
    let first = unsafe { run_exit_hook() };
    assert_eq!(first.records, 1);
    let second = unsafe { run_exit_hook() };
    assert_eq!(second.records, 0);
}
