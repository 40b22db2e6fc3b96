use std::sync::mpsc::channel;
use std::thread;

use crate::registry::{ThreadHandle, ThreadRegistry};
use crate::Error;
use super::init_logging;

#[test]
fn register_is_idempotent() {
    static REGISTRY: ThreadRegistry = ThreadRegistry::new();

    let h = thread::spawn(|| {
        assert_eq!(REGISTRY.current(), None);
        let a = REGISTRY.register().unwrap();
        let b = REGISTRY.register().unwrap();
        assert_eq!(a, b);
        assert_eq!(REGISTRY.current(), Some(a));
        assert!(REGISTRY.is_live(a));
        assert_eq!(REGISTRY.live_count(), 1);
        a
    })
    .join()
    .unwrap();

    // Released when the thread exited.
    assert!(!REGISTRY.is_live(h));
    assert_eq!(REGISTRY.live_count(), 0);
}

#[test]
fn recycled_slot_gets_new_generation() {
    static REGISTRY: ThreadRegistry = ThreadRegistry::new();

    let first = thread::spawn(|| REGISTRY.register().unwrap()).join().unwrap();
    let second = thread::spawn(|| REGISTRY.register().unwrap()).join().unwrap();
    assert_ne!(first, second);
    // Same slot, different generation: the old handle stays dead.
    assert_eq!(first.into_raw() & 0x3ff, second.into_raw() & 0x3ff);
    assert!(!REGISTRY.is_live(first));
    assert!(!REGISTRY.is_live(second));
}

#[test]
fn handles_round_trip_through_raw() {
    static REGISTRY: ThreadRegistry = ThreadRegistry::new();

    thread::spawn(|| {
        let h = REGISTRY.register().unwrap();
        assert_eq!(ThreadHandle::from_raw(h.into_raw()), Some(h));
        // Fits the owner field of a lock word.
        assert!(h.into_raw() < 0x3fff_ffff);
    })
    .join()
    .unwrap();
    assert_eq!(ThreadHandle::from_raw(0), None);
    assert_eq!(ThreadHandle::from_raw(0x3ff), None);
}

#[test]
fn registries_are_independent() {
    static A: ThreadRegistry = ThreadRegistry::new();
    static B: ThreadRegistry = ThreadRegistry::new();

    thread::spawn(|| {
        let a = A.register().unwrap();
        assert_eq!(B.current(), None);
        let b = B.register().unwrap();
        assert!(A.is_live(a) && B.is_live(b));
    })
    .join()
    .unwrap();
    assert_eq!(A.live_count() + B.live_count(), 0);
}

#[test]
fn cooperative_cancellation() {
    init_logging();
    static REGISTRY: ThreadRegistry = ThreadRegistry::new();

    let (handle_tx, handle_rx) = channel();
    let (go_tx, go_rx) = channel::<()>();
    let t = thread::spawn(move || {
        handle_tx.send(REGISTRY.register().unwrap()).unwrap();
        go_rx.recv().unwrap();
        let first = REGISTRY.test_cancel();
        let second = REGISTRY.test_cancel();
        (first, second)
    });

    let handle = handle_rx.recv().unwrap();
    REGISTRY.cancel(handle).unwrap();
    go_tx.send(()).unwrap();
    // Observed once, then cleared.
    assert_eq!(t.join().unwrap(), (Err(Error::Cancelled), Ok(())));

    assert_eq!(REGISTRY.cancel(handle), Err(Error::NotFound));
}

#[test]
fn stale_cancel_does_not_hit_next_owner() {
    static REGISTRY: ThreadRegistry = ThreadRegistry::new();

    let (handle_tx, handle_rx) = channel();
    let (go_tx, go_rx) = channel::<()>();
    let t = thread::spawn(move || {
        handle_tx.send(REGISTRY.register().unwrap()).unwrap();
        go_rx.recv().unwrap();
    });
    let old = handle_rx.recv().unwrap();
    REGISTRY.cancel(old).unwrap();
    go_tx.send(()).unwrap();
    t.join().unwrap();

    let r = thread::spawn(|| {
        REGISTRY.register().unwrap();
        REGISTRY.test_cancel()
    })
    .join()
    .unwrap();
    assert_eq!(r, Ok(()));
}

#[test]
fn unregistered_threads_are_never_cancelled() {
    static REGISTRY: ThreadRegistry = ThreadRegistry::new();
    let r = thread::spawn(|| REGISTRY.test_cancel()).join().unwrap();
    assert_eq!(r, Ok(()));
}
