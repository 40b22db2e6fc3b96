use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::SpinConfig;
use crate::raw;
use crate::sync::SpinLock;
use crate::Error;

#[test]
fn smoke() {
    let s = raw::SpinLock::new();
    s.try_lock().unwrap();
    assert!(s.is_locked());
    assert_eq!(s.try_lock(), Err(Error::Busy));
    s.unlock();
    assert!(!s.is_locked());
}

#[test]
fn counter() {
    const THREADS: usize = 4;
    const ITERS: usize = 5000;

    let lock = Arc::new(SpinLock::new(0usize));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                for _ in 0..ITERS {
                    *lock.lock() += 1;
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*lock.lock(), THREADS * ITERS);
}

#[test]
fn backs_off_to_sleep() {
    // No spinning or yielding: every contended round sleeps.
    let config = SpinConfig { spin_rounds: 0, yield_rounds: 0, sleep: Duration::from_millis(1) };
    let lock = Arc::new(SpinLock::new(()));
    let g = lock.lock();
    let lock2 = lock.clone();
    let t = thread::spawn(move || {
        let _g = lock2.lock_with(&config);
    });
    thread::sleep(Duration::from_millis(10));
    drop(g);
    t.join().unwrap();
}

#[test]
fn try_lock_guard() {
    let lock = SpinLock::new(1);
    let g = lock.try_lock().unwrap();
    assert!(lock.try_lock().is_none());
    drop(g);
    assert_eq!(format!("{lock:?}"), "SpinLock { data: 1, .. }");
    assert_eq!(lock.into_inner(), 1);
}
