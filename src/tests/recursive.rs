use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{MutexAttr, Protocol, Robustness, Scope};
use crate::raw::RecursiveMutex;
use crate::registry::ThreadRegistry;
use crate::sync::{LockError, ReentrantMutex};
use crate::Error;
use super::init_logging;

static REGISTRY: ThreadRegistry = ThreadRegistry::new();

fn robust_attr() -> MutexAttr {
    MutexAttr::new().robustness(Robustness::Robust)
}

#[test]
fn smoke() {
    let m = RecursiveMutex::new();
    m.lock().unwrap();
    assert!(m.is_owned_by_current_thread());
    assert_eq!(m.depth(), 1);
    m.unlock();
    assert!(!m.is_locked());
    assert_eq!(m.depth(), 0);
}

#[test]
fn released_only_after_last_unlock() {
    const N: u32 = 5;
    let m = Arc::new(RecursiveMutex::new());
    for _ in 0..N {
        m.lock().unwrap();
    }
    assert_eq!(m.depth(), N);

    for left in (1..=N).rev() {
        let m2 = m.clone();
        let r = thread::spawn(move || m2.try_lock()).join().unwrap();
        assert_eq!(r, Err(Error::Busy), "{left} levels still held");
        m.unlock();
    }

    let m2 = m.clone();
    thread::spawn(move || {
        m2.try_lock().unwrap();
        m2.unlock();
    })
    .join()
    .unwrap();
}

#[test]
fn try_lock_reenters() {
    let m = RecursiveMutex::new();
    m.try_lock().unwrap();
    m.try_lock().unwrap();
    assert_eq!(m.depth(), 2);
    m.unlock();
    m.unlock();
}

#[test]
fn never_two_owners() {
    let m = Arc::new(RecursiveMutex::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let (m, inside) = (m.clone(), inside.clone());
            thread::spawn(move || {
                for _ in 0..1000 {
                    m.lock().unwrap();
                    m.lock().unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    inside.fetch_sub(1, Ordering::SeqCst);
                    m.unlock();
                    m.unlock();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(!m.is_locked());
}

#[test]
fn lock_timeout_expires() {
    let m = Arc::new(RecursiveMutex::new());
    m.lock().unwrap();
    let m2 = m.clone();
    let r = thread::spawn(move || m2.lock_timeout(Duration::from_millis(10))).join().unwrap();
    assert_eq!(r, Err(Error::TimedOut));
    m.unlock();
}

#[test]
fn priority_inheritance_contended() {
    init_logging();
    let attr = MutexAttr::new().protocol(Protocol::Inherit);
    let m = Arc::new(RecursiveMutex::with_attr(attr, None).unwrap());
    let count = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let (m, count) = (m.clone(), count.clone());
            thread::spawn(move || {
                for _ in 0..500 {
                    m.lock().unwrap();
                    m.lock().unwrap();
                    let c = count.load(Ordering::Relaxed);
                    count.store(c + 1, Ordering::Relaxed);
                    m.unlock();
                    m.unlock();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(count.load(Ordering::Relaxed), 2000);
    assert!(!m.is_locked());
}

#[test]
fn priority_inheritance_timeout() {
    let attr = MutexAttr::new().protocol(Protocol::Inherit);
    let m = Arc::new(RecursiveMutex::with_attr(attr, None).unwrap());
    m.lock().unwrap();
    let m2 = m.clone();
    let r = thread::spawn(move || m2.lock_timeout(Duration::from_millis(10))).join().unwrap();
    assert_eq!(r, Err(Error::TimedOut));
    m.unlock();
}

#[test]
fn invalid_attributes() {
    let pi_robust = robust_attr().protocol(Protocol::Inherit);
    assert_eq!(
        RecursiveMutex::with_attr(pi_robust, Some(&REGISTRY)).err(),
        Some(Error::InvalidArgument)
    );
    assert_eq!(RecursiveMutex::with_attr(robust_attr(), None).err(), Some(Error::InvalidArgument));
    let shared = MutexAttr::new().scope(Scope::Shared);
    assert_eq!(RecursiveMutex::with_attr(shared, None).err(), Some(Error::Unsupported));
}

#[test]
fn mark_consistent_misuse() {
    let plain = RecursiveMutex::new();
    plain.lock().unwrap();
    assert_eq!(plain.mark_consistent(), Err(Error::InvalidArgument));
    plain.unlock();

    let m = Arc::new(RecursiveMutex::robust(&REGISTRY));
    assert_eq!(m.mark_consistent(), Err(Error::InvalidOwner));
    m.lock().unwrap();
    // Consistent already.
    assert_eq!(m.mark_consistent(), Err(Error::InvalidArgument));
    let m2 = m.clone();
    let r = thread::spawn(move || m2.mark_consistent()).join().unwrap();
    assert_eq!(r, Err(Error::InvalidOwner));
    m.unlock();
}

/// Locks `m` on a thread that exits without unlocking.
fn abandon(m: &Arc<RecursiveMutex>) {
    let m2 = m.clone();
    thread::spawn(move || {
        m2.lock().unwrap();
        m2.lock().unwrap();
    })
    .join()
    .unwrap();
}

#[test]
fn owner_death_recovered() {
    init_logging();
    let m = Arc::new(RecursiveMutex::with_attr(robust_attr(), Some(&REGISTRY)).unwrap());
    abandon(&m);

    assert_eq!(m.lock(), Err(Error::OwnerDied));
    assert!(m.is_owned_by_current_thread());
    assert_eq!(m.depth(), 1);
    m.mark_consistent().unwrap();
    m.unlock();

    // Business as usual afterwards.
    m.lock().unwrap();
    m.unlock();
    let m2 = m.clone();
    thread::spawn(move || {
        m2.lock().unwrap();
        m2.unlock();
    })
    .join()
    .unwrap();
}

#[test]
fn owner_death_unrecovered() {
    init_logging();
    let m = Arc::new(RecursiveMutex::robust(&REGISTRY));
    abandon(&m);

    assert_eq!(m.try_lock(), Err(Error::OwnerDied));
    m.unlock();

    assert_eq!(m.lock(), Err(Error::NotRecoverable));
    assert_eq!(m.try_lock(), Err(Error::NotRecoverable));
    assert!(!m.is_locked());
    let m2 = m.clone();
    let r = thread::spawn(move || m2.lock_timeout(Duration::from_secs(1))).join().unwrap();
    assert_eq!(r, Err(Error::NotRecoverable));
}

#[test]
fn blocked_locker_notices_owner_death() {
    init_logging();
    let m = Arc::new(RecursiveMutex::robust(&REGISTRY));
    let (locked_tx, locked_rx) = channel();
    let (exit_tx, exit_rx) = channel::<()>();

    let m2 = m.clone();
    let owner = thread::spawn(move || {
        m2.lock().unwrap();
        locked_tx.send(()).unwrap();
        exit_rx.recv().unwrap();
    });
    locked_rx.recv().unwrap();

    let m3 = m.clone();
    let waiter = thread::spawn(move || {
        let r = m3.lock();
        if r == Err(Error::OwnerDied) {
            m3.mark_consistent().unwrap();
        }
        m3.unlock();
        r
    });

    thread::sleep(Duration::from_millis(20));
    exit_tx.send(()).unwrap();
    owner.join().unwrap();
    assert_eq!(waiter.join().unwrap(), Err(Error::OwnerDied));
}

#[test]
fn reentrant_guards() {
    let m = ReentrantMutex::new(Cell::new(0));
    let a = m.lock().unwrap();
    let b = m.lock().unwrap();
    a.set(a.get() + 1);
    b.set(b.get() + 1);
    assert_eq!(b.depth(), 2);
    drop(a);
    assert!(m.is_owned_by_current_thread());
    drop(b);
    assert!(!m.is_owned_by_current_thread());
    assert_eq!(m.into_inner().get(), 2);
}

#[test]
fn reentrant_owner_died_carries_guard() {
    let m = Arc::new(ReentrantMutex::robust(AtomicUsize::new(0), &REGISTRY));
    let m2 = m.clone();
    thread::spawn(move || {
        let g = m2.lock().unwrap();
        g.store(1, Ordering::Relaxed);
        std::mem::forget(g);
    })
    .join()
    .unwrap();

    let g = match m.lock() {
        Err(LockError::OwnerDied(g)) => g,
        other => panic!("expected OwnerDied, got {:?}", other.map(|_| ())),
    };
    assert_eq!(g.load(Ordering::Relaxed), 1);
    g.mark_consistent().unwrap();
    drop(g);

    let g = m.lock().unwrap();
    assert_eq!(g.mark_consistent(), Err(Error::InvalidArgument));
}

#[test]
fn reentrant_busy_elsewhere() {
    let m = Arc::new(ReentrantMutex::new(()));
    let _g = m.lock().unwrap();
    let m2 = m.clone();
    let r = thread::spawn(move || m2.try_lock().err().map(|e| e.error())).join().unwrap();
    assert_eq!(r, Some(Error::Busy));
}
