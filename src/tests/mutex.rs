use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::raw::FastMutex;
use crate::sync::{Condvar, Mutex, TryLockError};
use crate::{Error, time::Deadline};

#[derive(Eq, PartialEq, Debug)]
struct NonCopy(i32);

#[test]
fn smoke() {
    let m = Mutex::new(());
    drop(m.lock());
    drop(m.lock());
}

#[test]
fn lots_and_lots() {
    const J: u32 = 1000;
    const K: u32 = 3;

    let m = Arc::new(Mutex::new(0));

    fn inc(m: &Mutex<u32>) {
        for _ in 0..J {
            *m.lock() += 1;
        }
    }

    let (tx, rx) = channel();
    for _ in 0..2 * K {
        let tx2 = tx.clone();
        let m2 = m.clone();
        thread::spawn(move || {
            inc(&m2);
            tx2.send(()).unwrap();
        });
    }

    drop(tx);
    for _ in 0..2 * K {
        rx.recv().unwrap();
    }
    assert_eq!(*m.lock(), J * K * 2);
}

#[test]
fn never_two_owners() {
    let m = Arc::new(FastMutex::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let (m, inside) = (m.clone(), inside.clone());
            thread::spawn(move || {
                for _ in 0..2000 {
                    m.lock();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    inside.fetch_sub(1, Ordering::SeqCst);
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
fn try_lock() {
    let m = Mutex::new(());
    *m.try_lock().unwrap() = ();
}

#[test]
fn try_lock_held_elsewhere() {
    let m = Arc::new(Mutex::new(0));
    let g = m.lock();
    let m2 = m.clone();
    let r = thread::spawn(move || m2.try_lock().err()).join().unwrap();
    assert_eq!(r, Some(TryLockError::WouldBlock));
    drop(g);
}

#[test]
fn raw_try_lock_is_busy() {
    let m = FastMutex::new();
    m.lock();
    assert_eq!(m.try_lock(), Err(Error::Busy));
    m.unlock();
    assert_eq!(m.try_lock(), Ok(()));
    m.unlock();
}

#[test]
fn lock_timeout_expires() {
    let m = Arc::new(Mutex::new(()));
    let g = m.lock();
    let m2 = m.clone();
    let start = Instant::now();
    let r = thread::spawn(move || m2.lock_timeout(Duration::from_millis(20)).err())
        .join()
        .unwrap();
    assert_eq!(r, Some(Error::TimedOut));
    assert!(start.elapsed() >= Duration::from_millis(20));
    drop(g);
    assert!(m.lock_timeout(Duration::from_millis(20)).is_ok());
}

#[test]
fn lock_until_past_deadline() {
    let m = FastMutex::new();
    m.lock();
    let deadline = Deadline::after(Duration::ZERO).unwrap();
    assert_eq!(m.lock_until(&deadline), Err(Error::TimedOut));
    m.unlock();
}

#[test]
fn lock_handed_over() {
    let m = Arc::new(FastMutex::new());
    m.lock();
    let m2 = m.clone();
    let t = thread::spawn(move || {
        m2.lock();
        m2.unlock();
    });
    thread::sleep(Duration::from_millis(10));
    m.unlock();
    t.join().unwrap();
}

#[test]
fn test_into_inner() {
    let m = Mutex::new(NonCopy(10));
    assert_eq!(m.into_inner(), NonCopy(10));
}

#[test]
fn test_into_inner_drop() {
    struct Foo(Arc<AtomicUsize>);
    impl Drop for Foo {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
    let num_drops = Arc::new(AtomicUsize::new(0));
    let m = Mutex::new(Foo(num_drops.clone()));
    assert_eq!(num_drops.load(Ordering::SeqCst), 0);
    {
        let _inner = m.into_inner();
        assert_eq!(num_drops.load(Ordering::SeqCst), 0);
    }
    assert_eq!(num_drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_get_mut() {
    let mut m = Mutex::new(NonCopy(10));
    *m.get_mut() = NonCopy(20);
    assert_eq!(m.into_inner(), NonCopy(20));
}

#[test]
fn test_mutex_arc_condvar() {
    let packet = Arc::new((Mutex::new(false), Condvar::new()));
    let packet2 = packet.clone();
    let (tx, rx) = channel();
    let _t = thread::spawn(move || {
        // wait until parent gets in
        rx.recv().unwrap();
        let (lock, cvar) = &*packet2;
        *lock.lock() = true;
        cvar.notify_one();
    });

    let (lock, cvar) = &*packet;
    let mut lock = lock.lock();
    tx.send(()).unwrap();
    assert!(!*lock);
    while !*lock {
        lock = cvar.wait(lock);
    }
}

#[test]
#[cfg_attr(not(panic = "unwind"), ignore = "test requires unwinding support")]
fn test_mutex_arc_access_in_unwind() {
    let arc = Arc::new(Mutex::new(1));
    let arc2 = arc.clone();
    let _ = thread::spawn(move || {
        struct Unwinder {
            i: Arc<Mutex<i32>>,
        }
        impl Drop for Unwinder {
            fn drop(&mut self) {
                *self.i.lock() += 1;
            }
        }
        let _u = Unwinder { i: arc2 };
        panic!();
    })
    .join();
    let lock = arc.lock();
    assert_eq!(*lock, 2);
}

#[test]
fn test_mutex_unsized() {
    let mutex: &Mutex<[i32]> = &Mutex::new([1, 2, 3]);
    {
        let b = &mut *mutex.lock();
        b[0] = 4;
        b[2] = 5;
    }
    let comp: &[i32] = &[4, 2, 5];
    assert_eq!(&*mutex.lock(), comp);
}

#[test]
fn debug_shows_locked() {
    let m = Mutex::new(7);
    assert_eq!(format!("{m:?}"), "Mutex { data: 7, .. }");
    let _g = m.lock();
    assert_eq!(format!("{m:?}"), "Mutex { data: <locked>, .. }");
}
