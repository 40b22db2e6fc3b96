//! Misuse must abort the process. Each case re-runs this test binary on a
//! single `_child` test with `FUTEX_SYNC_DEATH_CHILD` set; the child misuses
//! a primitive and the parent checks that it died.

use std::env;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use crate::error::Result;
use crate::raw::{Barrier, Condvar, FastMutex, RecursiveMutex, Relock, RwLock, SpinLock};

const CHILD_ENV: &str = "FUTEX_SYNC_DEATH_CHILD";

fn in_child() -> bool {
    env::var_os(CHILD_ENV).is_some()
}

fn expect_abort(child_test: &str) {
    let exe = env::current_exe().unwrap();
    let output = Command::new(exe)
        .args(["--exact", child_test, "--test-threads=1", "--nocapture"])
        .env(CHILD_ENV, "1")
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert!(!output.status.success(), "{child_test} survived");
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(output.status.signal(), Some(6), "{child_test} did not abort");
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fatal:"), "no diagnostic from {child_test}: {stderr}");
}

#[test]
fn locked_fast_mutex_dropped() {
    expect_abort("tests::death::locked_fast_mutex_dropped_child");
}

#[test]
fn locked_fast_mutex_dropped_child() {
    if !in_child() {
        return;
    }
    let m = FastMutex::new();
    m.lock();
    drop(m);
}

#[test]
fn fast_mutex_double_unlock() {
    expect_abort("tests::death::fast_mutex_double_unlock_child");
}

#[test]
fn fast_mutex_double_unlock_child() {
    if !in_child() {
        return;
    }
    let m = FastMutex::new();
    m.lock();
    m.unlock();
    m.unlock();
}

#[test]
fn recursive_unlock_by_non_owner() {
    expect_abort("tests::death::recursive_unlock_by_non_owner_child");
}

#[test]
fn recursive_unlock_by_non_owner_child() {
    if !in_child() {
        return;
    }
    let m = Arc::new(RecursiveMutex::new());
    m.lock().unwrap();
    let m2 = m.clone();
    // The abort takes the whole process down from the other thread.
    let _ = thread::spawn(move || m2.unlock()).join();
}

#[test]
fn spinlock_unlock_not_held() {
    expect_abort("tests::death::spinlock_unlock_not_held_child");
}

#[test]
fn spinlock_unlock_not_held_child() {
    if !in_child() {
        return;
    }
    SpinLock::new().unlock();
}

#[test]
fn rwlock_unlock_not_held() {
    expect_abort("tests::death::rwlock_unlock_not_held_child");
}

#[test]
fn rwlock_unlock_not_held_child() {
    if !in_child() {
        return;
    }
    RwLock::new().unlock();
}

#[test]
fn locked_recursive_mutex_dropped() {
    expect_abort("tests::death::locked_recursive_mutex_dropped_child");
}

#[test]
fn locked_recursive_mutex_dropped_child() {
    if !in_child() {
        return;
    }
    let m = RecursiveMutex::new();
    m.lock().unwrap();
    m.lock().unwrap();
    drop(m);
}

#[test]
fn read_locked_rwlock_dropped() {
    expect_abort("tests::death::read_locked_rwlock_dropped_child");
}

#[test]
fn read_locked_rwlock_dropped_child() {
    if !in_child() {
        return;
    }
    let l = RwLock::new();
    l.read_lock().unwrap();
    drop(l);
}

#[test]
fn write_locked_rwlock_dropped() {
    expect_abort("tests::death::write_locked_rwlock_dropped_child");
}

#[test]
fn write_locked_rwlock_dropped_child() {
    if !in_child() {
        return;
    }
    let l = RwLock::new();
    l.write_lock().unwrap();
    drop(l);
}

#[test]
fn held_spinlock_dropped() {
    expect_abort("tests::death::held_spinlock_dropped_child");
}

#[test]
fn held_spinlock_dropped_child() {
    if !in_child() {
        return;
    }
    let s = SpinLock::new();
    s.lock();
    drop(s);
}

/// A lock whose release unwinds, stranding the condvar's waiter count.
struct PanicOnRelease;

impl Relock for PanicOnRelease {
    type Saved = ();

    fn identity(&self) -> usize {
        1
    }

    fn release(&self) {
        panic!("release unwound");
    }

    fn reacquire(&self, _: ()) -> Result<()> {
        Ok(())
    }
}

#[test]
#[cfg_attr(not(panic = "unwind"), ignore = "test requires unwinding support")]
fn condvar_with_waiters_dropped() {
    expect_abort("tests::death::condvar_with_waiters_dropped_child");
}

#[test]
fn condvar_with_waiters_dropped_child() {
    if !in_child() {
        return;
    }
    let c = Condvar::new();
    let r = panic::catch_unwind(AssertUnwindSafe(|| c.wait(&PanicOnRelease)));
    assert!(r.is_err());
    assert_eq!(c.waiters(), 1);
    drop(c);
}

#[test]
fn barrier_dropped_mid_cycle() {
    expect_abort("tests::death::barrier_dropped_mid_cycle_child");
}

#[test]
fn barrier_dropped_mid_cycle_child() {
    if !in_child() {
        return;
    }
    let b = Arc::new(Barrier::new(2).unwrap());
    let b2 = b.clone();
    let _waiter = thread::spawn(move || b2.wait());
    while b.arrived() == 0 {
        thread::yield_now();
    }
    // SAFETY: the other thread is parked in the kernel, and the drop aborts
    // the process before the barrier is read again.
    unsafe { ptr::drop_in_place(Arc::as_ptr(&b).cast_mut()) };
}
