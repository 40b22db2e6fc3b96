use core::fmt;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use core::time::Duration;
use crate::blocking;
use crate::error::{Error, Result, fatal};
use crate::raw::Relock;
use crate::time::Deadline;

const LOCKED: u32 = 1;
const WAITERS: u32 = 2;

/// A non-recursive mutex in one 32-bit word.
///
/// Bit 0 marks the mutex locked, bit 1 marks that someone may be asleep on
/// it. Unlocking wakes a single sleeper, and only when bit 1 was set. There
/// is no fairness: a newly arriving thread can take the lock ahead of a
/// woken one.
///
/// ```
/// use futex_sync::raw::FastMutex;
///
/// let m = FastMutex::new();
/// m.lock();
/// assert!(m.try_lock().is_err());
/// m.unlock();
/// ```
#[repr(C)]
pub struct FastMutex {
    /// 0: unlocked
    /// LOCKED: locked, no other threads waiting
    /// LOCKED | WAITERS: locked, and other threads may be waiting
    state: AtomicU32,
}

impl FastMutex {
    /// An unlocked mutex.
    #[inline]
    pub const fn new() -> FastMutex {
        FastMutex { state: AtomicU32::new(0) }
    }

    /// Takes the lock if it is free. Never blocks.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] if the lock is held, by any thread.
    #[inline]
    pub fn try_lock(&self) -> Result<()> {
        if self.state.fetch_or(LOCKED, Acquire) & LOCKED == 0 {
            Ok(())
        } else {
            Err(Error::Busy)
        }
    }

    /// Blocks until the lock is taken.
    ///
    /// Locking a mutex the calling thread already holds deadlocks.
    #[inline]
    pub fn lock(&self) {
        if self.try_lock().is_err() {
            // An unbounded wait cannot time out.
            let _ = self.lock_contended(None);
        }
    }

    /// Blocks until the lock is taken or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// [`Error::TimedOut`] when the timeout elapses first.
    pub fn lock_timeout(&self, timeout: Duration) -> Result<()> {
        if self.try_lock().is_ok() {
            return Ok(());
        }
        self.lock_contended(Deadline::after(timeout).as_ref())
    }

    /// Blocks until the lock is taken or `deadline` passes.
    ///
    /// # Errors
    ///
    /// [`Error::TimedOut`] when the deadline passes first.
    pub fn lock_until(&self, deadline: &Deadline) -> Result<()> {
        if self.try_lock().is_ok() {
            return Ok(());
        }
        self.lock_contended(Some(deadline))
    }

    #[cold]
    fn lock_contended(&self, deadline: Option<&Deadline>) -> Result<()> {
        // Spin first to speed things up if the lock is released quickly.
        let mut state = self.spin();

        loop {
            // Once we have contended we can no longer tell whether others
            // sleep behind us, so acquire with WAITERS to keep the chain of
            // wakeups going.
            if state & LOCKED == 0 {
                state = self.state.fetch_or(LOCKED | WAITERS, Acquire);
                if state & LOCKED == 0 {
                    return Ok(());
                }
            } else if state & WAITERS == 0 {
                state = self.state.fetch_or(WAITERS, Relaxed);
                continue;
            }

            log::trace!("FastMutex {:p}: sleeping", self);
            if blocking::wait_until(&self.state, LOCKED | WAITERS, deadline).timed_out() {
                return Err(Error::TimedOut);
            }

            state = self.spin();
        }
    }

    fn spin(&self) -> u32 {
        let mut spin = 100;
        loop {
            // We only use `load` (and not `swap` or `compare_exchange`)
            // while spinning, to be easier on the caches.
            let state = self.state.load(Relaxed);

            // We stop spinning when the mutex is unlocked,
            // but also when others are already sleeping on it.
            if state != LOCKED || spin == 0 {
                return state;
            }

            core::hint::spin_loop();
            spin -= 1;
        }
    }

    /// Releases the lock and wakes one sleeper if there might be one.
    ///
    /// The mutex does not record an owner, so any thread may unlock it.
    /// Unlocking a mutex that is not locked aborts the process.
    #[inline]
    #[track_caller]
    pub fn unlock(&self) {
        let state = self.state.swap(0, Release);
        if state & LOCKED == 0 {
            fatal!("FastMutex", "unlock of a mutex that is not locked");
        }
        if state & WAITERS != 0 {
            // We only wake up one thread. When that thread locks the mutex,
            // it re-sets WAITERS, so any other waiting threads will also be
            // woken up.
            blocking::wake_one(&self.state);
        }
    }

    /// Whether the mutex is currently held. Only a snapshot.
    pub fn is_locked(&self) -> bool {
        self.state.load(Relaxed) & LOCKED != 0
    }

    pub(crate) fn word(&self) -> &AtomicU32 {
        &self.state
    }
}

impl Relock for FastMutex {
    type Saved = ();

    fn identity(&self) -> usize {
        self.word() as *const AtomicU32 as usize
    }

    #[track_caller]
    fn release(&self) {
        self.unlock();
    }

    fn reacquire(&self, _: ()) -> Result<()> {
        self.lock();
        Ok(())
    }
}

impl Default for FastMutex {
    fn default() -> FastMutex {
        FastMutex::new()
    }
}

impl Drop for FastMutex {
    fn drop(&mut self) {
        if *self.state.get_mut() != 0 {
            fatal!("FastMutex", "destroyed while locked");
        }
    }
}

impl fmt::Debug for FastMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastMutex").field("locked", &self.is_locked()).finish()
    }
}
