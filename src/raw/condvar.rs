use core::fmt;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use core::sync::atomic::{AtomicU32, AtomicUsize};
use core::time::Duration;
use crate::blocking;
use crate::config::CondvarAttr;
use crate::error::{Error, Result, fatal};
use crate::raw::{Relock, SpinLock};
use crate::time::{ClockId, Deadline, Timespec};

/// A condition variable over any [`Relock`] mutex.
///
/// Waiters sleep on a generation counter. A waiter reads the counter while
/// still holding the mutex, so a notification issued after it releases the
/// mutex always changes the value it sleeps on.
///
/// A condvar is bound to the mutex of its first waiter until the last
/// waiter leaves. Waiting with a different mutex in the meantime fails with
/// [`Error::InvalidArgument`].
///
/// ```
/// use futex_sync::raw::{Condvar, FastMutex};
/// use std::time::Duration;
///
/// let m = FastMutex::new();
/// let cv = Condvar::new();
/// m.lock();
/// assert!(cv.wait_timeout(&m, Duration::from_millis(1)).is_err());
/// m.unlock();
/// ```
#[repr(C)]
pub struct Condvar {
    generation: AtomicU32,
    waiters: AtomicU32,
    /// Identity of the bound mutex, 0 when unbound.
    mutex: AtomicUsize,
    /// Guards changes to the binding and waiter count together.
    bind: SpinLock,
    clock: ClockId,
}

impl Condvar {
    /// A condvar timing out on the monotonic clock.
    pub const fn new() -> Condvar {
        Condvar {
            generation: AtomicU32::new(0),
            waiters: AtomicU32::new(0),
            mutex: AtomicUsize::new(0),
            bind: SpinLock::new(),
            clock: ClockId::Monotonic,
        }
    }

    /// A condvar configured by `attr`.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for shared scope.
    pub fn with_attr(attr: CondvarAttr) -> Result<Condvar> {
        attr.scope.check()?;
        let mut cv = Condvar::new();
        cv.clock = attr.clock;
        Ok(cv)
    }

    /// The clock timeouts are measured on.
    pub fn clock(&self) -> ClockId {
        self.clock
    }

    /// Releases `mutex`, waits for a notification and takes `mutex` back.
    ///
    /// The caller must hold `mutex`. Spurious wakeups are possible.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the condvar is bound to another
    /// mutex; nothing is released in that case. Errors from reacquiring
    /// `mutex` are passed through.
    #[track_caller]
    pub fn wait<M: Relock>(&self, mutex: &M) -> Result<()> {
        self.wait_inner(mutex, None)
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// As [`wait`](Self::wait), plus [`Error::TimedOut`]. The mutex is held
    /// again in every case but [`Error::InvalidArgument`].
    #[track_caller]
    pub fn wait_timeout<M: Relock>(&self, mutex: &M, timeout: Duration) -> Result<()> {
        let deadline = Deadline::after_on(self.clock, timeout);
        self.wait_inner(mutex, deadline.as_ref())
    }

    /// Like [`wait`](Self::wait), giving up at the absolute time `at` on
    /// this condvar's [clock](Self::clock).
    ///
    /// # Errors
    ///
    /// As [`wait_timeout`](Self::wait_timeout).
    #[track_caller]
    pub fn wait_until<M: Relock>(&self, mutex: &M, at: Timespec) -> Result<()> {
        let deadline = Deadline::at(self.clock, at);
        self.wait_inner(mutex, Some(&deadline))
    }

    #[track_caller]
    fn wait_inner<M: Relock>(&self, mutex: &M, deadline: Option<&Deadline>) -> Result<()> {
        let seen = self.enter(mutex.identity())?;
        let saved = mutex.release();

        log::trace!("Condvar {:p}: waiting at generation {seen}", self);
        let outcome = blocking::wait_until(&self.generation, seen, deadline);

        let relocked = mutex.reacquire(saved);
        self.leave();
        relocked?;
        if outcome.timed_out() {
            return Err(Error::TimedOut);
        }
        Ok(())
    }

    /// Binds to `identity` and counts the caller as a waiter. Returns the
    /// generation to sleep on.
    fn enter(&self, identity: usize) -> Result<u32> {
        self.bind.lock();
        let bound = self.mutex.load(Relaxed);
        if bound != 0 && bound != identity && self.waiters.load(Relaxed) != 0 {
            self.bind.unlock();
            return Err(Error::InvalidArgument);
        }
        self.mutex.store(identity, Relaxed);
        self.waiters.fetch_add(1, Relaxed);
        let seen = self.generation.load(Acquire);
        self.bind.unlock();
        Ok(seen)
    }

    fn leave(&self) {
        self.bind.lock();
        if self.waiters.fetch_sub(1, Relaxed) == 1 {
            self.mutex.store(0, Relaxed);
        }
        self.bind.unlock();
    }

    /// Wakes one waiter, if there are any.
    pub fn signal(&self) {
        if self.waiters.load(Relaxed) == 0 {
            return;
        }
        self.generation.fetch_add(1, Release);
        blocking::wake_one(&self.generation);
    }

    /// Wakes every waiter.
    pub fn broadcast(&self) {
        if self.waiters.load(Relaxed) == 0 {
            return;
        }
        self.generation.fetch_add(1, Release);
        blocking::wake_all(&self.generation);
    }

    /// Number of threads inside a wait. Only a snapshot.
    pub fn waiters(&self) -> u32 {
        self.waiters.load(Relaxed)
    }
}

impl Default for Condvar {
    fn default() -> Condvar {
        Condvar::new()
    }
}

impl Drop for Condvar {
    fn drop(&mut self) {
        let waiters = *self.waiters.get_mut();
        if waiters != 0 {
            fatal!("Condvar", "destroyed with {waiters} waiters");
        }
    }
}

impl fmt::Debug for Condvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar")
            .field("waiters", &self.waiters())
            .field("clock", &self.clock)
            .finish()
    }
}
