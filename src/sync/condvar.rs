use core::fmt;
use core::time::Duration;
use crate::config::CondvarAttr;
use crate::error::Error;
use crate::raw;
use crate::sync::mutex::{self, MutexGuard};
use crate::time::Timespec;

/// Whether a timed wait on a [`Condvar`] ended because time ran out.
///
/// Returned by [`Condvar::wait_timeout`] and [`Condvar::wait_until`].
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct WaitTimeoutResult(bool);

impl WaitTimeoutResult {
    /// `true` if the wait is known to have timed out.
    ///
    /// ```
    /// use futex_sync::sync::{Condvar, Mutex};
    /// use std::time::Duration;
    ///
    /// let lock = Mutex::new(());
    /// let cvar = Condvar::new();
    /// let (_guard, result) = cvar.wait_timeout(lock.lock(), Duration::from_millis(5));
    /// assert!(result.timed_out());
    /// ```
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.0
    }
}

/// A condition variable paired with [`Mutex`](super::Mutex) guards.
///
/// Waiting releases the guard's mutex and blocks the thread until a
/// notification; the mutex is held again when the wait returns. Wakeups may
/// be spurious, so the predicate is re-checked in a loop (or with
/// [`wait_while`](Self::wait_while)).
///
/// A condvar serves one mutex at a time. Waiting with a second mutex while
/// threads still wait with the first one panics.
///
/// # Examples
///
/// ```
/// use futex_sync::sync::{Condvar, Mutex};
/// use std::sync::Arc;
/// use std::thread;
///
/// let pair = Arc::new((Mutex::new(false), Condvar::new()));
/// let pair2 = Arc::clone(&pair);
///
/// thread::spawn(move || {
///     let (lock, cvar) = &*pair2;
///     *lock.lock() = true;
///     cvar.notify_one();
/// });
///
/// let (lock, cvar) = &*pair;
/// let mut started = lock.lock();
/// while !*started {
///     started = cvar.wait(started);
/// }
/// ```
pub struct Condvar {
    inner: raw::Condvar,
}

impl Condvar {
    /// A condvar timing out on the monotonic clock.
    #[must_use]
    #[inline]
    pub const fn new() -> Condvar {
        Condvar { inner: raw::Condvar::new() }
    }

    /// A condvar configured by `attr`, e.g. timing out on the realtime
    /// clock.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for shared scope.
    pub fn with_attr(attr: CondvarAttr) -> crate::Result<Condvar> {
        Ok(Condvar { inner: raw::Condvar::with_attr(attr)? })
    }

    /// Releases the guard's mutex, blocks until notified and locks the
    /// mutex again.
    ///
    /// # Panics
    ///
    /// If other threads are waiting on this condvar with a different mutex.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let lock = mutex::guard_lock(&guard);
        if let Err(err) = self.inner.wait(lock) {
            panic!("Condvar::wait: {err} (condvar used with more than one mutex)");
        }
        guard
    }

    /// Waits for as long as `condition` returns `true`.
    ///
    /// `condition` is checked first, with the mutex held, and again after
    /// every wakeup.
    ///
    /// ```
    /// use futex_sync::sync::{Condvar, Mutex};
    /// use std::sync::Arc;
    /// use std::thread;
    ///
    /// let pair = Arc::new((Mutex::new(true), Condvar::new()));
    /// let pair2 = Arc::clone(&pair);
    ///
    /// thread::spawn(move || {
    ///     let (lock, cvar) = &*pair2;
    ///     *lock.lock() = false;
    ///     cvar.notify_one();
    /// });
    ///
    /// let (lock, cvar) = &*pair;
    /// let _guard = cvar.wait_while(lock.lock(), |pending| *pending);
    /// ```
    pub fn wait_while<'a, T, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        mut condition: F,
    ) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut *guard) {
            guard = self.wait(guard);
        }
        guard
    }

    /// Like [`wait`](Self::wait), giving up after roughly `dur`.
    ///
    /// The time is measured on the condvar's clock and the budget is not
    /// reset by spurious wakeups. The mutex is locked again either way.
    ///
    /// # Panics
    ///
    /// As [`wait`](Self::wait).
    pub fn wait_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        dur: Duration,
    ) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
        let lock = mutex::guard_lock(&guard);
        let result = self.inner.wait_timeout(lock, dur);
        (guard, timeout_result(result))
    }

    /// Like [`wait`](Self::wait), giving up at the absolute time `at` on
    /// the condvar's clock.
    ///
    /// # Panics
    ///
    /// As [`wait`](Self::wait).
    pub fn wait_until<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        at: Timespec,
    ) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
        let lock = mutex::guard_lock(&guard);
        let result = self.inner.wait_until(lock, at);
        (guard, timeout_result(result))
    }

    /// Wakes one thread blocked in a wait, if any. Not buffered: with
    /// nobody waiting it does nothing.
    pub fn notify_one(&self) {
        self.inner.signal()
    }

    /// Wakes every thread blocked in a wait.
    pub fn notify_all(&self) {
        self.inner.broadcast()
    }
}

fn timeout_result(result: crate::Result<()>) -> WaitTimeoutResult {
    match result {
        Ok(()) => WaitTimeoutResult(false),
        Err(Error::TimedOut) => WaitTimeoutResult(true),
        Err(err) => panic!("Condvar::wait_timeout: {err} (condvar used with more than one mutex)"),
    }
}

impl fmt::Debug for Condvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar").field("waiters", &self.inner.waiters()).finish_non_exhaustive()
    }
}

impl Default for Condvar {
    fn default() -> Condvar {
        Condvar::new()
    }
}
