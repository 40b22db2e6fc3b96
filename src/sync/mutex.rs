use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::time::Duration;
use crate::raw::FastMutex;
use crate::time::Deadline;

/// Why [`Mutex::try_lock`] handed out no guard.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryLockError {
    /// The lock is held; taking it would block.
    #[error("try_lock failed because the operation would block")]
    WouldBlock,
}

/// Result of a nonblocking lock attempt.
pub type TryLockResult<Guard> = Result<Guard, TryLockError>;

/// A mutual exclusion lock owning the data it protects, built on
/// [`FastMutex`].
///
/// The data is reachable only through the guard returned by [`lock`] and
/// its relatives; dropping the guard unlocks.
///
/// # Poisoning
///
/// There is none. A thread panicking with the guard held unlocks the mutex
/// on unwind and leaves the data as it was at that point.
///
/// [`lock`]: Self::lock
///
/// # Examples
///
/// ```
/// use futex_sync::sync::Mutex;
/// use std::sync::Arc;
/// use std::sync::mpsc::channel;
/// use std::thread;
///
/// const N: usize = 8;
///
/// let total = Arc::new(Mutex::new(0));
/// let (tx, rx) = channel();
/// for _ in 0..N {
///     let (total, tx) = (Arc::clone(&total), tx.clone());
///     thread::spawn(move || {
///         let mut total = total.lock();
///         *total += 1;
///         if *total == N {
///             tx.send(()).unwrap();
///         }
///     });
/// }
///
/// rx.recv().unwrap();
/// assert_eq!(*total.lock(), N);
/// ```
pub struct Mutex<T: ?Sized> {
    inner: FastMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

/// Scoped access to the data of a [`Mutex`]. Unlocks on drop.
///
/// Created by [`Mutex::lock`], [`Mutex::try_lock`] and
/// [`Mutex::lock_timeout`].
#[must_use = "if unused the Mutex will immediately unlock"]
#[clippy::has_significant_drop]
pub struct MutexGuard<'a, T: ?Sized + 'a> {
    lock: &'a Mutex<T>,
    /// Released on the thread that took it.
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<T> Mutex<T> {
    /// An unlocked mutex holding `t`.
    ///
    /// ```
    /// use futex_sync::sync::Mutex;
    ///
    /// static COUNT: Mutex<u32> = Mutex::new(0);
    /// *COUNT.lock() += 1;
    /// ```
    #[inline]
    pub const fn new(t: T) -> Mutex<T> {
        Mutex { inner: FastMutex::new(), data: UnsafeCell::new(t) }
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Blocks until the mutex is taken and returns a guard.
    ///
    /// Locking it again from the thread holding the guard deadlocks; use
    /// [`ReentrantMutex`](super::ReentrantMutex) where that must work.
    ///
    /// ```
    /// use futex_sync::sync::Mutex;
    /// use std::sync::Arc;
    /// use std::thread;
    ///
    /// let mutex = Arc::new(Mutex::new(0));
    /// let m = Arc::clone(&mutex);
    /// thread::spawn(move || *m.lock() = 10).join().unwrap();
    /// assert_eq!(*mutex.lock(), 10);
    /// ```
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock();
        unsafe { MutexGuard::new(self) }
    }

    /// Takes the mutex if it is free. Never blocks.
    ///
    /// # Errors
    ///
    /// [`TryLockError::WouldBlock`] if the mutex is held.
    ///
    /// ```
    /// use futex_sync::sync::{Mutex, TryLockError};
    ///
    /// let mutex = Mutex::new(());
    /// let _g = mutex.lock();
    /// assert_eq!(mutex.try_lock().err(), Some(TryLockError::WouldBlock));
    /// ```
    pub fn try_lock(&self) -> TryLockResult<MutexGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(()) => Ok(unsafe { MutexGuard::new(self) }),
            Err(_) => Err(TryLockError::WouldBlock),
        }
    }

    /// Blocks until the mutex is taken or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// [`Error::TimedOut`](crate::Error::TimedOut) if the timeout elapses.
    pub fn lock_timeout(&self, timeout: Duration) -> crate::Result<MutexGuard<'_, T>> {
        self.inner.lock_timeout(timeout)?;
        Ok(unsafe { MutexGuard::new(self) })
    }

    /// Blocks until the mutex is taken or `deadline` passes.
    ///
    /// # Errors
    ///
    /// [`Error::TimedOut`](crate::Error::TimedOut) if the deadline passes.
    pub fn lock_until(&self, deadline: &Deadline) -> crate::Result<MutexGuard<'_, T>> {
        self.inner.lock_until(deadline)?;
        Ok(unsafe { MutexGuard::new(self) })
    }

    /// Whether some thread holds the mutex. Only a snapshot.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Consumes the mutex and returns the data.
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.data.into_inner()
    }

    /// The data, through an exclusive borrow; no locking needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T> From<T> for Mutex<T> {
    fn from(t: T) -> Self {
        Mutex::new(t)
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Mutex");
        match self.try_lock() {
            Ok(guard) => {
                d.field("data", &&*guard);
            }
            Err(TryLockError::WouldBlock) => {
                d.field("data", &format_args!("<locked>"));
            }
        }
        d.finish_non_exhaustive()
    }
}

impl<'mutex, T: ?Sized> MutexGuard<'mutex, T> {
    /// # Safety
    ///
    /// `lock.inner` must be held by the calling thread.
    unsafe fn new(lock: &'mutex Mutex<T>) -> MutexGuard<'mutex, T> {
        MutexGuard { lock, _not_send: PhantomData }
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.inner.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

pub(super) fn guard_lock<'a, T: ?Sized>(guard: &MutexGuard<'a, T>) -> &'a FastMutex {
    &guard.lock.inner
}
