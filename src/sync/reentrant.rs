use core::error;
use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::time::Duration;
use crate::config::MutexAttr;
use crate::error::Error;
use crate::raw::RecursiveMutex;
use crate::registry::ThreadRegistry;

/// Why [`ReentrantMutex::lock`] did not simply hand out a guard.
pub enum LockError<Guard> {
    /// The lock **was** taken, but its previous owner exited while holding
    /// it. The guard is inside; repair the data, then call
    /// [`ReentrantMutexGuard::mark_consistent`].
    OwnerDied(Guard),
    /// The lock was not taken.
    Failed(Error),
}

impl<Guard> LockError<Guard> {
    /// The guard of an [`OwnerDied`](Self::OwnerDied) error.
    pub fn into_guard(self) -> Option<Guard> {
        match self {
            LockError::OwnerDied(guard) => Some(guard),
            LockError::Failed(_) => None,
        }
    }

    /// The portable status behind this error.
    pub fn error(&self) -> Error {
        match self {
            LockError::OwnerDied(_) => Error::OwnerDied,
            LockError::Failed(err) => *err,
        }
    }
}

impl<Guard> From<Error> for LockError<Guard> {
    fn from(err: Error) -> Self {
        LockError::Failed(err)
    }
}

impl<Guard> fmt::Debug for LockError<Guard> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::OwnerDied(_) => f.debug_tuple("OwnerDied").finish_non_exhaustive(),
            LockError::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

impl<Guard> fmt::Display for LockError<Guard> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error().fmt(f)
    }
}

impl<Guard> error::Error for LockError<Guard> {}

/// Result of a blocking [`ReentrantMutex`] lock.
pub type LockResult<Guard> = Result<Guard, LockError<Guard>>;

/// A mutex the owning thread may lock again, built on
/// [`RecursiveMutex`].
///
/// Since the same thread can hold several guards at once, guards only give
/// shared access to the data. Wrap it in a `Cell` or `RefCell` for
/// mutation.
///
/// A robust mutex reports the death of a previous owner through
/// [`LockError::OwnerDied`], which still carries a guard.
///
/// ```
/// use futex_sync::sync::ReentrantMutex;
/// use std::cell::Cell;
///
/// let m = ReentrantMutex::new(Cell::new(0));
/// let a = m.lock().unwrap();
/// let b = m.lock().unwrap();
/// a.set(1);
/// assert_eq!(b.get(), 1);
/// ```
pub struct ReentrantMutex<T: ?Sized> {
    inner: RecursiveMutex,
    data: T,
}

unsafe impl<T: ?Sized + Send> Send for ReentrantMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for ReentrantMutex<T> {}

/// Shared access to the data of a [`ReentrantMutex`]. Releases one level
/// of recursion on drop.
#[must_use = "if unused the ReentrantMutex will immediately unlock"]
#[clippy::has_significant_drop]
pub struct ReentrantMutexGuard<'a, T: ?Sized + 'a> {
    lock: &'a ReentrantMutex<T>,
    /// Ownership is per thread.
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for ReentrantMutexGuard<'_, T> {}

impl<T> ReentrantMutex<T> {
    /// An unlocked, non-robust mutex holding `t`.
    pub const fn new(t: T) -> ReentrantMutex<T> {
        ReentrantMutex { inner: RecursiveMutex::new(), data: t }
    }

    /// An unlocked robust mutex holding `t`; owners register with
    /// `registry`.
    pub const fn robust(t: T, registry: &'static ThreadRegistry) -> ReentrantMutex<T> {
        ReentrantMutex { inner: RecursiveMutex::robust(registry), data: t }
    }

    /// An unlocked mutex holding `t`, configured by `attr`.
    ///
    /// # Errors
    ///
    /// Those of [`RecursiveMutex::with_attr`].
    pub fn with_attr(
        t: T,
        attr: MutexAttr,
        registry: Option<&'static ThreadRegistry>,
    ) -> crate::Result<ReentrantMutex<T>> {
        Ok(ReentrantMutex { inner: RecursiveMutex::with_attr(attr, registry)?, data: t })
    }

    /// Consumes the mutex and returns the data.
    pub fn into_inner(self) -> T {
        self.data
    }
}

impl<T: ?Sized> ReentrantMutex<T> {
    /// Blocks until the calling thread owns the mutex.
    ///
    /// # Errors
    ///
    /// [`LockError::OwnerDied`] (lock held) or [`LockError::Failed`] with
    /// the errors of [`RecursiveMutex::lock`].
    pub fn lock(&self) -> LockResult<ReentrantMutexGuard<'_, T>> {
        self.guard(self.inner.lock())
    }

    /// Like [`lock`](Self::lock), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// As [`lock`](Self::lock), plus [`Error::TimedOut`].
    pub fn lock_timeout(&self, timeout: Duration) -> LockResult<ReentrantMutexGuard<'_, T>> {
        self.guard(self.inner.lock_timeout(timeout))
    }

    /// Takes the mutex if that is possible without blocking.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] if another thread owns it, and the errors of
    /// [`lock`](Self::lock).
    pub fn try_lock(&self) -> LockResult<ReentrantMutexGuard<'_, T>> {
        self.guard(self.inner.try_lock())
    }

    fn guard(&self, result: crate::Result<()>) -> LockResult<ReentrantMutexGuard<'_, T>> {
        match result {
            Ok(()) => Ok(ReentrantMutexGuard { lock: self, _not_send: PhantomData }),
            Err(Error::OwnerDied) => {
                Err(LockError::OwnerDied(ReentrantMutexGuard { lock: self, _not_send: PhantomData }))
            }
            Err(err) => Err(LockError::Failed(err)),
        }
    }

    /// Whether the calling thread owns the mutex.
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.inner.is_owned_by_current_thread()
    }

    /// The data, through an exclusive borrow; no locking needed.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.data
    }
}

impl<T: Default> Default for ReentrantMutex<T> {
    fn default() -> ReentrantMutex<T> {
        ReentrantMutex::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for ReentrantMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Locking here could consume an owner-death notification.
        f.debug_struct("ReentrantMutex").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl<T: ?Sized> ReentrantMutexGuard<'_, T> {
    /// Marks the data repaired after [`LockError::OwnerDied`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the mutex is not robust or not
    /// inconsistent.
    pub fn mark_consistent(&self) -> crate::Result<()> {
        self.lock.inner.mark_consistent()
    }

    /// Recursion depth of the calling thread.
    pub fn depth(&self) -> u32 {
        self.lock.inner.depth()
    }
}

impl<T: ?Sized> Deref for ReentrantMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.lock.data
    }
}

impl<T: ?Sized> Drop for ReentrantMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.inner.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for ReentrantMutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
