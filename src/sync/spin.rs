use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use crate::config::SpinConfig;
use crate::raw;

/// A spinning lock owning the data it protects, built on
/// [`raw::SpinLock`].
///
/// Waiting threads never sleep in the kernel. Only worth it for critical
/// sections a few instructions long.
///
/// ```
/// use futex_sync::sync::SpinLock;
///
/// let lock = SpinLock::new(Vec::new());
/// lock.lock().push(1);
/// assert_eq!(*lock.lock(), [1]);
/// ```
pub struct SpinLock<T: ?Sized> {
    inner: raw::SpinLock,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

/// Scoped access to the data of a [`SpinLock`]. Unlocks on drop.
#[must_use = "if unused the SpinLock will immediately unlock"]
#[clippy::has_significant_drop]
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    lock: &'a SpinLock<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T> SpinLock<T> {
    /// A free lock holding `t`.
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock { inner: raw::SpinLock::new(), data: UnsafeCell::new(t) }
    }

    /// Consumes the lock and returns the data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Spins until the lock is taken, with the default backoff.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.inner.lock();
        SpinLockGuard { lock: self, _not_send: PhantomData }
    }

    /// Spins until the lock is taken, backing off as `config` says.
    pub fn lock_with(&self, config: &SpinConfig) -> SpinLockGuard<'_, T> {
        self.inner.lock_with(config);
        SpinLockGuard { lock: self, _not_send: PhantomData }
    }

    /// Takes the lock if it is free.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.inner.try_lock().ok()?;
        Some(SpinLockGuard { lock: self, _not_send: PhantomData })
    }

    /// The data, through an exclusive borrow; no locking needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("SpinLock");
        match self.try_lock() {
            Some(guard) => d.field("data", &&*guard),
            None => d.field("data", &format_args!("<locked>")),
        };
        d.finish_non_exhaustive()
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.inner.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
