use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::time::Duration;
use crate::raw;

/// A reader-writer lock owning the data it protects, built on
/// [`raw::RwLock`].
///
/// Any number of readers or one writer at a time. A queued writer stops
/// new readers from getting in, so a stream of readers cannot starve it.
/// Acquiring in a way that would deadlock the calling thread against itself
/// fails with [`Error::Deadlock`](crate::Error::Deadlock) instead of
/// hanging.
///
/// ```
/// use futex_sync::sync::RwLock;
///
/// let lock = RwLock::new(5);
/// {
///     let r1 = lock.read().unwrap();
///     let r2 = lock.read().unwrap();
///     assert_eq!(*r1 + *r2, 10);
/// }
/// *lock.write().unwrap() += 1;
/// assert_eq!(*lock.read().unwrap(), 6);
/// ```
pub struct RwLock<T: ?Sized> {
    inner: raw::RwLock,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for RwLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwLock<T> {}

/// Shared access to the data of a [`RwLock`].
#[must_use = "if unused the RwLock will immediately unlock"]
#[clippy::has_significant_drop]
pub struct RwLockReadGuard<'a, T: ?Sized + 'a> {
    lock: &'a RwLock<T>,
    /// Holdings are tracked per thread.
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for RwLockReadGuard<'_, T> {}

/// Exclusive access to the data of a [`RwLock`].
#[must_use = "if unused the RwLock will immediately unlock"]
#[clippy::has_significant_drop]
pub struct RwLockWriteGuard<'a, T: ?Sized + 'a> {
    lock: &'a RwLock<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for RwLockWriteGuard<'_, T> {}

impl<T> RwLock<T> {
    /// An unlocked lock holding `t`.
    #[inline]
    pub const fn new(t: T) -> RwLock<T> {
        RwLock { inner: raw::RwLock::new(), data: UnsafeCell::new(t) }
    }

    /// Consumes the lock and returns the data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Blocks until the calling thread shares the lock.
    ///
    /// # Errors
    ///
    /// Those of [`raw::RwLock::read_lock`].
    pub fn read(&self) -> crate::Result<RwLockReadGuard<'_, T>> {
        self.inner.read_lock()?;
        Ok(RwLockReadGuard { lock: self, _not_send: PhantomData })
    }

    /// Shares the lock if that is possible without blocking.
    ///
    /// # Errors
    ///
    /// Those of [`raw::RwLock::try_read_lock`].
    pub fn try_read(&self) -> crate::Result<RwLockReadGuard<'_, T>> {
        self.inner.try_read_lock()?;
        Ok(RwLockReadGuard { lock: self, _not_send: PhantomData })
    }

    /// Like [`read`](Self::read), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Those of [`raw::RwLock::read_lock_timeout`].
    pub fn read_timeout(&self, timeout: Duration) -> crate::Result<RwLockReadGuard<'_, T>> {
        self.inner.read_lock_timeout(timeout)?;
        Ok(RwLockReadGuard { lock: self, _not_send: PhantomData })
    }

    /// Blocks until the calling thread holds the lock exclusively.
    ///
    /// # Errors
    ///
    /// Those of [`raw::RwLock::write_lock`].
    pub fn write(&self) -> crate::Result<RwLockWriteGuard<'_, T>> {
        self.inner.write_lock()?;
        Ok(RwLockWriteGuard { lock: self, _not_send: PhantomData })
    }

    /// Takes the lock exclusively if it is free.
    ///
    /// # Errors
    ///
    /// Those of [`raw::RwLock::try_write_lock`].
    pub fn try_write(&self) -> crate::Result<RwLockWriteGuard<'_, T>> {
        self.inner.try_write_lock()?;
        Ok(RwLockWriteGuard { lock: self, _not_send: PhantomData })
    }

    /// Like [`write`](Self::write), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Those of [`raw::RwLock::write_lock_timeout`].
    pub fn write_timeout(&self, timeout: Duration) -> crate::Result<RwLockWriteGuard<'_, T>> {
        self.inner.write_lock_timeout(timeout)?;
        Ok(RwLockWriteGuard { lock: self, _not_send: PhantomData })
    }

    /// The data, through an exclusive borrow; no locking needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> RwLock<T> {
        RwLock::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLock").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl<T: ?Sized> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.inner.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLockReadGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.inner.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLockWriteGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
