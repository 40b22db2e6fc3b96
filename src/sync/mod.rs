//! Data-owning synchronization objects.
//!
//! These wrap the word-level locks in [`raw`](crate::raw) with RAII guards,
//! in the shape of [`std::sync`](https://doc.rust-lang.org/std/sync/index.html):
//!
//! - [`Mutex`]: Mutual exclusion over a [`FastMutex`](crate::raw::FastMutex).
//!   Unlike the std equivalent it does not poison.
//!
//! - [`ReentrantMutex`]: A mutex the owning thread may lock repeatedly,
//!   optionally robust against owner death or priority-inheriting.
//!
//! - [`Condvar`]: Condition variable, waiting with a [`MutexGuard`].
//!
//! - [`RwLock`]: Many readers or one writer, with writer preference and
//!   self-deadlock detection.
//!
//! - [`Barrier`]: Makes multiple threads wait for each other to reach a
//!   point in the program before continuing together.
//!
//! - [`SpinLock`]: Mutual exclusion without ever sleeping in the kernel.
//!
//! Guards are not `Send`: each lock is released on the thread that took it.

mod barrier;
mod condvar;
mod mutex;
mod reentrant;
mod rwlock;
mod spin;

pub use barrier::Barrier;
pub use barrier::BarrierWaitResult;
pub use condvar::Condvar;
pub use condvar::WaitTimeoutResult;
pub use mutex::Mutex;
pub use mutex::MutexGuard;
pub use mutex::TryLockError;
pub use mutex::TryLockResult;
pub use reentrant::LockError;
pub use reentrant::LockResult;
pub use reentrant::ReentrantMutex;
pub use reentrant::ReentrantMutexGuard;
pub use rwlock::RwLock;
pub use rwlock::RwLockReadGuard;
pub use rwlock::RwLockWriteGuard;
pub use spin::SpinLock;
pub use spin::SpinLockGuard;
