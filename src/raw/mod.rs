//! Word-level primitives.
//!
//! Each type keeps its whole state in one or two atomic words laid out with
//! `#[repr(C)]`, so it can be embedded in other structures. Locks are taken
//! and released with explicit calls; the RAII wrappers in
//! [`sync`](crate::sync) are built on top of these.
//!
//! Dropping a primitive that is still held aborts the process.

mod barrier;
mod condvar;
mod fast_mutex;
mod recursive_mutex;
mod rwlock;
mod spinlock;
mod waitable;

pub use barrier::Barrier;
pub use condvar::Condvar;
pub use fast_mutex::FastMutex;
pub use recursive_mutex::RecursiveMutex;
pub use rwlock::RwLock;
pub use spinlock::SpinLock;
pub use waitable::WaitableWord;

use crate::error::Result;

/// A lock a [`Condvar`] can release for the length of a wait and take back
/// afterwards.
pub trait Relock {
    /// What must be restored on reacquisition (e.g. a recursion depth).
    type Saved;

    /// Stable identity of the lock, used to bind a condvar to one lock.
    fn identity(&self) -> usize;

    /// Fully releases the lock held by the calling thread.
    ///
    /// Aborts if the calling thread does not hold it.
    #[track_caller]
    fn release(&self) -> Self::Saved;

    /// Takes the lock back and restores `saved`.
    ///
    /// Errors are those of the lock's own `lock`. [`Error::OwnerDied`]
    /// still leaves the lock held.
    ///
    /// [`Error::OwnerDied`]: crate::Error::OwnerDied
    fn reacquire(&self, saved: Self::Saved) -> Result<()>;
}
