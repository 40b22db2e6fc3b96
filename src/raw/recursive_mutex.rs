use core::fmt;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use core::time::Duration;
use crate::blocking;
use crate::caps::{self, PiOps, PriorityInheritance};
use crate::config::{MutexAttr, Protocol, Robustness};
use crate::error::{Error, Result, fatal};
use crate::raw::Relock;
use crate::registry::{ThreadHandle, ThreadRegistry};
use crate::sys::thread;
use crate::time::Deadline;

// Same layout as a Linux PI futex word, so the kernel can manage it.
const OWNER_MASK: u32 = 0x3fff_ffff;
const OWNER_DIED: u32 = 0x4000_0000;
const WAITERS: u32 = 0x8000_0000;

/// Owner field of a robust mutex that was released while inconsistent.
const NOT_RECOVERABLE: u32 = OWNER_MASK;

#[derive(Clone, Copy)]
enum Mode {
    /// Bit-flag protocol with the thread id as payload.
    Plain,
    /// Contention is handed to the kernel's PI futex operations.
    PriorityInherit(PiOps),
    /// Owners are registry handles, checked for liveness while waiting.
    Robust { registry: &'static ThreadRegistry, poll: Duration },
}

/// An owner-tracked mutex the owning thread may lock repeatedly.
///
/// The owner word holds the owner's id in its low 30 bits and waiter and
/// owner-death flags above. A separate counter holds the recursion depth;
/// only the owner reads or writes it. The lock is released when the owner
/// has called [`unlock`](Self::unlock) once per successful lock.
///
/// Three flavors share this layout:
///
/// * the default bit-flag protocol, keyed by [`current_id`](crate::current_id);
/// * [priority inheritance](Protocol::Inherit), where the kernel queues
///   waiters and boosts the owner (Linux only, probed once; falls back to
///   the bit-flag protocol elsewhere);
/// * [robust](Self::robust), where the owner is a [`ThreadHandle`] and a
///   waiter that finds the owner gone takes the lock over and is told
///   through [`Error::OwnerDied`].
///
/// ```
/// use futex_sync::raw::RecursiveMutex;
///
/// let m = RecursiveMutex::new();
/// m.lock().unwrap();
/// m.lock().unwrap();
/// assert_eq!(m.depth(), 2);
/// m.unlock();
/// m.unlock();
/// assert!(!m.is_locked());
/// ```
#[repr(C)]
pub struct RecursiveMutex {
    owner: AtomicU32,
    depth: AtomicU32,
    mode: Mode,
}

impl RecursiveMutex {
    /// An unlocked, stalled mutex without priority inheritance.
    pub const fn new() -> RecursiveMutex {
        RecursiveMutex { owner: AtomicU32::new(0), depth: AtomicU32::new(0), mode: Mode::Plain }
    }

    /// An unlocked robust mutex whose owners register with `registry`.
    pub const fn robust(registry: &'static ThreadRegistry) -> RecursiveMutex {
        RecursiveMutex {
            owner: AtomicU32::new(0),
            depth: AtomicU32::new(0),
            mode: Mode::Robust { registry, poll: MutexAttr::new().robust_poll },
        }
    }

    /// An unlocked mutex configured by `attr`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a robust mutex without a registry, or
    /// for robust plus priority inheritance; [`Error::Unsupported`] for
    /// shared scope.
    pub fn with_attr(
        attr: MutexAttr,
        registry: Option<&'static ThreadRegistry>,
    ) -> Result<RecursiveMutex> {
        attr.validate()?;
        let mode = match (attr.robustness, attr.protocol) {
            (Robustness::Robust, _) => match registry {
                Some(registry) => Mode::Robust { registry, poll: attr.robust_poll },
                None => return Err(Error::InvalidArgument),
            },
            (Robustness::Stalled, Protocol::Inherit) => {
                match caps::try_use::<PriorityInheritance>() {
                    Some(ops) => Mode::PriorityInherit(ops),
                    None => {
                        log::debug!("priority inheritance unavailable, using plain protocol");
                        Mode::Plain
                    }
                }
            }
            (Robustness::Stalled, Protocol::None) => Mode::Plain,
        };
        Ok(RecursiveMutex { owner: AtomicU32::new(0), depth: AtomicU32::new(0), mode })
    }

    /// Blocks until the calling thread owns the mutex.
    ///
    /// Returns immediately, deepening the recursion, if it already does.
    ///
    /// # Errors
    ///
    /// * [`Error::OwnerDied`]: robust only; the lock **is held** and the
    ///   protected state must be repaired, then
    ///   [`mark_consistent`](Self::mark_consistent) called.
    /// * [`Error::NotRecoverable`]: robust only; the lock is dead.
    /// * [`Error::WouldBlock`]: the recursion depth would overflow.
    /// * [`Error::Exhausted`]: robust only; the registry is full.
    pub fn lock(&self) -> Result<()> {
        self.lock_inner(None)
    }

    /// Like [`lock`](Self::lock), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// As [`lock`](Self::lock), plus [`Error::TimedOut`].
    pub fn lock_timeout(&self, timeout: Duration) -> Result<()> {
        self.lock_inner(Deadline::after(timeout).as_ref())
    }

    /// Like [`lock`](Self::lock), giving up at `deadline`.
    ///
    /// # Errors
    ///
    /// As [`lock`](Self::lock), plus [`Error::TimedOut`].
    pub fn lock_until(&self, deadline: &Deadline) -> Result<()> {
        self.lock_inner(Some(deadline))
    }

    /// Takes the mutex if it is free or already owned by the caller.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] if another thread owns it, and the robust errors of
    /// [`lock`](Self::lock).
    pub fn try_lock(&self) -> Result<()> {
        let me = self.current_owner()?;
        let cur = self.owner.load(Relaxed);
        if cur & OWNER_MASK == me {
            return self.reenter();
        }

        match self.mode {
            Mode::Plain => self.try_acquire(me, cur, 0),
            Mode::PriorityInherit(ops) => {
                if self.owner.compare_exchange(0, me, Acquire, Relaxed).is_ok() {
                    return self.acquired(Ok(()));
                }
                // Waiter bits without an owner are the kernel's to resolve.
                if cur & OWNER_MASK == 0 && (ops.trylock)(&self.owner).is_ok() {
                    return self.acquired(Ok(()));
                }
                Err(Error::Busy)
            }
            Mode::Robust { registry, .. } => match self.try_robust(registry, me, cur, 0)? {
                Some(result) => result,
                None => Err(Error::Busy),
            },
        }
    }

    fn lock_inner(&self, deadline: Option<&Deadline>) -> Result<()> {
        let me = self.current_owner()?;
        let cur = self.owner.load(Relaxed);
        if cur & OWNER_MASK == me {
            return self.reenter();
        }

        match self.mode {
            Mode::Plain => self.lock_plain(me, deadline),
            Mode::PriorityInherit(ops) => self.lock_pi(ops, me, deadline),
            Mode::Robust { registry, poll } => self.lock_robust(registry, poll, me, deadline),
        }
    }

    fn reenter(&self) -> Result<()> {
        let depth = self.depth.load(Relaxed);
        if depth == u32::MAX {
            return Err(Error::WouldBlock);
        }
        self.depth.store(depth + 1, Relaxed);
        Ok(())
    }

    /// Records a fresh acquisition; passes `result` through.
    fn acquired(&self, result: Result<()>) -> Result<()> {
        self.depth.store(1, Relaxed);
        result
    }

    /// One attempt of the bit-flag protocol. `extra` is OR-ed into the word.
    fn try_acquire(&self, me: u32, cur: u32, extra: u32) -> Result<()> {
        if cur & OWNER_MASK != 0 {
            return Err(Error::Busy);
        }
        match self.owner.compare_exchange(cur, me | (cur & WAITERS) | extra, Acquire, Relaxed) {
            Ok(_) => self.acquired(Ok(())),
            Err(_) => Err(Error::Busy),
        }
    }

    fn lock_plain(&self, me: u32, deadline: Option<&Deadline>) -> Result<()> {
        if self.owner.compare_exchange(0, me, Acquire, Relaxed).is_ok() {
            return self.acquired(Ok(()));
        }

        loop {
            let cur = self.owner.load(Relaxed);
            if cur & OWNER_MASK == 0 {
                // Having contended, take it with WAITERS so our unlock wakes
                // whoever still sleeps.
                if self.try_acquire(me, cur, WAITERS).is_ok() {
                    return Ok(());
                }
                continue;
            }

            let waiting = cur | WAITERS;
            if cur & WAITERS == 0
                && self.owner.compare_exchange_weak(cur, waiting, Relaxed, Relaxed).is_err()
            {
                continue;
            }
            log::trace!("RecursiveMutex {:p}: sleeping on owner {}", self, cur & OWNER_MASK);
            if blocking::wait_until(&self.owner, waiting, deadline).timed_out() {
                return Err(Error::TimedOut);
            }
        }
    }

    #[track_caller]
    fn lock_pi(&self, ops: PiOps, me: u32, deadline: Option<&Deadline>) -> Result<()> {
        if self.owner.compare_exchange(0, me, Acquire, Relaxed).is_ok() {
            return self.acquired(Ok(()));
        }

        log::trace!("RecursiveMutex {:p}: FUTEX_LOCK_PI", self);
        match (ops.lock)(&self.owner, deadline) {
            Ok(()) => self.acquired(Ok(())),
            Err(Error::TimedOut) => Err(Error::TimedOut),
            Err(err) => fatal!("RecursiveMutex", "priority-inheritance lock failed: {err}"),
        }
    }

    /// One attempt of the robust protocol.
    ///
    /// `Ok(None)` means a live thread owns the lock.
    fn try_robust(
        &self,
        registry: &ThreadRegistry,
        me: u32,
        cur: u32,
        extra: u32,
    ) -> Result<Option<Result<()>>> {
        let owner = cur & OWNER_MASK;
        if owner == NOT_RECOVERABLE {
            return Err(Error::NotRecoverable);
        }
        if owner == 0 {
            return Ok(self.try_acquire(me, cur, extra).ok().map(Ok));
        }

        let alive = ThreadHandle::from_raw(owner).is_some_and(|h| registry.is_live(h));
        if alive {
            return Ok(None);
        }

        // The owner exited while holding the lock.
        let taken = me | OWNER_DIED | (cur & WAITERS) | extra;
        if self.owner.compare_exchange(cur, taken, Acquire, Relaxed).is_err() {
            // Someone else took it over first, or the word changed.
            return Ok(None);
        }
        log::warn!("RecursiveMutex {:p}: owner {owner:#x} died holding the lock", self);
        Ok(Some(self.acquired(Err(Error::OwnerDied))))
    }

    fn lock_robust(
        &self,
        registry: &ThreadRegistry,
        poll: Duration,
        me: u32,
        deadline: Option<&Deadline>,
    ) -> Result<()> {
        let mut extra = 0;
        loop {
            let cur = self.owner.load(Relaxed);
            if let Some(result) = self.try_robust(registry, me, cur, extra)? {
                return result;
            }
            if cur & OWNER_MASK == 0 {
                continue;
            }

            let waiting = cur | WAITERS;
            if cur & WAITERS == 0
                && self.owner.compare_exchange_weak(cur, waiting, Relaxed, Relaxed).is_err()
            {
                continue;
            }
            extra = WAITERS;

            // Sleep in slices so a dead owner is noticed without a wakeup.
            let slice = match deadline {
                Some(deadline) => Some(deadline.min_after(poll)),
                None => Deadline::after(poll),
            };
            let outcome = blocking::wait_until(&self.owner, waiting, slice.as_ref());
            if outcome.timed_out() && deadline.is_some_and(Deadline::has_expired) {
                return Err(Error::TimedOut);
            }
        }
    }

    /// Releases one level of recursion; the last one unlocks.
    ///
    /// Aborts the process if the calling thread does not own the mutex.
    /// Releasing a robust mutex that is still marked inconsistent makes it
    /// permanently unusable.
    #[track_caller]
    pub fn unlock(&self) {
        let cur = self.owner.load(Relaxed);
        if !self.owned_by_caller(cur) {
            fatal!("RecursiveMutex", "unlock by a thread that does not own the mutex");
        }

        let depth = self.depth.load(Relaxed);
        if depth > 1 {
            self.depth.store(depth - 1, Relaxed);
            return;
        }
        self.release_fully(cur);
    }

    #[track_caller]
    fn release_fully(&self, cur: u32) {
        self.depth.store(0, Relaxed);

        match self.mode {
            Mode::PriorityInherit(ops) => {
                let me = cur & OWNER_MASK;
                if self.owner.compare_exchange(me, 0, Release, Relaxed).is_err() {
                    if let Err(err) = (ops.unlock)(&self.owner) {
                        fatal!("RecursiveMutex", "priority-inheritance unlock failed: {err}");
                    }
                }
            }
            Mode::Robust { .. } if cur & OWNER_DIED != 0 => {
                // Only the owner clears OWNER_DIED, so it is still set.
                self.owner.swap(NOT_RECOVERABLE, Release);
                log::error!(
                    "RecursiveMutex {:p}: released without mark_consistent, now not recoverable",
                    self
                );
                blocking::wake_all(&self.owner);
            }
            Mode::Plain | Mode::Robust { .. } => {
                if self.owner.swap(0, Release) & WAITERS != 0 {
                    blocking::wake_one(&self.owner);
                }
            }
        }
    }

    /// Declares the state protected by a robust mutex repaired after
    /// [`Error::OwnerDied`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidOwner`] if the caller does not own the mutex;
    /// [`Error::InvalidArgument`] if it is not robust or not inconsistent.
    pub fn mark_consistent(&self) -> Result<()> {
        let Mode::Robust { .. } = self.mode else {
            return Err(Error::InvalidArgument);
        };
        let cur = self.owner.load(Relaxed);
        if !self.owned_by_caller(cur) {
            return Err(Error::InvalidOwner);
        }
        if cur & OWNER_DIED == 0 {
            return Err(Error::InvalidArgument);
        }
        self.owner.fetch_and(!OWNER_DIED, Relaxed);
        Ok(())
    }

    /// Whether any thread owns the mutex. Only a snapshot.
    pub fn is_locked(&self) -> bool {
        let owner = self.owner.load(Relaxed) & OWNER_MASK;
        owner != 0 && owner != NOT_RECOVERABLE
    }

    /// Whether the calling thread owns the mutex.
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owned_by_caller(self.owner.load(Relaxed))
    }

    /// Recursion depth if the calling thread owns the mutex, else 0.
    pub fn depth(&self) -> u32 {
        if self.is_owned_by_current_thread() {
            self.depth.load(Relaxed)
        } else {
            0
        }
    }

    /// Whether the mutex uses kernel priority inheritance.
    pub fn is_priority_inheriting(&self) -> bool {
        matches!(self.mode, Mode::PriorityInherit(_))
    }

    /// Id the calling thread is recorded under.
    fn current_owner(&self) -> Result<u32> {
        match self.mode {
            Mode::Robust { registry, .. } => Ok(registry.register()?.into_raw()),
            Mode::Plain | Mode::PriorityInherit(_) => Ok(thread::current_id()),
        }
    }

    fn owned_by_caller(&self, cur: u32) -> bool {
        let owner = cur & OWNER_MASK;
        if owner == 0 || owner == NOT_RECOVERABLE {
            return false;
        }
        match self.mode {
            // No registration happens here; an unregistered thread owns nothing.
            Mode::Robust { registry, .. } => {
                registry.current().is_some_and(|h| h.into_raw() == owner)
            }
            Mode::Plain | Mode::PriorityInherit(_) => owner == thread::current_id(),
        }
    }
}

impl Relock for RecursiveMutex {
    type Saved = u32;

    fn identity(&self) -> usize {
        &self.owner as *const AtomicU32 as usize
    }

    #[track_caller]
    fn release(&self) -> u32 {
        let cur = self.owner.load(Relaxed);
        if !self.owned_by_caller(cur) {
            fatal!("RecursiveMutex", "condvar wait by a thread that does not own the mutex");
        }
        let depth = self.depth.load(Relaxed);
        self.release_fully(cur);
        depth
    }

    fn reacquire(&self, depth: u32) -> Result<()> {
        let result = self.lock();
        if matches!(result, Ok(()) | Err(Error::OwnerDied)) {
            self.depth.store(depth, Relaxed);
        }
        result
    }
}

impl Default for RecursiveMutex {
    fn default() -> RecursiveMutex {
        RecursiveMutex::new()
    }
}

impl Drop for RecursiveMutex {
    fn drop(&mut self) {
        let owner = *self.owner.get_mut() & OWNER_MASK;
        if owner != 0 && owner != NOT_RECOVERABLE {
            fatal!("RecursiveMutex", "destroyed while locked by {owner:#x}");
        }
    }
}

impl fmt::Debug for RecursiveMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            Mode::Plain => "plain",
            Mode::PriorityInherit(_) => "priority-inherit",
            Mode::Robust { .. } => "robust",
        };
        f.debug_struct("RecursiveMutex")
            .field("mode", &mode)
            .field("locked", &self.is_locked())
            .finish()
    }
}
