use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use core::time::Duration;
use crate::blocking;
use crate::error::{Error, Result, fatal};
use crate::raw::FastMutex;
use crate::sys::thread;
use crate::time::Deadline;

const WRITE_LOCKED: u32 = 1 << 31;
const WAITERS: u32 = 1 << 30;
const READ_LOCKED: u32 = 1 << 29;
const READERS_MASK: u32 = READ_LOCKED - 1;

thread_local! {
    /// Read locks held by this thread: lock address and hold count.
    static READ_HELD: RefCell<Vec<(usize, u32)>> = const { RefCell::new(Vec::new()) };
}

/// A reader-writer lock with writer preference.
///
/// Writers hold an internal gate mutex for their whole critical section.
/// New readers pass through the same gate before joining, so once a writer
/// is queued on the gate no new reader gets in ahead of it. A thread that
/// already holds a read lock re-enters without the gate.
///
/// The lock tracks which thread holds what: [`unlock`](Self::unlock) needs
/// no hint, and self-deadlocks are reported as [`Error::Deadlock`]:
///
/// * write lock while holding the write lock,
/// * read lock while holding the write lock,
/// * write lock while holding a read lock.
///
/// ```
/// use futex_sync::raw::RwLock;
///
/// let l = RwLock::new();
/// l.read_lock().unwrap();
/// l.read_lock().unwrap();
/// assert_eq!(l.readers(), 2);
/// assert!(l.write_lock().is_err());
/// l.unlock();
/// l.unlock();
/// l.write_lock().unwrap();
/// l.unlock();
/// ```
#[repr(C)]
pub struct RwLock {
    /// WRITE_LOCKED | WAITERS | READ_LOCKED | reader count
    state: AtomicU32,
    /// Current writer's thread id, or 0.
    writer: AtomicU32,
    /// Writers holding or queued on the gate.
    writers: AtomicU32,
    gate: FastMutex,
}

impl RwLock {
    /// An unlocked lock.
    pub const fn new() -> RwLock {
        RwLock {
            state: AtomicU32::new(0),
            writer: AtomicU32::new(0),
            writers: AtomicU32::new(0),
            gate: FastMutex::new(),
        }
    }

    /// Blocks until the calling thread shares the lock.
    ///
    /// # Errors
    ///
    /// [`Error::Deadlock`] if the caller holds the write lock;
    /// [`Error::WouldBlock`] if the reader count is saturated.
    pub fn read_lock(&self) -> Result<()> {
        self.read_inner(None)
    }

    /// Like [`read_lock`](Self::read_lock), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// As [`read_lock`](Self::read_lock), plus [`Error::TimedOut`].
    pub fn read_lock_timeout(&self, timeout: Duration) -> Result<()> {
        self.read_inner(Deadline::after(timeout).as_ref())
    }

    /// Shares the lock if that is possible without blocking.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] if a writer holds or is queued for the lock, and the
    /// errors of [`read_lock`](Self::read_lock).
    pub fn try_read_lock(&self) -> Result<()> {
        self.check_not_writer()?;
        if self.held_reads() > 0 {
            return self.reenter_read();
        }

        // Readers pass the gate only briefly; a writer is what makes us wait.
        if self.writers.load(Acquire) != 0 {
            return Err(Error::Busy);
        }
        let mut cur = self.state.load(Relaxed);
        loop {
            if cur & WRITE_LOCKED != 0 {
                return Err(Error::Busy);
            }
            self.add_reader(cur)?;
            match self.state.compare_exchange_weak(cur, (cur + 1) | READ_LOCKED, Acquire, Relaxed) {
                Ok(_) => return self.record_read(),
                Err(actual) => cur = actual,
            }
        }
    }

    fn read_inner(&self, deadline: Option<&Deadline>) -> Result<()> {
        self.check_not_writer()?;
        if self.held_reads() > 0 {
            return self.reenter_read();
        }

        // Queue behind any writer already holding the gate.
        match deadline {
            Some(deadline) => self.gate.lock_until(deadline)?,
            None => self.gate.lock(),
        }
        self.gate.unlock();

        let mut cur = self.state.load(Relaxed);
        loop {
            if cur & WRITE_LOCKED == 0 {
                self.add_reader(cur)?;
                match self.state.compare_exchange_weak(cur, (cur + 1) | READ_LOCKED, Acquire, Relaxed) {
                    Ok(_) => return self.record_read(),
                    Err(actual) => {
                        cur = actual;
                        continue;
                    }
                }
            }

            // A writer slipped in between the gate and here.
            cur = self.sleep(cur, deadline)?;
        }
    }

    fn reenter_read(&self) -> Result<()> {
        // Our own read lock keeps WRITE_LOCKED clear.
        let mut cur = self.state.load(Relaxed);
        loop {
            self.add_reader(cur)?;
            match self.state.compare_exchange_weak(cur, cur + 1, Acquire, Relaxed) {
                Ok(_) => return self.record_read(),
                Err(actual) => cur = actual,
            }
        }
    }

    fn add_reader(&self, cur: u32) -> Result<()> {
        if cur & READERS_MASK == READERS_MASK {
            return Err(Error::WouldBlock);
        }
        Ok(())
    }

    /// Blocks until the calling thread holds the lock exclusively.
    ///
    /// # Errors
    ///
    /// [`Error::Deadlock`] if the caller already holds the lock in either
    /// mode.
    pub fn write_lock(&self) -> Result<()> {
        self.write_inner(None)
    }

    /// Like [`write_lock`](Self::write_lock), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// As [`write_lock`](Self::write_lock), plus [`Error::TimedOut`].
    pub fn write_lock_timeout(&self, timeout: Duration) -> Result<()> {
        self.write_inner(Deadline::after(timeout).as_ref())
    }

    /// Takes the lock exclusively if it is free.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] if anyone holds it, and the errors of
    /// [`write_lock`](Self::write_lock).
    pub fn try_write_lock(&self) -> Result<()> {
        self.check_not_holder()?;
        if self.writers.fetch_add(1, Acquire) != 0 {
            self.writers.fetch_sub(1, Release);
            return Err(Error::Busy);
        }
        // Other writers now see us; a failing gate means a reader is passing.
        while self.gate.try_lock().is_err() {
            if self.state.load(Relaxed) & !WAITERS != 0 {
                self.writers.fetch_sub(1, Release);
                return Err(Error::Busy);
            }
            core::hint::spin_loop();
        }
        let cur = self.state.load(Relaxed);
        if cur & !WAITERS == 0
            && self.state.compare_exchange(cur, cur | WRITE_LOCKED, Acquire, Relaxed).is_ok()
        {
            self.writer.store(thread::current_id(), Relaxed);
            return Ok(());
        }
        self.gate.unlock();
        self.writers.fetch_sub(1, Release);
        Err(Error::Busy)
    }

    fn write_inner(&self, deadline: Option<&Deadline>) -> Result<()> {
        self.check_not_holder()?;
        self.writers.fetch_add(1, Acquire);
        match deadline {
            Some(deadline) => {
                if let Err(err) = self.gate.lock_until(deadline) {
                    self.writers.fetch_sub(1, Release);
                    return Err(err);
                }
            }
            None => self.gate.lock(),
        }

        // Holding the gate, wait for the readers admitted before us.
        let mut cur = self.state.load(Relaxed);
        loop {
            if cur & !WAITERS == 0 {
                match self.state.compare_exchange_weak(cur, cur | WRITE_LOCKED, Acquire, Relaxed) {
                    Ok(_) => {
                        self.writer.store(thread::current_id(), Relaxed);
                        return Ok(());
                    }
                    Err(actual) => {
                        cur = actual;
                        continue;
                    }
                }
            }

            cur = match self.sleep(cur, deadline) {
                Ok(cur) => cur,
                Err(err) => {
                    self.gate.unlock();
                    self.writers.fetch_sub(1, Release);
                    return Err(err);
                }
            };
        }
    }

    /// Sets `WAITERS` on the observed word `cur`, sleeps, and returns the
    /// word seen afterwards.
    fn sleep(&self, cur: u32, deadline: Option<&Deadline>) -> Result<u32> {
        let waiting = cur | WAITERS;
        if cur & WAITERS == 0 {
            if let Err(actual) = self.state.compare_exchange_weak(cur, waiting, Relaxed, Relaxed) {
                return Ok(actual);
            }
        }
        log::trace!("RwLock {:p}: sleeping on {waiting:#x}", self);
        if blocking::wait_until(&self.state, waiting, deadline).timed_out() {
            return Err(Error::TimedOut);
        }
        Ok(self.state.load(Relaxed))
    }

    /// Releases whatever the calling thread holds: the write lock, or one
    /// level of its read lock.
    ///
    /// Aborts if the calling thread holds neither.
    #[track_caller]
    pub fn unlock(&self) {
        if self.writer.load(Relaxed) == thread::current_id() {
            self.write_unlock();
        } else if self.forget_read() {
            self.read_unlock();
        } else {
            fatal!("RwLock", "unlock by a thread that holds neither a read nor the write lock");
        }
    }

    fn write_unlock(&self) {
        self.writer.store(0, Relaxed);
        if self.state.swap(0, Release) & WAITERS != 0 {
            blocking::wake_all(&self.state);
        }
        self.gate.unlock();
        self.writers.fetch_sub(1, Release);
    }

    fn read_unlock(&self) {
        let mut cur = self.state.load(Relaxed);
        loop {
            let next = if cur & READERS_MASK == 1 { 0 } else { cur - 1 };
            match self.state.compare_exchange_weak(cur, next, Release, Relaxed) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        // The last reader wakes a writer waiting for the count to drain.
        if cur & READERS_MASK == 1 && cur & WAITERS != 0 {
            blocking::wake_all(&self.state);
        }
    }

    /// Number of read locks held, over all threads. Only a snapshot.
    pub fn readers(&self) -> u32 {
        self.state.load(Relaxed) & READERS_MASK
    }

    /// Whether some thread holds the write lock. Only a snapshot.
    pub fn is_write_locked(&self) -> bool {
        self.state.load(Relaxed) & WRITE_LOCKED != 0
    }

    fn check_not_writer(&self) -> Result<()> {
        if self.writer.load(Relaxed) == thread::current_id() {
            return Err(Error::Deadlock);
        }
        Ok(())
    }

    fn check_not_holder(&self) -> Result<()> {
        self.check_not_writer()?;
        if self.held_reads() > 0 {
            return Err(Error::Deadlock);
        }
        Ok(())
    }

    fn key(&self) -> usize {
        &self.state as *const AtomicU32 as usize
    }

    fn held_reads(&self) -> u32 {
        let key = self.key();
        READ_HELD
            .try_with(|held| {
                held.borrow().iter().find(|(k, _)| *k == key).map_or(0, |&(_, n)| n)
            })
            .unwrap_or(0)
    }

    /// Notes a read hold taken by the calling thread. If the thread's
    /// records are already torn down, gives the hold back instead.
    fn record_read(&self) -> Result<()> {
        let key = self.key();
        let recorded = READ_HELD.try_with(|held| {
            let mut held = held.borrow_mut();
            match held.iter_mut().find(|(k, _)| *k == key) {
                Some((_, n)) => *n += 1,
                None => held.push((key, 1)),
            }
        });
        if recorded.is_err() {
            self.read_unlock();
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Drops one read hold of the calling thread; false if it had none.
    fn forget_read(&self) -> bool {
        let key = self.key();
        READ_HELD
            .try_with(|held| {
                let mut held = held.borrow_mut();
                let Some(pos) = held.iter().position(|(k, _)| *k == key) else {
                    return false;
                };
                held[pos].1 -= 1;
                if held[pos].1 == 0 {
                    held.swap_remove(pos);
                }
                true
            })
            .unwrap_or(false)
    }
}

impl Default for RwLock {
    fn default() -> RwLock {
        RwLock::new()
    }
}

impl Drop for RwLock {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if state & !WAITERS != 0 {
            fatal!("RwLock", "destroyed while locked ({state:#x})");
        }
    }
}

impl fmt::Debug for RwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLock")
            .field("readers", &self.readers())
            .field("write_locked", &self.is_write_locked())
            .finish()
    }
}
