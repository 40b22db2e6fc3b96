use core::fmt;
use core::hint;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use crate::config::SpinConfig;
use crate::error::{Error, Result, fatal};
use crate::sys::thread;

/// A lock that never sleeps in the kernel.
///
/// Contended [`lock`](Self::lock) calls spin with exponential backoff,
/// then yield the time slice, then sleep briefly, as configured by
/// [`SpinConfig`]. Meant for critical sections a few instructions long.
/// There is no fairness.
///
/// ```
/// use futex_sync::raw::SpinLock;
///
/// let s = SpinLock::new();
/// s.lock();
/// assert!(s.try_lock().is_err());
/// s.unlock();
/// ```
#[repr(C)]
pub struct SpinLock {
    /// 0: free, 1: held
    state: AtomicU32,
}

impl SpinLock {
    /// A free lock.
    pub const fn new() -> SpinLock {
        SpinLock { state: AtomicU32::new(0) }
    }

    /// Takes the lock if it is free.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] if it is held.
    #[inline]
    pub fn try_lock(&self) -> Result<()> {
        match self.state.compare_exchange(0, 1, Acquire, Relaxed) {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::Busy),
        }
    }

    /// Spins until the lock is taken, using the default backoff.
    #[inline]
    pub fn lock(&self) {
        if self.try_lock().is_err() {
            self.lock_contended(&SpinConfig::new());
        }
    }

    /// Spins until the lock is taken, using `config`'s backoff.
    pub fn lock_with(&self, config: &SpinConfig) {
        if self.try_lock().is_err() {
            self.lock_contended(config);
        }
    }

    #[cold]
    fn lock_contended(&self, config: &SpinConfig) {
        let mut round = 0u32;
        loop {
            // Wait on a plain load, then try the CAS once it looks free.
            while self.state.load(Relaxed) != 0 {
                backoff(config, round);
                round = round.saturating_add(1);
            }
            if self.try_lock().is_ok() {
                return;
            }
        }
    }

    /// Releases the lock. Aborts if it is not held.
    #[inline]
    #[track_caller]
    pub fn unlock(&self) {
        if self.state.swap(0, Release) != 1 {
            fatal!("SpinLock", "unlock of a lock that is not held");
        }
    }

    /// Whether the lock is held. Only a snapshot.
    pub fn is_locked(&self) -> bool {
        self.state.load(Relaxed) != 0
    }
}

fn backoff(config: &SpinConfig, round: u32) {
    if round < config.spin_rounds {
        for _ in 0..1u32 << round.min(16) {
            hint::spin_loop();
        }
    } else if round < config.spin_rounds.saturating_add(config.yield_rounds) {
        thread::yield_now();
    } else {
        thread::sleep(config.sleep);
    }
}

impl Default for SpinLock {
    fn default() -> SpinLock {
        SpinLock::new()
    }
}

impl Drop for SpinLock {
    fn drop(&mut self) {
        if *self.state.get_mut() != 0 {
            fatal!("SpinLock", "destroyed while held");
        }
    }
}

impl fmt::Debug for SpinLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock").field("locked", &self.is_locked()).finish()
    }
}
