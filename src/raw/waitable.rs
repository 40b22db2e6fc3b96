use core::fmt;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};
use core::time::Duration;
use crate::blocking;
use crate::error::{Error, Result};
use crate::time::Deadline;

const WAITERS: u32 = 1 << 31;
const VALUE_MASK: u32 = !WAITERS;

/// A 31-bit value other threads can wait on.
///
/// Writers publish a value; readers block until it equals a target, or
/// until it differs from what they last saw. A thread about to sleep sets
/// the high `WAITERS` bit, so writers skip the wake call when nobody waits.
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use futex_sync::raw::WaitableWord;
///
/// let ready = Arc::new(WaitableWord::new(0));
/// let r = ready.clone();
/// let t = thread::spawn(move || r.publish(1));
/// ready.wait_for(1, None).unwrap();
/// t.join().unwrap();
/// ```
#[repr(C)]
pub struct WaitableWord {
    state: AtomicU32,
}

impl WaitableWord {
    /// A word holding `value`, truncated to 31 bits.
    pub const fn new(value: u32) -> WaitableWord {
        WaitableWord { state: AtomicU32::new(value & VALUE_MASK) }
    }

    /// The current value.
    pub fn load(&self) -> u32 {
        self.state.load(Acquire) & VALUE_MASK
    }

    /// Stores `value` and wakes every waiter. Returns the previous value.
    pub fn publish(&self, value: u32) -> u32 {
        let prev = self.state.swap(value & VALUE_MASK, AcqRel);
        if prev & WAITERS != 0 {
            blocking::wake_all(&self.state);
        }
        prev & VALUE_MASK
    }

    /// Adds `delta` (wrapping within 31 bits) and wakes every waiter.
    /// Returns the previous value.
    pub fn fetch_add(&self, delta: u32) -> u32 {
        let mut cur = self.state.load(Relaxed);
        loop {
            let next = (cur & VALUE_MASK).wrapping_add(delta) & VALUE_MASK;
            match self.state.compare_exchange_weak(cur, next, AcqRel, Relaxed) {
                Ok(prev) => {
                    if prev & WAITERS != 0 {
                        blocking::wake_all(&self.state);
                    }
                    return prev & VALUE_MASK;
                }
                Err(actual) => cur = actual,
            }
        }
    }

    /// Blocks until the value equals `target`.
    ///
    /// # Errors
    ///
    /// [`Error::TimedOut`] if `timeout` elapses first.
    pub fn wait_for(&self, target: u32, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.and_then(Deadline::after);
        let target = target & VALUE_MASK;
        loop {
            let cur = self.state.load(Acquire);
            if cur & VALUE_MASK == target {
                return Ok(());
            }
            self.sleep(cur, deadline.as_ref())?;
        }
    }

    /// Blocks while the value equals `current`. Returns the new value.
    ///
    /// # Errors
    ///
    /// [`Error::TimedOut`] if `timeout` elapses first.
    pub fn wait_while(&self, current: u32, timeout: Option<Duration>) -> Result<u32> {
        let deadline = timeout.and_then(Deadline::after);
        let current = current & VALUE_MASK;
        loop {
            let cur = self.state.load(Acquire);
            if cur & VALUE_MASK != current {
                return Ok(cur & VALUE_MASK);
            }
            self.sleep(cur, deadline.as_ref())?;
        }
    }

    /// Sets `WAITERS` on the observed word `cur` and sleeps on it.
    fn sleep(&self, cur: u32, deadline: Option<&Deadline>) -> Result<()> {
        let waiting = cur | WAITERS;
        if cur & WAITERS == 0
            && self.state.compare_exchange(cur, waiting, Relaxed, Relaxed).is_err()
        {
            return Ok(());
        }
        if blocking::wait_until(&self.state, waiting, deadline).timed_out() {
            return Err(Error::TimedOut);
        }
        Ok(())
    }
}

impl Default for WaitableWord {
    fn default() -> WaitableWord {
        WaitableWord::new(0)
    }
}

impl fmt::Debug for WaitableWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitableWord").field("value", &self.load()).finish()
    }
}
