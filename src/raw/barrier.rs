use core::fmt;
use core::hint;
use core::sync::atomic::{AtomicU32, AtomicU64};
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use crate::error::{Error, Result, fatal};
use crate::raw::WaitableWord;

// Arrival word: count in the low 32 bits, then the passed mark, then the
// cycle number in the top 31 bits.
const COUNT_MASK: u64 = 0xffff_ffff;
const PASSED: u64 = 1 << 32;
const CYCLE_SHIFT: u32 = 33;
const CYCLE_MASK: u32 = 0x7fff_ffff;

fn cycle_of(word: u64) -> u32 {
    (word >> CYCLE_SHIFT) as u32
}

/// A rendezvous point for a fixed number of threads, reusable cycle after
/// cycle.
///
/// A cycle has two phases. In the arrive phase every thread counts itself
/// in; the last to arrive (the golden ticket) resets the count, marks the
/// cycle passed and publishes the next cycle number everyone else sleeps
/// on. In the depart phase the woken threads count themselves out; the last
/// of them (the black ticket) resets that count and clears the passed mark.
/// The count, the mark and the cycle number share one word, so a thread
/// that comes back early, or one more than the threshold, cannot join a
/// cycle until the previous one has fully drained.
///
/// ```
/// use futex_sync::raw::Barrier;
///
/// let b = Barrier::new(1).unwrap();
/// assert!(b.wait());
/// ```
#[repr(C)]
pub struct Barrier {
    threshold: u32,
    arrivals: AtomicU64,
    departed: AtomicU32,
    /// Number of the cycle currently arriving.
    generation: WaitableWord,
    /// 1 from the golden ticket until the black ticket.
    passed: WaitableWord,
}

impl Barrier {
    /// A barrier releasing `threshold` threads at a time.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `threshold` is 0.
    pub fn new(threshold: u32) -> Result<Barrier> {
        if threshold == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(Barrier {
            threshold,
            arrivals: AtomicU64::new(0),
            departed: AtomicU32::new(0),
            generation: WaitableWord::new(0),
            passed: WaitableWord::new(0),
        })
    }

    /// Blocks until `threshold` threads have called `wait`.
    ///
    /// Returns `true` in exactly one thread per cycle, the last to arrive.
    pub fn wait(&self) -> bool {
        if self.threshold == 1 {
            return true;
        }

        let (next, golden) = self.arrive();
        if golden {
            self.passed.publish(1);
            self.generation.publish(next);
            return true;
        }

        untimed(self.generation.wait_for(next, None));

        if self.departed.fetch_add(1, AcqRel) + 1 == self.threshold - 1 {
            self.departed.store(0, Relaxed);
            // Wake early arrivals before letting them in.
            self.passed.publish(0);
            self.arrivals.fetch_and(!PASSED, Release);
        }
        false
    }

    /// Counts the caller into the current cycle once the previous one has
    /// drained. Returns the number of the cycle that follows, and whether
    /// the caller completed this one. The last arrival resets the count and
    /// sets the passed mark in the same exchange.
    fn arrive(&self) -> (u32, bool) {
        let mut cur = self.arrivals.load(Acquire);
        loop {
            if cur & PASSED != 0 {
                if self.passed.load() == 1 {
                    untimed(self.passed.wait_for(0, None));
                } else {
                    // The mark is about to be published or cleared.
                    hint::spin_loop();
                }
                cur = self.arrivals.load(Acquire);
                continue;
            }
            let next = cycle_of(cur).wrapping_add(1) & CYCLE_MASK;
            let golden = (cur & COUNT_MASK) + 1 == u64::from(self.threshold);
            let new = if golden {
                (u64::from(next) << CYCLE_SHIFT) | PASSED
            } else {
                cur + 1
            };
            match self.arrivals.compare_exchange_weak(cur, new, AcqRel, Acquire) {
                Ok(_) => return (next, golden),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Number of threads released per cycle.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Number of threads waiting in the current cycle. Only a snapshot.
    pub fn arrived(&self) -> u32 {
        (self.arrivals.load(Relaxed) & COUNT_MASK) as u32
    }
}

/// Unwraps a wait without a timeout, which only returns once satisfied.
#[track_caller]
fn untimed(result: Result<()>) {
    if let Err(err) = result {
        fatal!("Barrier", "untimed wait failed: {err}");
    }
}

impl Drop for Barrier {
    fn drop(&mut self) {
        let arrived = *self.arrivals.get_mut() & COUNT_MASK;
        if arrived != 0 {
            fatal!("Barrier", "destroyed with {arrived} threads waiting");
        }
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("threshold", &self.threshold)
            .field("arrived", &self.arrived())
            .finish()
    }
}
