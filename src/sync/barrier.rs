use core::fmt;
use crate::raw;

/// Makes a fixed number of threads wait for each other, cycle after cycle.
///
/// ```
/// use futex_sync::sync::Barrier;
/// use std::sync::Arc;
/// use std::thread;
///
/// let n = 4;
/// let barrier = Arc::new(Barrier::new(n));
/// let handles: Vec<_> = (0..n)
///     .map(|_| {
///         let b = Arc::clone(&barrier);
///         thread::spawn(move || b.wait().is_leader())
///     })
///     .collect();
/// let leaders = handles
///     .into_iter()
///     .map(|h| h.join().unwrap())
///     .filter(|&leader| leader)
///     .count();
/// assert_eq!(leaders, 1);
/// ```
pub struct Barrier {
    inner: raw::Barrier,
}

/// What [`Barrier::wait`] returns.
///
/// Exactly one thread per cycle is the leader.
pub struct BarrierWaitResult(bool);

impl Barrier {
    /// A barrier releasing `n` threads at a time. `0` behaves like `1`.
    ///
    /// Values above `u32::MAX` are clamped.
    pub fn new(n: usize) -> Barrier {
        let threshold = u32::try_from(n).unwrap_or(u32::MAX).max(1);
        match raw::Barrier::new(threshold) {
            Ok(inner) => Barrier { inner },
            Err(_) => unreachable!("threshold is at least one"),
        }
    }

    /// Blocks until `n` threads have called `wait` in this cycle.
    pub fn wait(&self) -> BarrierWaitResult {
        BarrierWaitResult(self.inner.wait())
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier").finish_non_exhaustive()
    }
}

impl BarrierWaitResult {
    /// Whether this thread completed the cycle.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.0
    }
}

impl fmt::Debug for BarrierWaitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BarrierWaitResult").field("is_leader", &self.is_leader()).finish()
    }
}
