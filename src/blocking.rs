//! Wait on a 32-bit word until woken, and wake waiters of a word.
//!
//! This is the only blocking facility the primitives use: `futex` on Linux,
//! `WaitOnAddress` on Windows. Interrupted waits are retried internally.
//! A failure the kernel should never report aborts the process, since it
//! leaves a lock word in a state nobody can reason about.

use core::sync::atomic::AtomicU32;
use core::time::Duration;
use crate::sys;
use crate::time::Deadline;

/// Why a wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitOutcome {
    /// Woken by a wake call, or spuriously.
    Woken,
    /// The word no longer held the expected value when the wait began.
    ValueChanged,
    /// The timeout elapsed.
    TimedOut,
}

impl WaitOutcome {
    /// Whether the wait ended because the timeout elapsed.
    pub fn timed_out(self) -> bool {
        self == WaitOutcome::TimedOut
    }
}

/// Blocks while `word == expected`, for at most `timeout`.
///
/// A timeout too large to represent waits forever.
pub fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    let deadline = timeout.and_then(Deadline::after);
    sys::futex_wait(word, expected, deadline.as_ref())
}

/// Blocks while `word == expected`, until `deadline` if one is given.
pub fn wait_until(word: &AtomicU32, expected: u32, deadline: Option<&Deadline>) -> WaitOutcome {
    sys::futex_wait(word, expected, deadline)
}

/// Wakes one thread blocked on `word`.
///
/// Returns whether a thread was woken, where the platform can tell.
pub fn wake_one(word: &AtomicU32) -> bool {
    sys::futex_wake(word)
}

/// Wakes every thread blocked on `word`.
pub fn wake_all(word: &AtomicU32) {
    sys::futex_wake_all(word)
}
