use core::ptr::null;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::Relaxed;
use syscalls::{syscall, Errno, Sysno};
use crate::blocking::WaitOutcome;
use crate::error::fatal;
use crate::time::{ClockId, Deadline, Timespec};

/// Waits for a `futex_wake` operation to wake us.
///
/// Returns directly if the futex doesn't hold the expected value. The
/// deadline is handed to the kernel as an absolute time on its precise
/// base clock, so time spent in spurious wakeups is accounted for without
/// re-arming. A coarse deadline is only reported as timed out once it has
/// passed on the coarse clock too.
pub fn futex_wait(futex: &AtomicU32, expected: u32, deadline: Option<&Deadline>) -> WaitOutcome {
    loop {
        // No need to wait if the value already changed.
        if futex.load(Relaxed) != expected {
            return WaitOutcome::ValueChanged;
        }

        // The kernel only knows the precise clocks.
        let base = match deadline.map(Deadline::on_base_clock) {
            Some(None) => return WaitOutcome::TimedOut,
            Some(base) => base,
            None => None,
        };
        // Overflows are rounded up to an infinite timeout (None).
        let timespec = base.and_then(|d| d.instant().to_timespec());

        let mut op = nc::FUTEX_WAIT_BITSET | nc::FUTEX_PRIVATE_FLAG;
        if base.is_some_and(|d| d.clock().is_realtime()) {
            op |= nc::FUTEX_CLOCK_REALTIME;
        }

        let r = unsafe {
            // Use FUTEX_WAIT_BITSET rather than FUTEX_WAIT to be able to give an
            // absolute time rather than a relative time.
            syscall!(
                Sysno::futex,
                futex as *const AtomicU32,
                op,
                expected,
                timespec.as_ref().map_or(null(), |t| t as *const nc::timespec_t),
                null::<u32>(), // This argument is unused for FUTEX_WAIT_BITSET.
                !0u32          // A full bitmask, to make it behave like a regular FUTEX_WAIT.
            )
        };

        match r {
            Ok(_) => return WaitOutcome::Woken,
            Err(Errno::EAGAIN) => return WaitOutcome::ValueChanged,
            Err(Errno::ETIMEDOUT) if deadline.is_none_or(Deadline::confirms_timeout) => {
                return WaitOutcome::TimedOut;
            }
            Err(Errno::ETIMEDOUT) | Err(Errno::EINTR) => continue,
            Err(errno) => fatal!("futex", "FUTEX_WAIT_BITSET failed: {errno:?}"),
        }
    }
}

/// Wakes up one thread that's blocked on `futex_wait` on this futex.
///
/// Returns true if this actually woke up such a thread,
/// or false if no thread was waiting on this futex.
pub fn futex_wake(futex: &AtomicU32) -> bool {
    let ptr = futex as *const AtomicU32;
    let op = nc::FUTEX_WAKE | nc::FUTEX_PRIVATE_FLAG;
    match unsafe { syscall!(Sysno::futex, ptr, op, 1) } {
        Ok(woken) => woken > 0,
        Err(errno) => fatal!("futex", "FUTEX_WAKE failed: {errno:?}"),
    }
}

/// Wakes up all threads that are waiting on `futex_wait` on this futex.
pub fn futex_wake_all(futex: &AtomicU32) {
    let ptr = futex as *const AtomicU32;
    let op = nc::FUTEX_WAKE | nc::FUTEX_PRIVATE_FLAG;
    if let Err(errno) = unsafe { syscall!(Sysno::futex, ptr, op, i32::MAX) } {
        fatal!("futex", "FUTEX_WAKE (all) failed: {errno:?}");
    }
}

/// Acquires a priority-inheritance futex through the kernel.
///
/// The word must follow the PI layout: owner TID in the low 30 bits,
/// `FUTEX_WAITERS` and `FUTEX_OWNER_DIED` above. The kernel always measures
/// the timeout against `CLOCK_REALTIME`.
pub fn futex_lock_pi(futex: &AtomicU32, deadline: Option<&Deadline>) -> Result<(), Errno> {
    let timespec = deadline
        .and_then(realtime_instant)
        .and_then(|t| t.to_timespec());
    let op = nc::FUTEX_LOCK_PI | nc::FUTEX_PRIVATE_FLAG;

    loop {
        let r = unsafe {
            syscall!(
                Sysno::futex,
                futex as *const AtomicU32,
                op,
                0u32,
                timespec.as_ref().map_or(null(), |t| t as *const nc::timespec_t),
                null::<u32>(),
                0u32
            )
        };
        match r {
            Err(Errno::EINTR) => continue,
            r => return r.map(drop),
        }
    }
}

/// Takes a PI futex whose word only carries kernel-managed bits.
pub fn futex_trylock_pi(futex: &AtomicU32) -> Result<(), Errno> {
    let op = nc::FUTEX_TRYLOCK_PI | nc::FUTEX_PRIVATE_FLAG;
    unsafe { syscall!(Sysno::futex, futex as *const AtomicU32, op, 0u32) }.map(drop)
}

/// Hands a PI futex to the highest-priority waiter.
pub fn futex_unlock_pi(futex: &AtomicU32) -> Result<(), Errno> {
    let op = nc::FUTEX_UNLOCK_PI | nc::FUTEX_PRIVATE_FLAG;
    unsafe { syscall!(Sysno::futex, futex as *const AtomicU32, op, 0u32) }.map(drop)
}

fn realtime_instant(deadline: &Deadline) -> Option<Timespec> {
    if deadline.clock().is_realtime() {
        return Some(deadline.instant());
    }
    // Re-express the remaining time on the realtime clock.
    let remaining = deadline.remaining().unwrap_or_default();
    Timespec::now(ClockId::Realtime).checked_add_duration(&remaining)
}
