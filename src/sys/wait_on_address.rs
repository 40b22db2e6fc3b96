use core::ffi::c_void;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::Relaxed;
use core::time::Duration;
use windows_sys::Win32::System::Threading::{
    INFINITE, WaitOnAddress, WakeByAddressAll, WakeByAddressSingle,
};
use crate::blocking::WaitOutcome;
use crate::error::{Error, fatal};
use crate::time::Deadline;

/// Waits until `futex` is woken while holding `expected`.
///
/// `WaitOnAddress` takes a relative timeout, so the remaining time is
/// re-read from the deadline's clock before every call.
pub fn futex_wait(futex: &AtomicU32, expected: u32, deadline: Option<&Deadline>) -> WaitOutcome {
    loop {
        if futex.load(Relaxed) != expected {
            return WaitOutcome::ValueChanged;
        }

        let millis = match deadline {
            None => INFINITE,
            Some(d) => match d.remaining() {
                Some(left) => to_millis(left),
                None => return WaitOutcome::TimedOut,
            },
        };

        let woken = unsafe {
            WaitOnAddress(
                futex.as_ptr() as *const c_void,
                &expected as *const u32 as *const c_void,
                size_of::<u32>(),
                millis,
            )
        };
        if woken != 0 {
            return WaitOutcome::Woken;
        }

        match Error::last_os_error() {
            // Loop to re-check the word and the deadline.
            Error::TimedOut => continue,
            err => fatal!("WaitOnAddress", "wait failed: {err}"),
        }
    }
}

/// Wakes one thread blocked on `futex`.
///
/// `WakeByAddressSingle` does not report whether anyone was woken, so this
/// always answers `true`.
pub fn futex_wake(futex: &AtomicU32) -> bool {
    unsafe { WakeByAddressSingle(futex.as_ptr() as *const c_void) };
    true
}

/// Wakes every thread blocked on `futex`.
pub fn futex_wake_all(futex: &AtomicU32) {
    unsafe { WakeByAddressAll(futex.as_ptr() as *const c_void) };
}

/// Rounds up to whole milliseconds, staying below `INFINITE`.
fn to_millis(d: Duration) -> u32 {
    let millis = d.as_nanos().div_ceil(1_000_000);
    millis.min((INFINITE - 1) as u128) as u32
}
