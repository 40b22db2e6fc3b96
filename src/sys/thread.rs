//! Per-thread identity and scheduler hints.

use core::cell::Cell;
use core::time::Duration;

/// Largest id [`current_id`] hands out; ids fit the 30-bit owner field of
/// a lock word.
pub const MAX_THREAD_ID: u32 = 0x3fff_fffe;

thread_local! {
    static ID: Cell<u32> = const { Cell::new(0) };
}

/// Nonzero identifier of the calling thread, unique among live threads.
///
/// On Linux this is the kernel TID, which priority-inheritance futexes
/// require.
pub fn current_id() -> u32 {
    ID.with(|id| {
        let mut cached = id.get();
        if cached == 0 {
            cached = fetch_id();
            id.set(cached);
        }
        cached
    })
}

#[cfg(target_os = "linux")]
fn fetch_id() -> u32 {
    use syscalls::{syscall, Sysno};

    match unsafe { syscall!(Sysno::gettid) } {
        Ok(tid) if tid > 0 && tid as u64 <= MAX_THREAD_ID as u64 => tid as u32,
        Ok(tid) => crate::error::fatal!("thread", "gettid returned unusable tid {tid}"),
        Err(errno) => crate::error::fatal!("thread", "gettid failed: {errno:?}"),
    }
}

#[cfg(windows)]
fn fetch_id() -> u32 {
    use core::sync::atomic::{AtomicU32, Ordering::Relaxed};

    // Win32 thread ids are not guaranteed to fit 30 bits; hand out our own.
    static NEXT: AtomicU32 = AtomicU32::new(1);
    let id = NEXT.fetch_add(1, Relaxed);
    if id == 0 || id > MAX_THREAD_ID {
        crate::error::fatal!("thread", "thread id space exhausted");
    }
    id
}

/// Gives up the rest of the time slice.
pub(crate) fn yield_now() {
    #[cfg(target_os = "linux")]
    {
        use syscalls::{syscall, Sysno};
        // sched_yield cannot fail on Linux.
        let _ = unsafe { syscall!(Sysno::sched_yield) };
    }
    #[cfg(windows)]
    unsafe {
        windows_sys::Win32::System::Threading::SwitchToThread();
    }
}

/// Sleeps for roughly `duration`.
pub(crate) fn sleep(duration: Duration) {
    std::thread::sleep(duration);
}
