//! One-time probes for optional kernel facilities.
//!
//! Each [`Capability`] is probed at most once per process, on first use or
//! through [`init`]. The result is cached as a [`Probe`]: either the entry
//! points to use, or a marker that the facility is missing. Callers ask
//! through [`try_use`] and fall back when it answers `None`.
//!
//! ```
//! use futex_sync::caps::{self, PriorityInheritance};
//!
//! caps::init();
//! if caps::try_use::<PriorityInheritance>().is_none() {
//!     // Recursive mutexes use the portable bit-flag protocol.
//! }
//! ```

use core::fmt;
use core::sync::atomic::AtomicU32;
use core::time::Duration;
use std::sync::OnceLock;
use crate::error::Result;
use crate::time::Deadline;

/// Cached outcome of a capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe<E> {
    /// The facility exists; use these entry points.
    Supported(E),
    /// The facility is missing on this system.
    Unsupported,
}

impl<E> From<Option<E>> for Probe<E> {
    fn from(entry: Option<E>) -> Probe<E> {
        match entry {
            Some(entry) => Probe::Supported(entry),
            None => Probe::Unsupported,
        }
    }
}

/// An optional facility and the way to detect it.
pub trait Capability: 'static {
    /// What a successful probe hands out.
    type Entry: Copy + Send + Sync + fmt::Debug + 'static;

    /// Name used in log output.
    const NAME: &'static str;

    /// Detects the facility. Runs at most once.
    fn probe() -> Option<Self::Entry>;

    /// Storage for the cached probe.
    fn cell() -> &'static OnceLock<Probe<Self::Entry>>;
}

/// The cached entry for `C`, probing on first call.
pub fn try_use<C: Capability>() -> Option<C::Entry> {
    let probe = C::cell().get_or_init(|| {
        let probe = Probe::from(C::probe());
        log::debug!("capability {}: {:?}", C::NAME, probe);
        probe
    });
    match probe {
        Probe::Supported(entry) => Some(*entry),
        Probe::Unsupported => None,
    }
}

/// Probes every capability now instead of on first use.
pub fn init() {
    try_use::<PriorityInheritance>();
    try_use::<CoarseClock>();
}

/// Kernel entry points for priority-inheritance futexes.
#[derive(Clone, Copy)]
pub struct PiOps {
    /// Blocks until the word is owned by the caller, or the deadline passes.
    pub lock: fn(&AtomicU32, Option<&Deadline>) -> Result<()>,
    /// Takes the word if it is free of an owner.
    pub trylock: fn(&AtomicU32) -> Result<()>,
    /// Releases the word to the highest-priority waiter.
    pub unlock: fn(&AtomicU32) -> Result<()>,
}

impl fmt::Debug for PiOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PiOps").finish_non_exhaustive()
    }
}

/// Priority-inheritance futex operations (`FUTEX_LOCK_PI` and friends).
#[derive(Debug)]
pub struct PriorityInheritance;

impl Capability for PriorityInheritance {
    type Entry = PiOps;
    const NAME: &'static str = "priority-inheritance futex";

    #[cfg(target_os = "linux")]
    fn probe() -> Option<PiOps> {
        use super::futex;

        // Unlocking a word we do not own fails with EPERM when PI futexes
        // exist and ENOSYS when they do not.
        let word = AtomicU32::new(0);
        match futex::futex_unlock_pi(&word) {
            Err(syscalls::Errno::ENOSYS) => None,
            _ => Some(PiOps { lock: pi_lock, trylock: pi_trylock, unlock: pi_unlock }),
        }
    }

    #[cfg(windows)]
    fn probe() -> Option<PiOps> {
        None
    }

    fn cell() -> &'static OnceLock<Probe<PiOps>> {
        static CELL: OnceLock<Probe<PiOps>> = OnceLock::new();
        &CELL
    }
}

#[cfg(target_os = "linux")]
fn pi_lock(word: &AtomicU32, deadline: Option<&Deadline>) -> Result<()> {
    Ok(super::futex::futex_lock_pi(word, deadline)?)
}

#[cfg(target_os = "linux")]
fn pi_trylock(word: &AtomicU32) -> Result<()> {
    Ok(super::futex::futex_trylock_pi(word)?)
}

#[cfg(target_os = "linux")]
fn pi_unlock(word: &AtomicU32) -> Result<()> {
    Ok(super::futex::futex_unlock_pi(word)?)
}

/// Coarse clocks (`CLOCK_*_COARSE`). The entry is the clock's resolution.
#[derive(Debug)]
pub struct CoarseClock;

impl Capability for CoarseClock {
    type Entry = Duration;
    const NAME: &'static str = "coarse clocks";

    #[cfg(target_os = "linux")]
    fn probe() -> Option<Duration> {
        let mut res = nc::timespec_t { tv_sec: 0, tv_nsec: 0 };
        unsafe { nc::clock_getres(nc::CLOCK_MONOTONIC_COARSE, Some(&mut res)) }.ok()?;
        Some(Duration::new(res.tv_sec as u64, res.tv_nsec as u32))
    }

    #[cfg(windows)]
    fn probe() -> Option<Duration> {
        None
    }

    fn cell() -> &'static OnceLock<Probe<Duration>> {
        static CELL: OnceLock<Probe<Duration>> = OnceLock::new();
        &CELL
    }
}
